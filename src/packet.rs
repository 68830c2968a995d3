//! Packet layout, checksum, and header parsing (spec component "C2").
//!
//! Grounded in `original_source/src/Python/tools/scheduler/pkt_handling.py`
//! (`process_outgoing_pkt`/`process_incoming_pkt`) and
//! `tools/scheduler/constants.py` for the exact offsets and size limits.

use thiserror::Error;

use crate::crc::CrcFn;
use crate::framer::{FrameError, Framer};
use crate::task_table::PayloadSizeLookup;

/// Maximum payload size in bytes (spec §3).
pub const MAX_PAYLOAD: usize = 25;
/// Size of the decoded header: crc16 (2) + task_id (1) + task_type (1).
pub const DECODED_HDR: usize = 4;
/// Minimum size of an encoded frame that could possibly contain a valid
/// header (header bytes plus one length byte).
pub const ENCODED_HDR_SIZE: usize = 5;
/// Hard ceiling on any single packet, encoded or decoded.
pub const MAX_ALLOWED_PKT_SIZE: usize = 255;
/// Largest decoded buffer this crate will ever assemble or accept.
pub const MAX_DECODED_PKT_BUF_SIZE: usize = DECODED_HDR + MAX_PAYLOAD;
/// Largest encoded (COBS'd, delimiter included) buffer an inbound frame may
/// grow to before the receive side resyncs (spec §4.5).
pub const MAX_ENCODED_PKT_BUF_SIZE: usize = ENCODED_HDR_SIZE + MAX_PAYLOAD + 1;

const CRC16_OFFSET: usize = 0;
const TASK_ID_OFFSET: usize = 2;
const TASK_TYPE_OFFSET: usize = 3;
const PAYLOAD_OFFSET: usize = 4;

/// Whether a task id refers to the host's own internal protocol machinery
/// or a handler registered by an external collaborator (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    Internal = 0,
    External = 1,
}

impl TaskType {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(TaskType::Internal),
            1 => Some(TaskType::External),
            _ => None,
        }
    }
}

/// Errors from assembling or parsing a packet (spec §7's taxonomy, the
/// subset that belongs to this layer).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("payload of {payload_len} bytes plus header exceeds MAX_DECODED_PKT_BUF_SIZE")]
    AssemblyTooLarge { payload_len: usize },
    #[error("encoded frame of {len} bytes is shorter than ENCODED_HDR_SIZE")]
    ShortHeader { len: usize },
    #[error("COBS frame was invalid: {0}")]
    Frame(#[from] FrameError),
    #[error("crc16 checksum mismatch")]
    CrcFail,
    #[error("unrecognized task type byte {0}")]
    UnknownTaskType(u8),
    #[error("external task {0} is not registered in the task table")]
    UnknownTask(u8),
    #[error("task {task_id} declared a payload of {expected} bytes but received {actual}")]
    SizeMismatch {
        task_id: u8,
        expected: i32,
        actual: usize,
    },
}

/// A fully parsed, decoded packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPacket {
    pub task_id: u8,
    pub task_type: TaskType,
    pub payload: Vec<u8>,
}

/// Assembles `(task_id, task_type, payload)` into a wire-ready, COBS-encoded
/// buffer (including the trailing delimiter).
///
/// Rejects a payload that would make the decoded buffer exceed
/// `MAX_DECODED_PKT_BUF_SIZE` (spec §4.2, error `ASSEMBLY_TOO_LARGE`).
pub fn assemble(
    task_id: u8,
    task_type: TaskType,
    payload: &[u8],
    crc: &CrcFn,
) -> Result<Vec<u8>, PacketError> {
    if DECODED_HDR + payload.len() > MAX_DECODED_PKT_BUF_SIZE {
        return Err(PacketError::AssemblyTooLarge {
            payload_len: payload.len(),
        });
    }

    let mut decoded = Vec::with_capacity(DECODED_HDR + payload.len());
    decoded.extend_from_slice(&[0, 0]); // crc16 placeholder, filled in below
    decoded.push(task_id);
    decoded.push(task_type.as_byte());
    decoded.extend_from_slice(payload);

    // The checksum covers everything after the crc16 field itself (task_id,
    // task_type, payload), matching "header with the checksum field zeroed".
    let checksum = crc.compute(&decoded[TASK_ID_OFFSET..]);
    decoded[CRC16_OFFSET..CRC16_OFFSET + 2].copy_from_slice(&checksum.to_le_bytes());

    Ok(Framer::encode(&decoded))
}

/// Parses a completed encoded buffer (delimiter already stripped by the
/// caller — see [`crate::scheduler::Scheduler::feed_byte`]) into a
/// [`DecodedPacket`], validating framing, checksum, and (for external
/// tasks) the task table entry via `lookup`.
pub fn parse(
    encoded: &[u8],
    crc: &CrcFn,
    lookup: &impl PayloadSizeLookup,
) -> Result<DecodedPacket, PacketError> {
    if encoded.len() < ENCODED_HDR_SIZE {
        return Err(PacketError::ShortHeader { len: encoded.len() });
    }

    let decoded = Framer::decode(encoded)?;

    if decoded.len() < DECODED_HDR {
        return Err(PacketError::ShortHeader { len: decoded.len() });
    }

    let claimed_crc = u16::from_le_bytes([decoded[CRC16_OFFSET], decoded[CRC16_OFFSET + 1]]);
    if !crc.verify(claimed_crc, &decoded[TASK_ID_OFFSET..]) {
        return Err(PacketError::CrcFail);
    }

    let task_id = decoded[TASK_ID_OFFSET];
    let task_type = TaskType::from_byte(decoded[TASK_TYPE_OFFSET])
        .ok_or(PacketError::UnknownTaskType(decoded[TASK_TYPE_OFFSET]))?;
    let payload = decoded[PAYLOAD_OFFSET..].to_vec();

    if task_type == TaskType::External {
        match lookup.declared_payload_size(task_id) {
            None => return Err(PacketError::UnknownTask(task_id)),
            Some(size) if size >= 0 && size as usize != payload.len() => {
                return Err(PacketError::SizeMismatch {
                    task_id,
                    expected: size,
                    actual: payload.len(),
                })
            }
            Some(_) => {}
        }
    }

    Ok(DecodedPacket {
        task_id,
        task_type,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_table::TaskTable;

    #[test]
    fn assembly_rejects_oversized_payload() {
        let payload = vec![0u8; MAX_PAYLOAD + 1];
        let err = assemble(1, TaskType::External, &payload, &CrcFn::default()).unwrap_err();
        assert!(matches!(err, PacketError::AssemblyTooLarge { .. }));
    }

    #[test]
    fn max_payload_assembles_and_parses() {
        let table = TaskTable::new();
        table.register(10, -1, |_c, _p| 0).unwrap();
        let payload = vec![0x42u8; MAX_PAYLOAD];
        let crc = CrcFn::default();
        let encoded = assemble(10, TaskType::External, &payload, &crc).unwrap();
        let decoded = parse(&encoded, &crc, &table).unwrap();
        assert_eq!(decoded.task_id, 10);
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn round_trip_preserves_fields() {
        let table = TaskTable::new();
        table.register(5, 1, |_c, _p| 0).unwrap();
        let crc = CrcFn::default();
        let encoded = assemble(5, TaskType::External, &[0xAA], &crc).unwrap();
        let decoded = parse(&encoded, &crc, &table).unwrap();
        assert_eq!(
            decoded,
            DecodedPacket {
                task_id: 5,
                task_type: TaskType::External,
                payload: vec![0xAA],
            }
        );
    }

    #[test]
    fn short_header_rejected() {
        let table = TaskTable::new();
        let err = parse(&[1, 2, 3], &CrcFn::default(), &table).unwrap_err();
        assert!(matches!(err, PacketError::ShortHeader { .. }));
    }

    #[test]
    fn crc_fail_rejected() {
        let table = TaskTable::new();
        table.register(1, -1, |_c, _p| 0).unwrap();
        let crc = CrcFn::default();
        let mut encoded = assemble(1, TaskType::External, &[], &crc).unwrap();
        // Flip a payload-adjacent byte post-encode is awkward through COBS;
        // instead corrupt the decoded form directly to exercise the check.
        let mut decoded = Framer::decode(&encoded[..encoded.len() - 1]).unwrap();
        decoded[0] ^= 0xFF;
        decoded[1] ^= 0xFF;
        encoded = Framer::encode(&decoded);
        let err = parse(&encoded, &crc, &table).unwrap_err();
        assert_eq!(err, PacketError::CrcFail);
    }

    #[test]
    fn unknown_task_rejected() {
        let table = TaskTable::new();
        let crc = CrcFn::default();
        let encoded = assemble(99, TaskType::External, &[], &crc).unwrap();
        let err = parse(&encoded, &crc, &table).unwrap_err();
        assert_eq!(err, PacketError::UnknownTask(99));
    }

    #[test]
    fn size_mismatch_rejected() {
        let table = TaskTable::new();
        table.register(7, 3, |_c, _p| 0).unwrap();
        let crc = CrcFn::default();
        let encoded = assemble(7, TaskType::External, &[1, 2], &crc).unwrap();
        let err = parse(&encoded, &crc, &table).unwrap_err();
        assert_eq!(
            err,
            PacketError::SizeMismatch {
                task_id: 7,
                expected: 3,
                actual: 2
            }
        );
    }

    #[test]
    fn internal_task_skips_table_lookup() {
        let table = TaskTable::new();
        let crc = CrcFn::default();
        let encoded = assemble(0, TaskType::Internal, &[10, 0], &crc).unwrap();
        let decoded = parse(&encoded, &crc, &table).unwrap();
        assert_eq!(decoded.task_type, TaskType::Internal);
    }
}
