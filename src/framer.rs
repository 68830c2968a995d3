//! Consistent Overhead Byte Stuffing (COBS) framing.
//!
//! Removes every zero byte from a buffer so that a single `0x00` can be used
//! to unambiguously delimit frames on the wire. The algorithm mirrors the
//! classical Jacques Fortier implementation (also the one the reference
//! Python scheduler ports almost line for line in
//! `tools/scheduler/pkt_handling.py`): walk the input, maintain a "code" byte
//! counting non-zero bytes since the last zero (or since the start), and
//! back-patch that count into the slot reserved for it once a zero is found
//! or the run reaches 254 bytes.

use thiserror::Error;

/// Maximum run of non-delimiter bytes the encoder will place between two
/// code bytes before forcing a new block, per the COBS block-length limit.
const MAX_BLOCK_LEN: u8 = 0xFF;

/// Errors that can occur while decoding a COBS-framed buffer.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// A code byte pointed past the end of the input.
    #[error("COBS code byte pointed past the end of the frame")]
    Invalid,
    /// The decoded buffer was empty.
    #[error("COBS frame decoded to an empty buffer")]
    Empty,
}

/// Stateless COBS encoder/decoder.
///
/// Carries no state of its own; it operates on whatever buffer it's handed.
/// The inbound byte-accumulation state (the "is this frame complete yet"
/// question) lives in [`crate::scheduler::Scheduler`], not here — the framer
/// only knows how to transform a complete buffer.
pub struct Framer;

impl Framer {
    /// Encodes `input` and appends the trailing `0x00` delimiter.
    ///
    /// Total output length is at most `input.len() + input.len() / 254 + 2`.
    /// This function is total: it never fails, for any input including the
    /// empty slice.
    pub fn encode(input: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(input.len() + input.len() / 254 + 2);

        // code_index is where we'll backpatch the block length once known.
        let mut code_index = 0usize;
        let mut code: u8 = 1;
        out.push(0); // placeholder for this block's code byte

        for &byte in input {
            if byte == 0 {
                out[code_index] = code;
                code = 1;
                code_index = out.len();
                out.push(0); // placeholder for the next block's code byte
            } else {
                out.push(byte);
                code += 1;
                if code == MAX_BLOCK_LEN {
                    out[code_index] = code;
                    code = 1;
                    code_index = out.len();
                    out.push(0);
                }
            }
        }

        out[code_index] = code;
        out.push(0); // delimiter

        out
    }

    /// Decodes a complete COBS frame (without the trailing delimiter) back
    /// into its original bytes.
    ///
    /// `input` must not include the trailing `0x00` delimiter — callers
    /// strip it before invoking this (the delimiter is what told them the
    /// frame was complete in the first place).
    pub fn decode(input: &[u8]) -> Result<Vec<u8>, FrameError> {
        let mut out = Vec::with_capacity(input.len());
        let mut read = 0usize;
        let length = input.len();

        while read < length {
            let code = input[read];

            if read + code as usize > length && code != 1 {
                return Err(FrameError::Invalid);
            }

            read += 1;

            for _ in 1..code {
                out.push(input[read]);
                read += 1;
            }

            if code != MAX_BLOCK_LEN && read != length {
                out.push(0);
            }
        }

        if out.is_empty() {
            return Err(FrameError::Empty);
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(data: &[u8]) {
        let mut encoded = Framer::encode(data);
        assert_eq!(encoded.pop(), Some(0), "encoder must terminate with a delimiter");
        assert!(!encoded.contains(&0), "encoded body must contain no zero bytes");
        let decoded = Framer::decode(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn empty_input() {
        roundtrip(&[]);
    }

    #[test]
    fn no_zeros() {
        roundtrip(&[1, 2, 3, 4, 5]);
    }

    #[test]
    fn single_zero() {
        roundtrip(&[0]);
    }

    #[test]
    fn interior_zeros() {
        roundtrip(&[1, 0, 2, 0, 0, 3]);
    }

    #[test]
    fn leading_and_trailing_zero() {
        roundtrip(&[0, 1, 2, 3, 0]);
    }

    #[test]
    fn run_of_254_nonzero_bytes_has_no_inserted_zero() {
        let data = vec![0xAAu8; 254];
        let mut encoded = Framer::encode(&data);
        encoded.pop(); // drop delimiter
        // A full 254-byte run encodes as a single 0xFF code byte followed by
        // the 254 bytes verbatim, with no zero inserted in the middle.
        assert_eq!(encoded[0], 0xFF);
        assert!(!encoded.contains(&0));
        let decoded = Framer::decode(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn max_payload_roundtrip() {
        let data: Vec<u8> = (0..=28u8).collect();
        roundtrip(&data);
    }

    #[test]
    fn decode_rejects_truncated_code() {
        // code byte claims 5 bytes follow but only 2 are present.
        let bad = [5u8, 1, 2];
        assert_eq!(Framer::decode(&bad), Err(FrameError::Invalid));
    }

    #[test]
    fn decode_rejects_empty_result() {
        assert_eq!(Framer::decode(&[]), Err(FrameError::Empty));
    }

    #[test]
    fn random_sweep() {
        // A deterministic pseudo-random sweep over lengths and byte values,
        // avoiding any RNG dependency.
        let mut seed: u32 = 0x1234_5678;
        for len in 0..300usize {
            let mut data = Vec::with_capacity(len);
            for _ in 0..len {
                seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
                data.push((seed >> 16) as u8);
            }
            roundtrip(&data);
        }
    }
}
