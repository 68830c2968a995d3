//! The per-link scheduler: packet framing, outgoing queue discipline with
//! reply-timer retransmission, and inbound dispatch (spec component "C4",
//! the core of this crate).
//!
//! Grounded throughout in
//! `original_source/src/Python/tools/scheduler/scheduler.py`'s `Scheduler`
//! class. The reference keeps its send-side state (`prev_task`,
//! `start_time`, the three queues) as plain instance attributes because
//! Python has no concurrency story to speak of here beyond the GIL; this
//! port groups that same state behind one [`std::sync::Mutex`] so that
//! scheduling from a thread other than the owning transport task (spec
//! §5: "Outgoing schedule APIs invoked from threads other than the owner
//! worker must serialize via a per-scheduler send-side mutex") is simply
//! "take the lock," with no separate locking scheme to get wrong.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use thiserror::Error;

use crate::config::LinkConfig;
use crate::crc::CrcFn;
use crate::packet::{self, DecodedPacket, PacketError, TaskType};
use crate::printer::{DecodeDiagnostic, DecodeDiagnosticDetail, Printer};
use crate::queues::{QueueKind, Queues};
use crate::task_table::{TaskContext, TaskTable};
use crate::transport::LinkId;

/// Reserved internal task ids (spec §6).
pub mod internal_tasks {
    pub const ALERT_SYSTEM: u8 = 0;
    pub const PRINT_MESSAGE: u8 = 1;
    pub const UNSCHEDULE_TASK: u8 = 2;
    pub const MODIFY_TASK_VAL: u8 = 3;
    pub const PKT_DECODE: u8 = 4;
    pub const PKT_ENCODE: u8 = 5;
    pub const TASK_LOOKUP: u8 = 6;
    pub const TASK_REGISTER: u8 = 7;
}

/// Which lane, and whether to jump the lane's queue, a schedule request
/// wants (spec §4.4's `priority`/`fast` parameters, named for readability
/// at call sites like [`crate::host::Host::broadcast_schedule`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Awaits an ACK; FIFO within the normal lane.
    Normal,
    /// Awaits an ACK; jumps to the head of the normal lane.
    NormalFast,
    /// Sent once, no ACK; FIFO within the priority lane.
    Priority,
    /// Sent once, no ACK; jumps to the head of the priority lane.
    PriorityFast,
}

impl Priority {
    fn is_priority_lane(self) -> bool {
        matches!(self, Priority::Priority | Priority::PriorityFast)
    }

    fn is_fast(self) -> bool {
        matches!(self, Priority::NormalFast | Priority::PriorityFast)
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("no free outgoing slot for task {0} even after promoting/sending")]
    QueueFull(u8),
    #[error(transparent)]
    Packet(#[from] PacketError),
}

/// Send-side state grouped under one lock (see module docs).
struct SendState {
    queues: Queues,
    prev_sent_id: Option<u8>,
    start_time: Option<Instant>,
}

/// A per-link scheduler. Cheap to share: clone the `Arc` you wrap it in and
/// hand it to whatever needs to call `schedule` from another task (spec
/// §4.8/§9 "Global tables": the task table itself is shared by `Arc`
/// across the whole [`crate::host::Host`], not through a scheduler-to-
/// scheduler copy as the Python reference's `Scheduler.copy()` does).
pub struct Scheduler {
    config: LinkConfig,
    task_table: Arc<TaskTable>,
    printer: Mutex<Printer>,
    send: Mutex<SendState>,
    /// Frames produced by an eager `send_once` triggered from inside
    /// `schedule` (the `fast` placement and the overflow promote-and-send
    /// step, spec §4.4 steps 2/4), waiting for the transport worker's next
    /// poll to actually write them. Without this, those eager sends would
    /// compute a frame and then simply discard it: `schedule` has no
    /// writer of its own to hand the bytes to (spec §9, "Cyclic
    /// collaborator references" -- the scheduler does not own a
    /// transport handle), so the frame waits here instead.
    pending: Mutex<VecDeque<Vec<u8>>>,
    rx_buf: Mutex<Vec<u8>>,
    /// Set once an `ALERT_MCU_SETUP_COMPLETION` has been observed on this
    /// link (spec §6, `wait_mcu_setup_complete`).
    setup_complete: AtomicU8,
}

impl Scheduler {
    pub fn new(config: LinkConfig, task_table: Arc<TaskTable>) -> Self {
        Self {
            printer: Mutex::new(Printer::new(config.little_endian)),
            send: Mutex::new(SendState {
                queues: Queues::new(config.task_capacity),
                prev_sent_id: None,
                start_time: None,
            }),
            pending: Mutex::new(VecDeque::new()),
            rx_buf: Mutex::new(Vec::with_capacity(packet::MAX_ENCODED_PKT_BUF_SIZE)),
            setup_complete: AtomicU8::new(0),
            config,
            task_table,
        }
    }

    pub fn task_table(&self) -> &Arc<TaskTable> {
        &self.task_table
    }

    pub fn printer(&self) -> &Mutex<Printer> {
        &self.printer
    }

    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.load(Ordering::Acquire) != 0
    }

    pub(crate) fn mark_setup_complete(&self) {
        self.setup_complete.store(1, Ordering::Release);
    }

    fn crc(&self) -> &CrcFn {
        &self.config.crc
    }

    /// Schedules `(task_id, task_type, payload)` for transmission (spec
    /// §4.4). Silently coalesces a duplicate id already in flight (the
    /// dedup guard, spec invariant 1) rather than erroring -- that's the
    /// documented idempotent-scheduling behavior, not a missed case.
    pub fn schedule(
        &self,
        task_id: u8,
        task_type: TaskType,
        payload: &[u8],
        priority: Priority,
    ) -> Result<(), ScheduleError> {
        let encoded = packet::assemble(task_id, task_type, payload, self.crc())?;

        let mut send = self.send.lock().expect("send mutex poisoned");
        if send.queues.contains(task_id) {
            return Ok(()); // already queued: drop silently (spec §4.4 step 1)
        }

        if send.queues.is_full() {
            // Promotion is keyed on the *current* queue selection, not on
            // which lane this schedule call is headed for (spec §4.4 step
            // 2: "if the current queue would be normal" -- the reference's
            // `queue_type` is true when the priority lane is empty). A
            // priority-bound schedule still benefits from promotion when
            // the priority lane happens to be empty; a normal-bound
            // schedule does not promote when the priority lane already has
            // something to drain first. §9's asymmetric-promotion note
            // still applies: only normal -> priority, never the reverse.
            if send.queues.priority_is_empty() {
                send.queues.promote_normal_to_priority();
            }
            self.produce_and_enqueue(&mut send);
        }

        let pushed = send
            .queues
            .push(task_id, encoded, priority.is_priority_lane(), priority.is_fast());
        if !pushed {
            return Err(ScheduleError::QueueFull(task_id));
        }

        if priority.is_fast() {
            self.produce_and_enqueue(&mut send);
        }

        Ok(())
    }

    /// Runs the same selection `send_once` would, but stashes the result
    /// in `pending` instead of returning it, for the eager-send call sites
    /// inside `schedule` (see the `pending` field docs).
    fn produce_and_enqueue(&self, send: &mut SendState) {
        if let Some(bytes) = Self::send_once_locked(send, self.crc(), &self.config) {
            self.pending.lock().expect("pending mutex poisoned").push_back(bytes);
        }
    }

    /// Convenience wrapper over [`Self::schedule`] used internally to
    /// enqueue the ALERT_SYSTEM ack and other internal housekeeping tasks,
    /// which must never be rejected by `QUEUE_FULL` bookkeeping errors the
    /// caller would have no way to act on -- mirroring the reference's
    /// `_schedule_general_task`, which never surfaces a failure either.
    fn schedule_internal(&self, task_id: u8, payload: &[u8], priority: Priority) {
        if let Err(err) = self.schedule(task_id, TaskType::Internal, payload, priority) {
            log::warn!("internal task {task_id} could not be scheduled: {err}");
        }
    }

    /// Picks a frame to transmit (priority lane first, spec invariant 3),
    /// applying the reply-timer state machine for the normal lane (spec
    /// §4.4). Returns the wire bytes for the caller (the owning transport
    /// task, see [`crate::transport::Worker`]) to actually write -- this
    /// function performs no I/O itself (spec §9, "Cyclic collaborator
    /// references": tx is injected, not owned).
    pub fn send_once(&self) -> Option<Vec<u8>> {
        if let Some(bytes) = self.pending.lock().expect("pending mutex poisoned").pop_front() {
            return Some(bytes);
        }
        let mut send = self.send.lock().expect("send mutex poisoned");
        Self::send_once_locked(&mut send, self.crc(), &self.config)
    }

    fn send_once_locked(send: &mut SendState, _crc: &CrcFn, config: &LinkConfig) -> Option<Vec<u8>> {
        let (kind, _) = send.queues.peek()?;

        match kind {
            QueueKind::Priority => {
                let entry = send.queues.peek().expect("just confirmed non-empty").1;
                let bytes = entry.encoded.clone();
                send.queues.pop_current(QueueKind::Priority);
                Some(bytes)
            }
            QueueKind::Normal => {
                let head_id = send.queues.normal_head().expect("just confirmed non-empty").task_id;

                if send.prev_sent_id != Some(head_id) {
                    send.prev_sent_id = Some(head_id);
                    send.start_time = Some(Instant::now());
                    let bytes = send
                        .queues
                        .normal_head()
                        .expect("head still present")
                        .encoded
                        .clone();
                    return Some(bytes);
                }

                let rescheduled = send.queues.normal_head().expect("head still present").rescheduled;
                let elapsed = send
                    .start_time
                    .map(|t| t.elapsed())
                    .unwrap_or_default();
                let threshold = if rescheduled {
                    config.long_timer
                } else {
                    config.short_timer
                };

                if elapsed < threshold {
                    return None; // still within the reply window: no-op
                }

                if rescheduled {
                    // Second timeout: give up (spec §4.4).
                    send.queues.pop_current(QueueKind::Normal);
                    send.prev_sent_id = None;
                    send.start_time = None;
                } else {
                    // First timeout: rotate to the tail and retransmit next
                    // call. `rotate_normal` marks `rescheduled = true`;
                    // clearing `prev_sent_id`/`start_time` here is the
                    // explicit version of spec §9's "make this explicit so
                    // that a rotated head retransmits on next step."
                    send.queues.rotate_normal();
                    send.prev_sent_id = None;
                    send.start_time = None;
                }
                None
            }
        }
    }

    /// Feeds one byte of inbound wire data (spec §4.5). A zero byte
    /// terminates the frame and triggers parsing/dispatch; otherwise the
    /// byte accumulates, with the buffer resetting on overflow
    /// (framing resync) rather than growing unbounded.
    pub fn feed_byte(&self, byte: u8, worker_id: LinkId) {
        let mut buf = self.rx_buf.lock().expect("rx buffer mutex poisoned");

        if byte == 0 {
            let frame = std::mem::take(&mut *buf);
            drop(buf);
            if !frame.is_empty() {
                self.dispatch_frame(&frame, worker_id);
            }
            return;
        }

        if buf.len() >= packet::MAX_ENCODED_PKT_BUF_SIZE {
            buf.clear();
        }
        buf.push(byte);
    }

    fn dispatch_frame(&self, frame: &[u8], worker_id: LinkId) {
        let parsed = packet::parse(frame, self.crc(), self.task_table.as_ref());

        let decoded = match parsed {
            Ok(decoded) => decoded,
            Err(err) => {
                self.diagnose_parse_failure(&err);
                return;
            }
        };

        match decoded.task_type {
            TaskType::External => self.dispatch_external(decoded, worker_id),
            TaskType::Internal => self.dispatch_internal(decoded),
        }
    }

    fn diagnose_parse_failure(&self, err: &PacketError) {
        let mut printer = self.printer.lock().expect("printer mutex poisoned");
        let (diagnostic, detail) = match err {
            PacketError::Frame(_) => (DecodeDiagnostic::FrameInvalid, DecodeDiagnosticDetail::default()),
            PacketError::ShortHeader { .. } => {
                (DecodeDiagnostic::ShortHeader, DecodeDiagnosticDetail::default())
            }
            PacketError::CrcFail => (DecodeDiagnostic::CrcFail, DecodeDiagnosticDetail::default()),
            PacketError::UnknownTask(id) => (
                DecodeDiagnostic::UnknownTask,
                DecodeDiagnosticDetail {
                    task_number: Some(*id),
                    ..Default::default()
                },
            ),
            PacketError::SizeMismatch {
                task_id,
                expected,
                actual,
            } => (
                DecodeDiagnostic::SizeMismatch,
                DecodeDiagnosticDetail {
                    task_number: Some(*task_id),
                    expected_size: Some(*expected),
                    received_size: Some(*actual),
                },
            ),
            PacketError::UnknownTaskType(_) | PacketError::AssemblyTooLarge { .. } => {
                (DecodeDiagnostic::FrameInvalid, DecodeDiagnosticDetail::default())
            }
        };
        printer.diagnose_decode_failure(diagnostic, detail);
    }

    /// Dispatches a parsed external task to its registered handler, then
    /// enqueues the ALERT_SYSTEM ack carrying the handler's return code
    /// (spec §4.5 step 2).
    fn dispatch_external(&self, decoded: DecodedPacket, worker_id: LinkId) {
        let Some(handler) = self.task_table.handler(decoded.task_id) else {
            // parse() already enforces this, but stay defensive in case a
            // handler is unregistered concurrently between parse and here.
            log::warn!("external task {} had no handler at dispatch time", decoded.task_id);
            return;
        };

        let ctx = TaskContext {
            worker_id,
            scheduler: self,
        };
        let ret_code = handler(&ctx, &decoded.payload);

        self.schedule_internal(
            internal_tasks::ALERT_SYSTEM,
            &[decoded.task_id, ret_code],
            Priority::PriorityFast,
        );
    }

    fn dispatch_internal(&self, decoded: DecodedPacket) {
        match decoded.task_id {
            internal_tasks::ALERT_SYSTEM => self.handle_alert(&decoded.payload),
            internal_tasks::PRINT_MESSAGE => self.handle_print_message(&decoded.payload),
            internal_tasks::UNSCHEDULE_TASK => self.handle_unschedule(&decoded.payload),
            internal_tasks::MODIFY_TASK_VAL => self.handle_modify_task_val(&decoded.payload),
            // PKT_DECODE, PKT_ENCODE, TASK_LOOKUP, TASK_REGISTER: diagnostics
            // only (spec §4.5 step 3).
            other => log::debug!("diagnostic-only internal task {other} received"),
        }
    }

    /// `ALERT_SYSTEM` ack handling for the outgoing normal queue (spec
    /// §4.5): payload is `[task_id, status]`. Out-of-order acks (an id that
    /// doesn't match the current normal head) are ignored (spec §5
    /// ordering guarantee).
    fn handle_alert(&self, payload: &[u8]) {
        let [acked_id, status] = match payload {
            [id, status] => [*id, *status],
            _ => {
                log::warn!("ALERT_SYSTEM payload had unexpected length {}", payload.len());
                return;
            }
        };

        let mut send = self.send.lock().expect("send mutex poisoned");
        let Some(head) = send.queues.normal_head() else {
            return;
        };
        if head.task_id != acked_id {
            return; // not for the current head: ignore (out-of-order ack)
        }

        if status != 0 && !head.rescheduled {
            // Peer asked for a retry.
            send.queues.rotate_normal();
            send.prev_sent_id = None;
            send.start_time = None;
        } else {
            send.queues.pop_current(QueueKind::Normal);
            send.prev_sent_id = None;
            send.start_time = None;
        }
    }

    fn handle_print_message(&self, payload: &[u8]) {
        let [task_id, task_type_byte, msg_num] = match payload {
            [a, b, c] => [*a, *b, *c],
            _ => {
                log::warn!("PRINT_MESSAGE payload had unexpected length {}", payload.len());
                return;
            }
        };
        let Some(task_type) = TaskType::from_byte(task_type_byte) else {
            log::warn!("PRINT_MESSAGE carried unrecognized task type byte {task_type_byte}");
            return;
        };
        let printer = self.printer.lock().expect("printer mutex poisoned");
        printer.print_task_message(task_id, task_type, msg_num as u32, None);
    }

    fn handle_unschedule(&self, payload: &[u8]) {
        let Some(&task_id) = payload.first() else {
            log::warn!("UNSCHEDULE_TASK payload was empty");
            return;
        };
        let mut send = self.send.lock().expect("send mutex poisoned");
        send.queues.remove(task_id);
    }

    fn handle_modify_task_val(&self, payload: &[u8]) {
        let [task_id, task_type_byte, var_id, type_code, value @ ..] = payload else {
            log::warn!("MODIFY_TASK_VAL payload too short ({} bytes)", payload.len());
            return;
        };
        let Some(task_type) = TaskType::from_byte(*task_type_byte) else {
            log::warn!("MODIFY_TASK_VAL carried unrecognized task type byte {task_type_byte}");
            return;
        };
        let mut printer = self.printer.lock().expect("printer mutex poisoned");
        if let Err(err) = printer.modify_task_value(*task_id, task_type, *var_id, *type_code, value) {
            log::warn!("MODIFY_TASK_VAL rejected: {err}");
        }
    }
}
