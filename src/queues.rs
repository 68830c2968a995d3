//! Three-pool outgoing queue structure (spec component "C3").
//!
//! Grounded in `original_source/src/Python/tools/scheduler/scheduler.py`'s
//! `_SchedulingLists`/`_SchedulerQueue`/`_TaskQueueEntry`. A fixed number of
//! reusable entries (`free`) are handed out to `normal` or `priority` on
//! schedule, and returned to `free` once they're done (acked, abandoned, or
//! sent once).

use std::collections::VecDeque;

/// An assembled outgoing packet waiting to be sent or acknowledged.
#[derive(Debug, Clone)]
pub struct Entry {
    pub task_id: u8,
    /// The fully COBS-encoded, delimiter-terminated wire bytes.
    pub encoded: Vec<u8>,
    /// Whether this entry has already survived one reply-timeout rotation.
    /// Transitions only false → true (spec invariant 5), and only on a
    /// timeout-triggered rotation or on an ACK carrying a nonzero status.
    pub rescheduled: bool,
}

impl Entry {
    fn reset(&mut self, task_id: u8, encoded: Vec<u8>) {
        self.task_id = task_id;
        self.encoded = encoded;
        self.rescheduled = false;
    }
}

/// Which lane `peek` selected, so callers know how to treat the head entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Priority,
    Normal,
}

/// The three-pool queue structure: `free` (reusable slots), `normal`
/// (awaiting ACK), `priority` (fire-and-forget). `free.len() + normal.len()
/// + priority.len() == capacity` always (spec invariant 2).
pub struct Queues {
    free: VecDeque<Entry>,
    normal: VecDeque<Entry>,
    priority: VecDeque<Entry>,
}

impl Queues {
    /// Creates a fresh queue set with `capacity` reusable entries.
    pub fn new(capacity: usize) -> Self {
        let mut free = VecDeque::with_capacity(capacity);
        for _ in 0..capacity {
            free.push_back(Entry {
                task_id: 0,
                encoded: Vec::new(),
                rescheduled: false,
            });
        }
        Self {
            free,
            normal: VecDeque::new(),
            priority: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.free.len() + self.normal.len() + self.priority.len()
    }

    pub fn is_full(&self) -> bool {
        self.free.is_empty()
    }

    /// True if the priority lane currently holds no entries -- the
    /// "current queue would be normal" condition of spec §4.4 step 2 that
    /// decides whether an overflowing `schedule` call promotes the normal
    /// head to make room. Keyed on this existing queue state, not on which
    /// lane the overflowing schedule request is itself headed for.
    pub fn priority_is_empty(&self) -> bool {
        self.priority.is_empty()
    }

    /// True if `task_id` is already present in `normal` or `priority`
    /// (spec invariant 1 / the dedup guard in §4.4).
    pub fn contains(&self, task_id: u8) -> bool {
        self.normal.iter().any(|e| e.task_id == task_id) || self.priority.iter().any(|e| e.task_id == task_id)
    }

    /// Pops a free entry, fills it in, and pushes it to the chosen lane.
    /// Returns `false` if no free entry was available (spec error
    /// `QUEUE_FULL`, handled one level up by [`crate::scheduler::Scheduler`]
    /// which promotes/sends first).
    pub fn push(&mut self, task_id: u8, encoded: Vec<u8>, priority: bool, fast: bool) -> bool {
        let Some(mut entry) = self.free.pop_front() else {
            return false;
        };
        entry.reset(task_id, encoded);

        let target = if priority {
            &mut self.priority
        } else {
            &mut self.normal
        };
        if fast {
            target.push_front(entry);
        } else {
            target.push_back(entry);
        }
        true
    }

    /// Picks which lane `send_once` should act on: priority is drained
    /// strictly before normal (spec invariant 3). Returns `None` if both
    /// lanes are empty.
    pub fn peek(&self) -> Option<(QueueKind, &Entry)> {
        if let Some(entry) = self.priority.front() {
            Some((QueueKind::Priority, entry))
        } else {
            self.normal.front().map(|entry| (QueueKind::Normal, entry))
        }
    }

    /// Removes the head of `kind`'s lane and returns its slot to `free`.
    pub fn pop_current(&mut self, kind: QueueKind) {
        let queue = match kind {
            QueueKind::Priority => &mut self.priority,
            QueueKind::Normal => &mut self.normal,
        };
        if let Some(entry) = queue.pop_front() {
            self.free.push_back(entry);
        }
    }

    /// Moves the head of `normal` to its own tail, marking it rescheduled.
    /// This is the retransmit-by-rotation step (spec §4.4): the caller is
    /// responsible for clearing any `prev_sent_id`/timer state it keeps,
    /// since a rotated head must retransmit on the scheduler's next
    /// `send_once` call (spec §9, "explicit `prev_sent_id` clear").
    pub fn rotate_normal(&mut self) {
        if let Some(mut entry) = self.normal.pop_front() {
            entry.rescheduled = true;
            self.normal.push_back(entry);
        }
    }

    /// Moves the head of `normal` to the tail of `priority`, to free a slot
    /// when queues are full and the overflowing schedule was headed for
    /// `normal`. Intentionally asymmetric: `priority` entries are never
    /// demoted back to `normal` (spec §9 Open Question: "Retain this
    /// behavior; document but do not 'fix'"). A priority entry is sent at
    /// most once regardless of how it got there, so promoting a normal
    /// entry here means it loses its ACK guarantee -- that's the price of
    /// making room, not a bug.
    pub fn promote_normal_to_priority(&mut self) {
        if let Some(entry) = self.normal.pop_front() {
            self.priority.push_back(entry);
        }
    }

    /// Removes a queued-but-not-yet-dispatched task by id from either lane,
    /// if present (used by the internal `UNSCHEDULE_TASK` handler, spec
    /// §4.5).
    pub fn remove(&mut self, task_id: u8) -> bool {
        if let Some(pos) = self.normal.iter().position(|e| e.task_id == task_id) {
            let entry = self.normal.remove(pos).expect("position was just found");
            self.free.push_back(entry);
            return true;
        }
        if let Some(pos) = self.priority.iter().position(|e| e.task_id == task_id) {
            let entry = self.priority.remove(pos).expect("position was just found");
            self.free.push_back(entry);
            return true;
        }
        false
    }

    pub fn normal_head(&self) -> Option<&Entry> {
        self.normal.front()
    }

    pub fn normal_len(&self) -> usize {
        self.normal.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_bytes(n: u8) -> Vec<u8> {
        vec![n]
    }

    #[test]
    fn capacity_invariant_holds_through_churn() {
        let mut q = Queues::new(4);
        assert_eq!(q.capacity(), 4);
        assert!(q.push(1, entry_bytes(1), false, false));
        assert!(q.push(2, entry_bytes(2), true, false));
        assert_eq!(q.capacity(), 4);
        q.pop_current(QueueKind::Normal);
        assert_eq!(q.capacity(), 4);
    }

    #[test]
    fn priority_drained_before_normal() {
        let mut q = Queues::new(4);
        q.push(1, entry_bytes(1), false, false);
        q.push(2, entry_bytes(2), true, false);
        let (kind, entry) = q.peek().unwrap();
        assert_eq!(kind, QueueKind::Priority);
        assert_eq!(entry.task_id, 2);
    }

    #[test]
    fn fast_inserts_at_head_of_its_lane() {
        let mut q = Queues::new(4);
        q.push(1, entry_bytes(1), false, false);
        q.push(2, entry_bytes(2), false, true);
        let (_, entry) = q.peek().unwrap();
        assert_eq!(entry.task_id, 2);
    }

    #[test]
    fn push_fails_when_full() {
        let mut q = Queues::new(1);
        assert!(q.push(1, entry_bytes(1), false, false));
        assert!(!q.push(2, entry_bytes(2), false, false));
    }

    #[test]
    fn contains_checks_both_lanes() {
        let mut q = Queues::new(4);
        q.push(5, entry_bytes(5), false, false);
        assert!(q.contains(5));
        assert!(!q.contains(6));
        q.push(6, entry_bytes(6), true, false);
        assert!(q.contains(6));
    }

    #[test]
    fn rotate_moves_head_to_tail_and_marks_rescheduled() {
        let mut q = Queues::new(4);
        q.push(1, entry_bytes(1), false, false);
        q.push(2, entry_bytes(2), false, false);
        q.rotate_normal();
        assert_eq!(q.normal_head().unwrap().task_id, 2);
        assert!(!q.normal_head().unwrap().rescheduled);
        q.rotate_normal();
        assert_eq!(q.normal_head().unwrap().task_id, 1);
        assert!(q.normal_head().unwrap().rescheduled);
    }

    #[test]
    fn promote_moves_normal_head_to_priority_tail_only() {
        let mut q = Queues::new(4);
        q.push(1, entry_bytes(1), false, false);
        q.push(2, entry_bytes(2), true, false);
        q.promote_normal_to_priority();
        assert_eq!(q.normal_len(), 0);
        // priority now holds [2, 1] -- original priority head stays first.
        q.pop_current(QueueKind::Priority);
        assert_eq!(q.peek().unwrap().1.task_id, 1);
    }

    #[test]
    fn remove_frees_slot_from_either_lane() {
        let mut q = Queues::new(4);
        q.push(1, entry_bytes(1), false, false);
        q.push(2, entry_bytes(2), true, false);
        assert!(q.remove(1));
        assert!(!q.contains(1));
        assert_eq!(q.capacity(), 4);
        assert!(q.remove(2));
        assert!(!q.remove(99));
    }
}
