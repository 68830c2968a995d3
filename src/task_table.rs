//! The host's task-table: the id → handler map that determines how an
//! inbound external task is dispatched (spec §3, §6, §7 component "C7").
//!
//! Grounded in `original_source/src/Python/tools/scheduler/scheduler.py`'s
//! `_TaskTableEntry`/`register_task`, generalized from a single global
//! `{}` dict per `Scheduler` instance into a type that can be shared
//! (`Arc`) between the clones `Scheduler::copy()` produces in the
//! reference implementation, and between every [`crate::transport::Worker`]
//! a [`crate::host::Host`] opens.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;

/// Sentinel used for a task's declared payload size meaning "variable
/// length, do not validate" (spec §3: "`declared_payload_size = -1` means
/// variable / not validated").
pub const VARIABLE_SIZE: i32 = -1;

/// Identifies which link a handler was invoked on, and lets a handler reach
/// back into the scheduler that's invoking it (e.g. to reply with something
/// beyond the automatic ALERT_SYSTEM ack). See spec §9 "Cyclic collaborator
/// references": the scheduler is reached through `ctx`, never through a
/// mutually-owning reference graph.
pub struct TaskContext<'a> {
    pub worker_id: crate::transport::LinkId,
    pub scheduler: &'a crate::scheduler::Scheduler,
}

/// The uniform handler capability from spec §6: regardless of how many
/// arguments the original Python dispatch passed (1, 2, or 3, depending on
/// task id -- spec §9 "Dynamic handler arities"), every handler in this
/// crate has this one shape. The numeric return value is surfaced to the
/// peer as the `ret_code` byte of the internal ALERT_SYSTEM ack.
pub trait TaskFn: Fn(&TaskContext, &[u8]) -> u8 + Send + Sync {}
impl<F> TaskFn for F where F: Fn(&TaskContext, &[u8]) -> u8 + Send + Sync {}

/// A boxed, shareable handler.
pub type BoxedTaskFn = Arc<dyn TaskFn>;

struct TaskTableEntry {
    declared_payload_size: i32,
    handler: BoxedTaskFn,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TaskTableError {
    #[error("task {0} has already been registered")]
    AlreadyRegistered(u8),
}

/// Looked up by [`crate::packet`] to validate an inbound external task's
/// payload length against what the handler declared at registration time.
pub trait PayloadSizeLookup {
    /// `None` if `task_id` isn't registered at all. `Some(size)` otherwise,
    /// where `size < 0` means "variable, do not validate".
    fn declared_payload_size(&self, task_id: u8) -> Option<i32>;
}

/// id → handler map, shared by `Arc` across every link a [`crate::host::Host`]
/// opens (mirrors the "main scheduler" task table clones of the Python
/// reference, spec §5: "shared between schedulers created from a common
/// 'main' scheduler").
#[derive(Default)]
pub struct TaskTable {
    entries: Mutex<HashMap<u8, TaskTableEntry>>,
}

impl TaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task handler. Fails if a handler is already registered
    /// under this id (spec: "If task with the same number has already been
    /// registered, raise error").
    pub fn register(
        &self,
        task_id: u8,
        declared_payload_size: i32,
        handler: impl TaskFn + 'static,
    ) -> Result<(), TaskTableError> {
        let mut entries = self.entries.lock().expect("task table mutex poisoned");
        if entries.contains_key(&task_id) {
            return Err(TaskTableError::AlreadyRegistered(task_id));
        }
        entries.insert(
            task_id,
            TaskTableEntry {
                declared_payload_size,
                handler: Arc::new(handler),
            },
        );
        Ok(())
    }

    /// Returns the handler registered for `task_id`, if any.
    pub fn handler(&self, task_id: u8) -> Option<BoxedTaskFn> {
        self.entries
            .lock()
            .expect("task table mutex poisoned")
            .get(&task_id)
            .map(|entry| entry.handler.clone())
    }

    pub fn contains(&self, task_id: u8) -> bool {
        self.entries
            .lock()
            .expect("task table mutex poisoned")
            .contains_key(&task_id)
    }
}

impl PayloadSizeLookup for TaskTable {
    fn declared_payload_size(&self, task_id: u8) -> Option<i32> {
        self.entries
            .lock()
            .expect("task table mutex poisoned")
            .get(&task_id)
            .map(|entry| entry.declared_payload_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup() {
        let table = TaskTable::new();
        table.register(10, -1, |_ctx, _payload| 0).unwrap();
        assert!(table.contains(10));
        assert_eq!(table.declared_payload_size(10), Some(-1));
        assert_eq!(table.declared_payload_size(11), None);
    }

    #[test]
    fn duplicate_registration_errors() {
        let table = TaskTable::new();
        table.register(10, -1, |_ctx, _payload| 0).unwrap();
        let err = table.register(10, 1, |_ctx, _payload| 0).unwrap_err();
        assert_eq!(err, TaskTableError::AlreadyRegistered(10));
    }
}
