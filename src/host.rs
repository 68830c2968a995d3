//! The multi-link supervisor (spec component "C8"): owns the shared task
//! table, opens/closes links, and fans broadcast calls out over every
//! open [`Scheduler`].
//!
//! Grounded in `original_source/src/Python/tools/scheduler/messengers.py`
//! (`BaseMessenger`'s shared `_main_scheduler`, `SerialMessenger.close_channels`)
//! and `setup.py`'s `define_scheduler_tasks`, generalized the way
//! SPEC_FULL.md §4.8 describes: the device/tracker/platform registration
//! handlers those modules install are out of scope here, so the six
//! system external-task ids get user-overridable closures instead, with
//! a no-op default for all but `ALERT_MCU_SETUP_COMPLETION`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::info;
use serialport::SerialPortInfo;

use crate::config::{HostConfig, LinkConfig};
use crate::error::HostError;
use crate::packet::TaskType;
use crate::scheduler::{Priority, Scheduler};
use crate::task_table::{TaskFn, TaskTable};
use crate::transport::{LinkId, Worker};

/// System external-task ids, reserved for the collaborator setup phase
/// (spec §6). `ALERT_MCU_SETUP_COMPLETION` is the only one this crate
/// gives inherent meaning to; the rest are no-ops unless the caller
/// overrides them with [`Host::set_system_handler`].
pub mod system_tasks {
    pub const REGISTER_PLATFORM: u8 = 255;
    pub const REGISTER_TRACKER: u8 = 254;
    pub const REGISTER_DEVICE: u8 = 253;
    pub const REGISTER_TESTER: u8 = 252;
    pub const ADD_DEVICE_ATTR: u8 = 251;
    pub const ALERT_MCU_SETUP_COMPLETION: u8 = 250;

    pub(crate) const ALL: [u8; 6] = [
        REGISTER_PLATFORM,
        REGISTER_TRACKER,
        REGISTER_DEVICE,
        REGISTER_TESTER,
        ADD_DEVICE_ATTR,
        ALERT_MCU_SETUP_COMPLETION,
    ];
}

struct LinkEntry {
    scheduler: Arc<Scheduler>,
    worker: Worker,
}

/// The top-level handle applications hold. Cheap to clone (wrap in
/// `Arc<Host>` yourself); internally everything it owns is already
/// `Arc`/`Mutex`-shared so handlers and broadcasts can reach it from any
/// task.
pub struct Host {
    task_table: Arc<TaskTable>,
    config: HostConfig,
    links: Mutex<HashMap<LinkId, LinkEntry>>,
    next_id: AtomicU32,
    system_defaults_installed: AtomicBool,
}

impl Host {
    pub fn new(config: HostConfig) -> Self {
        Self {
            task_table: Arc::new(TaskTable::new()),
            config,
            links: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(0),
            system_defaults_installed: AtomicBool::new(false),
        }
    }

    /// Lists serial ports the underlying platform sees, same as
    /// `serialport::available_ports` (spec §6).
    pub fn enumerate_serial_ports() -> Result<Vec<SerialPortInfo>, HostError> {
        Ok(serialport::available_ports()?)
    }

    /// Registers (or overrides) the handler for one of the six system
    /// task ids (spec §4.8). Must be called before the first
    /// [`Host::open_link`] -- the underlying task table rejects a second
    /// registration for the same id, the same as any other external task.
    pub fn set_system_handler(
        &self,
        task_id: u8,
        handler: impl TaskFn + 'static,
    ) -> Result<(), HostError> {
        self.task_table.register(task_id, -1, handler)?;
        Ok(())
    }

    fn install_default_system_handlers(&self) {
        if self.system_defaults_installed.swap(true, Ordering::AcqRel) {
            return;
        }
        for &id in &system_tasks::ALL {
            if self.task_table.contains(id) {
                continue; // caller already overrode this one
            }
            if id == system_tasks::ALERT_MCU_SETUP_COMPLETION {
                let _ = self.task_table.register(id, -1, |ctx, _payload| {
                    ctx.scheduler.mark_setup_complete();
                    0
                });
            } else {
                let _ = self.task_table.register(id, -1, |_ctx, _payload| 0);
            }
        }
    }

    /// Opens a serial port as a new link, spawning its worker task (spec
    /// §4.8). The first call installs default no-op handlers for any
    /// system task id the caller hasn't already overridden.
    pub async fn open_link(&self, port: &str, link_config: LinkConfig) -> Result<LinkId, HostError> {
        self.install_default_system_handlers();

        let id = LinkId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let scheduler = Arc::new(Scheduler::new(link_config.clone(), self.task_table.clone()));
        let worker = Worker::spawn(id, port, &link_config, scheduler.clone())?;

        info!("opened link {id:?} on {port}");
        self.links
            .lock()
            .expect("links mutex poisoned")
            .insert(id, LinkEntry { scheduler, worker });
        Ok(id)
    }

    /// Opens a link using the host's default [`LinkConfig`].
    pub async fn open_link_default(&self, port: &str) -> Result<LinkId, HostError> {
        self.open_link(port, self.config.default_link.clone()).await
    }

    /// Schedules `(task_id, task_type, payload)` on every currently open
    /// link (spec §6). Returns the first error encountered, after
    /// attempting every link.
    pub fn broadcast_schedule(
        &self,
        task_id: u8,
        task_type: TaskType,
        payload: &[u8],
        priority: Priority,
    ) -> Result<(), HostError> {
        let links = self.links.lock().expect("links mutex poisoned");
        let mut first_err = None;
        for entry in links.values() {
            if let Err(err) = entry.scheduler.schedule(task_id, task_type, payload, priority) {
                first_err.get_or_insert(err);
            }
        }
        first_err.map(Into::into).map_or(Ok(()), Err)
    }

    /// Registers an external task handler, shared by every link since the
    /// task table itself is shared (spec §6).
    pub fn broadcast_register(
        &self,
        task_id: u8,
        declared_payload_size: i32,
        handler: impl TaskFn + 'static,
    ) -> Result<(), HostError> {
        self.task_table
            .register(task_id, declared_payload_size, handler)?;
        Ok(())
    }

    /// Closes every link: stops its worker task and drops its scheduler.
    pub async fn close_all(&self) {
        let entries: Vec<LinkEntry> = self
            .links
            .lock()
            .expect("links mutex poisoned")
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        for entry in entries {
            entry.worker.shutdown().await;
        }
    }

    /// Returns once every currently open link has observed at least one
    /// `ALERT_MCU_SETUP_COMPLETION` (spec §6). Polls rather than using a
    /// condition variable since this fires once per link at startup, not
    /// on any hot path.
    pub async fn wait_mcu_setup_complete(&self) {
        loop {
            let all_ready = {
                let links = self.links.lock().expect("links mutex poisoned");
                !links.is_empty() && links.values().all(|entry| entry.scheduler.is_setup_complete())
            };
            if all_ready {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    pub fn link_count(&self) -> usize {
        self.links.lock().expect("links mutex poisoned").len()
    }
}
