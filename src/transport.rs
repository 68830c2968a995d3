//! Serial transport: one async task per link, feeding bytes into a
//! [`Scheduler`] and writing back whatever it produces (spec component
//! "C6", and spec §9's permitted substitution of "one task on a shared
//! runtime" for "one OS thread per link" -- see module docs on
//! [`crate::scheduler`]).
//!
//! Grounded in `connection/serial.rs`'s `SerialConnection::open`
//! (the `tokio_serial::new(...).parity(...).timeout(...)` builder) and its
//! `select!`-driven read loop, generalized from VEX's fixed packet framing
//! to this crate's COBS delimiter framing and timer-driven outgoing side.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::config::LinkConfig;
use crate::scheduler::Scheduler;

/// How often the worker polls the scheduler for a frame to send. Short
/// enough that reply-timeout rotation (350-500ms, see [`LinkConfig`])
/// doesn't visibly lag, long enough not to spin.
const SEND_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Identifies one open link within a [`crate::host::Host`]. Cheap, `Copy`,
/// and otherwise meaningless outside that host -- handlers receive it via
/// [`crate::task_table::TaskContext`] only to pass back to the host if they
/// need to address a specific link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(pub u32);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: tokio_serial::Error,
    },
    #[error("i/o error on link: {0}")]
    Io(#[from] std::io::Error),
}

/// One running link: an open port plus the background task driving it.
/// Dropping a `Worker` does not stop its task -- call
/// [`Worker::shutdown`] (or let [`crate::host::Host::close_all`] do it).
pub struct Worker {
    pub id: LinkId,
    active: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Worker {
    /// Opens `port` and spawns the task that drives it: reads drive
    /// [`Scheduler::feed_byte`], and a fixed-interval tick drives
    /// [`Scheduler::send_once`].
    pub fn spawn(
        id: LinkId,
        port: &str,
        config: &LinkConfig,
        scheduler: Arc<Scheduler>,
    ) -> Result<Self, TransportError> {
        let stream = tokio_serial::SerialStream::open(
            &tokio_serial::new(port, config.baud_rate)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One),
        )
        .map_err(|source| TransportError::Open {
            port: port.to_string(),
            source,
        })?;

        let active = Arc::new(AtomicBool::new(true));
        let task_active = active.clone();
        let handle = tokio::spawn(run_link(id, stream, scheduler, task_active));

        Ok(Self { id, active, handle })
    }

    /// Signals the link's task to stop after its current poll tick and
    /// waits for it to finish.
    pub async fn shutdown(self) {
        self.active.store(false, Ordering::Release);
        if let Err(err) = self.handle.await {
            warn!("link {:?} task panicked during shutdown: {err}", self.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

async fn run_link(
    id: LinkId,
    mut stream: tokio_serial::SerialStream,
    scheduler: Arc<Scheduler>,
    active: Arc<AtomicBool>,
) {
    let mut read_buf = [0u8; 64];
    let mut send_tick = interval(SEND_POLL_INTERVAL);

    debug!("link {id:?} task started");

    while active.load(Ordering::Acquire) {
        tokio::select! {
            read = stream.read(&mut read_buf) => {
                match read {
                    Ok(0) => {
                        warn!("link {id:?} read zero bytes, treating as closed");
                        break;
                    }
                    Ok(n) => {
                        for &byte in &read_buf[..n] {
                            scheduler.feed_byte(byte, id);
                        }
                    }
                    Err(err) => {
                        warn!("link {id:?} read error: {err}");
                        break;
                    }
                }
            }
            _ = send_tick.tick() => {
                if let Some(bytes) = scheduler.send_once() {
                    trace!("link {id:?} sending {} bytes", bytes.len());
                    if let Err(err) = stream.write_all(&bytes).await {
                        warn!("link {id:?} write error: {err}");
                        break;
                    }
                }
            }
        }
    }

    debug!("link {id:?} task stopped");
}
