//! Top-level error type composing every layer's error into the one surface
//! [`crate::host::Host`] returns (spec §7, following the shape of the
//! teacher's `ConnectionError`, which composes `EncodeError`/`DecodeError`/
//! `io::Error` behind one `#[from]`-wired enum).

use thiserror::Error;

use crate::scheduler::ScheduleError;
use crate::task_table::TaskTableError;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("no such link")]
    UnknownLink,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    TaskTable(#[from] TaskTableError),
    #[error("enumerating serial ports failed: {0}")]
    PortEnumeration(#[from] serialport::Error),
}
