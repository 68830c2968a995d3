//! Host-side testbed that coordinates one or more microcontrollers over
//! point-to-point serial links: COBS framing, a reply-timer outgoing
//! queue discipline, inbound task dispatch, and a compact printer channel
//! for MCU-originated telemetry.
//!
//! The entry point is [`host::Host`]: open a link with
//! [`host::Host::open_link`], register external task handlers with
//! [`host::Host::broadcast_register`], and schedule outgoing tasks with
//! [`host::Host::broadcast_schedule`].

pub mod config;
pub mod crc;
pub mod error;
pub mod framer;
pub mod host;
pub mod packet;
pub mod printer;
pub mod queues;
pub mod scheduler;
pub mod task_table;
pub mod transport;

pub use config::{HostConfig, LinkConfig};
pub use error::HostError;
pub use host::Host;
pub use packet::TaskType;
pub use scheduler::Priority;
pub use task_table::{TaskContext, TaskFn};
pub use transport::LinkId;
