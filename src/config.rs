//! Link and host configuration (spec §3.1), replacing the reference
//! implementation's module-level constants
//! (`tools/scheduler/constants.py`) with values a caller can override per
//! port.

use std::time::Duration;

use crate::crc::CrcFn;

/// Per-link tuning knobs. `Default` reproduces the reference's hardcoded
/// constants exactly, so a caller that doesn't care can just use
/// `LinkConfig::default()`.
#[derive(Clone)]
pub struct LinkConfig {
    /// Number of reusable outgoing queue slots (spec §3, `TASK_TABLE_SIZE`
    /// in the reference).
    pub task_capacity: usize,
    /// Serial baud rate used when opening the port.
    pub baud_rate: u32,
    /// Byte order `MODIFY_TASK_VAL` payloads are packed in.
    pub little_endian: bool,
    /// First reply-timeout window, before a task has been rotated once.
    pub short_timer: Duration,
    /// Second reply-timeout window, applied to an already-rotated task.
    pub long_timer: Duration,
    /// Checksum strategy for assembling/verifying packets.
    pub crc: CrcFn,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            task_capacity: 10,
            baud_rate: 115_200,
            little_endian: true,
            short_timer: Duration::from_millis(350),
            long_timer: Duration::from_millis(500),
            crc: CrcFn::default(),
        }
    }
}

/// Host-wide configuration: the default used for any link opened without
/// an explicit override.
#[derive(Clone)]
pub struct HostConfig {
    pub default_link: LinkConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            default_link: LinkConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_constants() {
        let config = LinkConfig::default();
        assert_eq!(config.task_capacity, 10);
        assert_eq!(config.baud_rate, 115_200);
        assert!(config.little_endian);
        assert_eq!(config.short_timer, Duration::from_millis(350));
        assert_eq!(config.long_timer, Duration::from_millis(500));
    }
}
