//! Runtime configuration and resource caps.
//!
//! The resource caps a session negotiates are named, overridable fields constructed
//! once, not literals scattered through the codebase.

/// Low/high address-header split point.
pub const RMF_DATA_HIGH_MIN_ADDR: u32 = 0x4000;

/// Fixed address used by every in-band control command.
pub const RMF_CMD_START_ADDR: u32 = 0x3FFF_FC00;

/// `[start, end)` of the port-data address region, boundary alignment.
pub const PORT_DATA_REGION: (u32, u32) = (0x0000_0000, 0x0400_0000);
pub const PORT_DATA_BOUNDARY: u32 = 0x400;

/// `[start, end)` of the definition address region, boundary alignment.
pub const DEFINITION_REGION: (u32, u32) = (0x0400_0000, 0x2000_0000);
pub const DEFINITION_BOUNDARY: u32 = 0x10_0000;

/// `[start, end)` of the user address region, boundary alignment.
pub const USER_REGION: (u32, u32) = (0x2000_0000, 0x3FDF_FC00);
pub const USER_BOUNDARY: u32 = 0x10_0000;

/// Start of the reserved event-log region.
pub const EVENT_LOG_REGION_START: u32 = 0x3FDF_FC00;

/// Start of the reserved control/command region.
pub const CONTROL_REGION_START: u32 = 0x4000_0000;

/// Top bit of an address marks a remote-owned file.
pub const ADDRESS_REMOTE_FLAG: u32 = 0x8000_0000;

/// Runtime resource caps and tunables threaded through a [`crate::transport::FileManager`]
/// and [`crate::transport::ConnectionBase`].
#[derive(Debug, Clone)]
pub struct RuntimeLimits {
    /// Bounds coalescing of adjacent `WriteNotify` messages on the send side.
    pub fragmentation_threshold: usize,
    /// Bounds the scratch buffer used to serialize a control command when the transport
    /// buffer is temporarily full.
    pub max_cmd_buf_size: usize,
    /// Capacity of the send scheduler's outbound message queue.
    pub queue_capacity: usize,
    /// Largest admissible fragmented write the receive reassembler will accept before
    /// dropping it as oversize.
    pub reassembly_buffer_capacity: usize,
    /// How long to wait for a `HeartbeatResponse` before closing the connection.
    pub heartbeat_timeout: std::time::Duration,
    /// Interval between outbound heartbeat requests.
    pub heartbeat_interval: std::time::Duration,
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            fragmentation_threshold: 128,
            max_cmd_buf_size: 256,
            queue_capacity: 1024,
            reassembly_buffer_capacity: MAX_WRITE_SIZE,
            heartbeat_timeout: std::time::Duration::from_secs(10),
            heartbeat_interval: std::time::Duration::from_secs(3),
        }
    }
}

/// Largest single write the reassembler will buffer by default: enough for a full
/// definition-file fragment on a modest transport MTU, a generous multiple of common
/// buffer sizes.
pub const MAX_WRITE_SIZE: usize = 64 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_are_ascending_and_adjacent() {
        assert_eq!(PORT_DATA_REGION.1, DEFINITION_REGION.0);
        assert_eq!(DEFINITION_REGION.1, USER_REGION.0);
        assert_eq!(USER_REGION.1, EVENT_LOG_REGION_START);
        assert!(EVENT_LOG_REGION_START < CONTROL_REGION_START);
    }

    #[test]
    fn default_limits_match_documented_defaults() {
        let limits = RuntimeLimits::default();
        assert_eq!(limits.fragmentation_threshold, 128);
        assert_eq!(limits.max_cmd_buf_size, 256);
    }
}
