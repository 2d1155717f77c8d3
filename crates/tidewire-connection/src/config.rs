//! Per-connection configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tidewire_transport::DEFAULT_MAX_DATAGRAM_SIZE;

// ---------------------------------------------------------------------------
// ConnectionConfig
// ---------------------------------------------------------------------------

/// Timing and buffer settings shared by the four workers of a connection.
///
/// Both peers may use different values; nothing here travels on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// How often the stream writer sends a `Ping` to measure latency.
    pub ping_interval: Duration,

    /// How long a writer keeps draining its outbound queue after the
    /// connection starts terminating. Whatever is still queued after
    /// that is dropped.
    pub drain_timeout: Duration,

    /// Initial capacity of the stream reader's receive buffer. The buffer
    /// grows on demand when a frame is larger.
    pub read_buffer_capacity: usize,

    /// Largest datagram the datagram reader accepts. Longer datagrams are
    /// truncated by the OS and then fail to decode.
    pub max_datagram_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(1),
            read_buffer_capacity: 8 * 1024,
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
        }
    }
}
