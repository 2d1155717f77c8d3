//! Transport layer for Tidewire.
//!
//! Every peer relationship runs over two OS transports at once:
//!
//! - a **reliable** TCP byte stream (ordered, lossless), and
//! - an **unreliable** UDP datagram socket (best-effort, unordered).
//!
//! [`TransportEndpoint`] opens both together, exchanges datagram ports
//! over the stream, and then splits into four single-owner halves so that
//! exactly one reader and one writer exist per transport.
//!
//! ```text
//! TransportListener::accept / TransportEndpoint::connect
//!         │
//!         ▼
//! TransportEndpoint ──into_split()──→ ReliableSender    ReliableReceiver
//!                                     UnreliableSender  UnreliableReceiver
//! ```
//!
//! This crate only moves bytes. Framing and message types live in
//! `tidewire-protocol`.

mod endpoint;
mod error;

pub use endpoint::{
    EndpointHalves, ReliableReceiver, ReliableSender, TransportEndpoint,
    TransportListener, UnreliableReceiver, UnreliableSender,
    DEFAULT_MAX_DATAGRAM_SIZE, HANDSHAKE_TIMEOUT,
};
pub use error::TransportError;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one opened endpoint, kept by the connection built on it.
///
/// Handed out when the endpoint handshake completes, so ids never repeat
/// within a process and ascend in open order. Logs print it as `conn-N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn allocate() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Rebuilds an id from the number shown in `conn-N`.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
