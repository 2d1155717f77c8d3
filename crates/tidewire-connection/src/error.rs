//! Error types for the connection layer.

use tidewire_protocol::ProtocolError;
use tidewire_transport::{ConnectionId, TransportError};

/// Errors surfaced by [`Connection`](crate::Connection) and
/// [`ConnectionSet`](crate::ConnectionSet) calls.
///
/// Failures inside the workers never come back through here: they move
/// the connection to `Terminating` and show up as a `Disconnect` notice
/// on the inbound queue.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Opening the endpoint failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The message can never be sent (its type is not in the catalog).
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The connection is terminating or closed and takes no new messages.
    #[error("connection {0} is no longer active")]
    NotActive(ConnectionId),

    /// No connection with this id is in the set.
    #[error("connection {0} not found")]
    NotFound(ConnectionId),
}
