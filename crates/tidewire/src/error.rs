//! Errors surfaced by the server and client entry points.

use tidewire_connection::ConnectionError;
use tidewire_protocol::ProtocolError;
use tidewire_transport::TransportError;

/// Anything `ServerBuilder::build`, `Server::run` or `Client::connect`
/// can fail with.
///
/// Each layer keeps its own error enum; this one only forwards their
/// messages unchanged, so a bind failure still reads "bind failed: ...".
#[derive(Debug, thiserror::Error)]
pub enum TidewireError {
    /// Binding the listener, dialing, or the datagram port exchange.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A message the catalog cannot encode or decode.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Sending on a connection that is gone or shutting down.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}
