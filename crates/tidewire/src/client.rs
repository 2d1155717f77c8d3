//! Client-side entry point.

use std::sync::Arc;

use tidewire_connection::{Connection, ConnectionConfig};
use tidewire_protocol::{Catalog, Packet};
use tokio::net::ToSocketAddrs;

use crate::TidewireError;

/// Connects game clients to a Tidewire server.
///
/// The returned [`Connection`] is already running its workers. The first
/// packet the server queues is `ConnectionEstablished` carrying this
/// client's player number; drain it with
/// [`Connection::service_client`] like any other packet.
pub struct Client;

impl Client {
    /// Dials `addr`, completes the handshake, and opens a client-side
    /// connection.
    pub async fn connect<P: Packet>(
        addr: impl ToSocketAddrs,
        catalog: Arc<Catalog<P>>,
        config: ConnectionConfig,
    ) -> Result<Connection<P>, TidewireError> {
        let conn = Connection::connect(addr, catalog, config).await?;
        tracing::debug!(
            conn_id = %conn.id(),
            peer = %conn.peer_addr(),
            "client connected"
        );
        Ok(conn)
    }
}
