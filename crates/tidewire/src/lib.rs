//! # Tidewire
//!
//! Message transport for real-time multiplayer games.
//!
//! Every connection pairs an ordered TCP stream with a UDP socket. Each
//! message type declares which of the two it travels on, and is given a
//! numeric id by a [`Catalog`] that both sides build in the same order.
//! Background workers move packets between the sockets and per-channel
//! queues; game code enqueues outbound packets and drains inbound ones
//! from its own loop.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tidewire::prelude::*;
//!
//! // Build a catalog with the core messages plus your own, then:
//! // let server = ServerBuilder::new()
//! //     .bind("0.0.0.0:7878")
//! //     .build(catalog)
//! //     .await?;
//! // server.run(Arc::new(Mutex::new(world))).await
//! ```

mod client;
mod error;
mod server;

pub use client::Client;
pub use error::TidewireError;
pub use server::{
    Server, ServerBuilder, DEFAULT_BIND_ADDR, DEFAULT_SERVICE_INTERVAL,
};

pub use tidewire_connection as connection;
pub use tidewire_protocol as protocol;
pub use tidewire_transport as transport;

pub mod prelude {
    pub use crate::{Client, Server, ServerBuilder, TidewireError};
    pub use tidewire_connection::{
        Connection, ConnectionConfig, ConnectionError, ConnectionSet,
        ConnectionState, Role,
    };
    pub use tidewire_protocol::{
        AnyMessage, Catalog, CatalogBuilder, Channel, ChatMessage,
        ClientDelivery, ConnectionEstablished, CoreMessage, Disconnect,
        Message, MessageTypeId, Packet, Ping, Pong, ProtocolError,
        ServerDelivery, WireReader, WireWriter,
    };
    pub use tidewire_transport::ConnectionId;
}
