//! Wire protocol for Tidewire.
//!
//! This crate defines what travels between peers and how it is laid out:
//!
//! - **Messages** ([`Message`], [`Packet`]): the contract each message
//!   type implements, and the application's closed set of them.
//! - **Catalog** ([`Catalog`], [`CatalogBuilder`]): the wire id ↔ type
//!   mapping both peers must build identically.
//! - **Wire cursor** ([`WireWriter`], [`WireReader`]): big-endian field
//!   encoding with length-prefixed strings and byte arrays.
//! - **Codec** ([`encode_reliable`], [`StreamDecoder`],
//!   [`DatagramDecoder`], ...): framing on the stream and on datagrams.
//! - **Core messages** ([`CoreMessage`]): connection bookkeeping and chat.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw bytes) and connection
//! (queues and workers). It knows nothing about sockets or tasks.
//!
//! ```text
//! Transport (bytes) → Protocol (Packet) → Connection (queues, workers)
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod builtin;
mod catalog;
mod codec;
mod error;
mod message;
mod types;
mod wire;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use builtin::{
    ChatMessage, ConnectionEstablished, CoreMessage, Disconnect, Ping, Pong,
};
pub use catalog::{Catalog, CatalogBuilder, CatalogEntry};
pub use codec::{
    encode_end_of_stream, encode_reliable, encode_unreliable,
    DatagramDecoder, StreamDecoder, StreamItem, TYPE_ID_LEN,
};
pub use error::ProtocolError;
pub use message::{AnyMessage, ClientDelivery, Message, Packet, ServerDelivery};
pub use types::{Channel, MessageTypeId};
pub use wire::{MAX_FIELD_LEN, WireReader, WireWriter};
