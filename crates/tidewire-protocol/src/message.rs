//! The message contract.
//!
//! Two levels:
//!
//! - [`Message`] — one concrete message type: its name, its transport
//!   [`Channel`], and a symmetric field encoding.
//! - [`Packet`] — the closed set of message types an application
//!   exchanges, written as one tagged enum. Queues and connections are
//!   generic over the packet type, and delivery is a plain `match` on
//!   the enum, so there is no runtime type inspection anywhere.
//!
//! ```rust
//! use tidewire_protocol::{
//!     AnyMessage, Channel, CoreMessage, Message, Packet, ProtocolError,
//!     WireReader, WireWriter,
//! };
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Position { x: f32, y: f32 }
//!
//! impl Message for Position {
//!     const NAME: &'static str = "Position";
//!     const CHANNEL: Channel = Channel::Unreliable;
//!
//!     fn encode(&self, w: &mut WireWriter) {
//!         w.put_f32(self.x);
//!         w.put_f32(self.y);
//!     }
//!
//!     fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
//!         Ok(Self { x: r.read_f32()?, y: r.read_f32()? })
//!     }
//! }
//!
//! #[derive(Debug)]
//! enum GamePacket {
//!     Core(CoreMessage),
//!     Position(Position),
//! }
//!
//! impl From<Position> for GamePacket {
//!     fn from(m: Position) -> Self { Self::Position(m) }
//! }
//!
//! impl Packet for GamePacket {
//!     fn message(&self) -> &dyn AnyMessage {
//!         match self {
//!             Self::Core(m) => m.message(),
//!             Self::Position(m) => m,
//!         }
//!     }
//!     fn from_core(msg: CoreMessage) -> Self { Self::Core(msg) }
//!     fn as_core(&self) -> Option<&CoreMessage> {
//!         match self {
//!             Self::Core(m) => Some(m),
//!             _ => None,
//!         }
//!     }
//! }
//! ```

use std::any::TypeId;
use std::fmt;

use tidewire_transport::ConnectionId;

use crate::{Channel, CoreMessage, ProtocolError, WireReader, WireWriter};

/// One concrete message type.
///
/// `decode` must read fields in exactly the order `encode` writes them.
/// Nothing checks this; keep the two next to each other.
pub trait Message: fmt::Debug + Send + Sized + 'static {
    /// Human-readable name, used in logs and catalog listings.
    const NAME: &'static str;

    /// Transport this type always travels over.
    const CHANNEL: Channel;

    /// Appends this message's fields.
    fn encode(&self, w: &mut WireWriter);

    /// Reads a fresh instance from the payload.
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError>;
}

/// Object-safe view of a [`Message`], implemented for every message type.
///
/// This is what a [`Packet`] hands to the codec so it can find the wire
/// id and write the fields without knowing the enum.
pub trait AnyMessage: fmt::Debug + Send {
    fn name(&self) -> &'static str;
    fn channel(&self) -> Channel;
    /// Key the catalog uses to map this type to its wire id.
    fn type_key(&self) -> TypeId;
    fn encode_fields(&self, w: &mut WireWriter);
}

impl<T: Message> AnyMessage for T {
    fn name(&self) -> &'static str {
        T::NAME
    }

    fn channel(&self) -> Channel {
        T::CHANNEL
    }

    fn type_key(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn encode_fields(&self, w: &mut WireWriter) {
        self.encode(w);
    }
}

/// The full set of messages a peer exchanges, as one tagged enum.
///
/// The core bookkeeping messages ([`CoreMessage`]) must be reachable
/// through `from_core`/`as_core` so the connection layer can answer
/// pings, measure latency, and post disconnect notices.
pub trait Packet: fmt::Debug + Send + Sized + 'static {
    /// The message carried by this packet.
    fn message(&self) -> &dyn AnyMessage;

    /// Wraps a core message.
    fn from_core(msg: CoreMessage) -> Self;

    /// Returns the core message, if this packet carries one.
    fn as_core(&self) -> Option<&CoreMessage>;

    /// Transport of the carried message.
    fn channel(&self) -> Channel {
        self.message().channel()
    }

    /// Name of the carried message.
    fn name(&self) -> &'static str {
        self.message().name()
    }
}

/// Delivery on the client side.
///
/// Runs on the thread that drains the inbound queues, once per packet.
/// Must not block and must not perform I/O; post an event instead.
pub trait ClientDelivery<C: ?Sized> {
    fn deliver_to_client(self, ctx: &mut C);
}

/// Delivery on the server side. `from` names the connection the packet
/// arrived on.
pub trait ServerDelivery<S: ?Sized> {
    fn deliver_to_server(self, from: ConnectionId, ctx: &mut S);
}
