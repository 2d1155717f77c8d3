//! Core bookkeeping messages every peer understands.
//!
//! | message                 | channel  | fields                     |
//! |-------------------------|----------|----------------------------|
//! | `ConnectionEstablished` | reliable | `player_number: i32`       |
//! | `Ping`                  | reliable | `sent_at_micros: i64`      |
//! | `Pong`                  | reliable | `sent_at_micros: i64`      |
//! | `Disconnect`            | reliable | `reason: String`           |
//! | `ChatMessage`           | reliable | `pnum: i32`, `msg: String` |
//!
//! [`CatalogBuilder::register_core`](crate::CatalogBuilder::register_core)
//! registers them in this order.

use crate::{
    AnyMessage, Channel, Message, Packet, ProtocolError, WireReader,
    WireWriter,
};

/// Server → client: the stream handshake succeeded; this is your
/// player number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEstablished {
    pub player_number: i32,
}

impl Message for ConnectionEstablished {
    const NAME: &'static str = "ConnectionEstablished";
    const CHANNEL: Channel = Channel::Reliable;

    fn encode(&self, w: &mut WireWriter) {
        w.put_i32(self.player_number);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            player_number: r.read_i32()?,
        })
    }
}

/// Latency probe. `sent_at_micros` is the sender's own clock; the peer
/// echoes it back untouched in a [`Pong`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    pub sent_at_micros: i64,
}

impl Message for Ping {
    const NAME: &'static str = "Ping";
    const CHANNEL: Channel = Channel::Reliable;

    fn encode(&self, w: &mut WireWriter) {
        w.put_i64(self.sent_at_micros);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            sent_at_micros: r.read_i64()?,
        })
    }
}

/// Reply to a [`Ping`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pong {
    pub sent_at_micros: i64,
}

impl Message for Pong {
    const NAME: &'static str = "Pong";
    const CHANNEL: Channel = Channel::Reliable;

    fn encode(&self, w: &mut WireWriter) {
        w.put_i64(self.sent_at_micros);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            sent_at_micros: r.read_i64()?,
        })
    }
}

/// Either direction: this connection is going away.
///
/// Also posted locally on the inbound queue when a connection starts
/// terminating, so the owner learns about it from its normal drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    pub reason: String,
}

impl Message for Disconnect {
    const NAME: &'static str = "Disconnect";
    const CHANNEL: Channel = Channel::Reliable;

    fn encode(&self, w: &mut WireWriter) {
        w.put_string(&self.reason);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            reason: r.read_string()?,
        })
    }
}

/// A chat line, also used to announce a player's name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub pnum: i32,
    pub msg: String,
}

impl Message for ChatMessage {
    const NAME: &'static str = "ChatMessage";
    const CHANNEL: Channel = Channel::Reliable;

    fn encode(&self, w: &mut WireWriter) {
        w.put_i32(self.pnum);
        w.put_string(&self.msg);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            pnum: r.read_i32()?,
            msg: r.read_string()?,
        })
    }
}

// ---------------------------------------------------------------------------
// CoreMessage
// ---------------------------------------------------------------------------

/// The core messages as one enum.
///
/// Also a complete [`Packet`] on its own, for peers that need nothing
/// beyond connection bookkeeping and chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreMessage {
    ConnectionEstablished(ConnectionEstablished),
    Ping(Ping),
    Pong(Pong),
    Disconnect(Disconnect),
    Chat(ChatMessage),
}

impl Packet for CoreMessage {
    fn message(&self) -> &dyn AnyMessage {
        match self {
            Self::ConnectionEstablished(m) => m,
            Self::Ping(m) => m,
            Self::Pong(m) => m,
            Self::Disconnect(m) => m,
            Self::Chat(m) => m,
        }
    }

    fn from_core(msg: CoreMessage) -> Self {
        msg
    }

    fn as_core(&self) -> Option<&CoreMessage> {
        Some(self)
    }
}

impl From<ConnectionEstablished> for CoreMessage {
    fn from(m: ConnectionEstablished) -> Self {
        Self::ConnectionEstablished(m)
    }
}

impl From<Ping> for CoreMessage {
    fn from(m: Ping) -> Self {
        Self::Ping(m)
    }
}

impl From<Pong> for CoreMessage {
    fn from(m: Pong) -> Self {
        Self::Pong(m)
    }
}

impl From<Disconnect> for CoreMessage {
    fn from(m: Disconnect) -> Self {
        Self::Disconnect(m)
    }
}

impl From<ChatMessage> for CoreMessage {
    fn from(m: ChatMessage) -> Self {
        Self::Chat(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<M: Message + PartialEq>(msg: &M) {
        let mut w = WireWriter::new();
        msg.encode(&mut w);
        let bytes = w.into_bytes();
        let mut r = WireReader::new(&bytes);
        let decoded = M::decode(&mut r).unwrap();
        assert_eq!(&decoded, msg);
        assert_eq!(r.remaining(), 0, "{} left bytes behind", M::NAME);
    }

    #[test]
    fn test_every_core_message_round_trips() {
        round_trip(&ConnectionEstablished { player_number: 3 });
        round_trip(&Ping { sent_at_micros: 1_234_567 });
        round_trip(&Pong { sent_at_micros: -1 });
        round_trip(&Disconnect {
            reason: "server shutting down".into(),
        });
        round_trip(&ChatMessage {
            pnum: 2,
            msg: "hi".into(),
        });
        round_trip(&ChatMessage {
            pnum: 0,
            msg: String::new(),
        });
    }

    #[test]
    fn test_chat_message_layout() {
        let mut w = WireWriter::new();
        ChatMessage {
            pnum: 2,
            msg: "hi".into(),
        }
        .encode(&mut w);
        assert_eq!(w.as_slice(), &[0, 0, 0, 2, 0, 2, 0, b'h', 0, b'i']);
    }

    #[test]
    fn test_core_messages_are_reliable() {
        let all = [
            CoreMessage::from(ConnectionEstablished { player_number: 1 }),
            CoreMessage::from(Ping { sent_at_micros: 0 }),
            CoreMessage::from(Pong { sent_at_micros: 0 }),
            CoreMessage::from(Disconnect { reason: String::new() }),
            CoreMessage::from(ChatMessage {
                pnum: 1,
                msg: String::new(),
            }),
        ];
        for msg in &all {
            assert_eq!(msg.channel(), Channel::Reliable, "{}", msg.name());
        }
    }

    #[test]
    fn test_core_message_is_its_own_core() {
        let msg = CoreMessage::Ping(Ping { sent_at_micros: 5 });
        assert_eq!(msg.as_core(), Some(&msg));
        assert_eq!(msg.name(), "Ping");
    }
}
