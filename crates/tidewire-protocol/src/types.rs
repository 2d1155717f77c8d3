//! Identity and delivery types shared by every frame.

use std::fmt;

// ---------------------------------------------------------------------------
// MessageTypeId
// ---------------------------------------------------------------------------

/// Wire identifier of a message type.
///
/// Assigned by the catalog at registration, in call order starting at 0.
/// Ids are only meaningful within one build of the message catalog: both
/// peers must register the same types in the same order.
///
/// Negative values never name a message. On the reliable stream
/// [`MessageTypeId::END_OF_STREAM`] marks "no more frames".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageTypeId(pub i32);

impl MessageTypeId {
    /// Sentinel written once by a stream writer that is closing.
    pub const END_OF_STREAM: Self = Self(-1);

    /// Returns `true` for ids in the reserved (negative) range.
    pub fn is_sentinel(self) -> bool {
        self.0 < 0
    }

    /// Big-endian wire form.
    pub fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// Parses the big-endian wire form.
    pub fn from_be_bytes(bytes: [u8; 4]) -> Self {
        Self(i32::from_be_bytes(bytes))
    }
}

impl fmt::Display for MessageTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Which physical transport a message type travels over.
///
/// Reliable messages arrive exactly once and in send order relative to
/// other reliable messages on the same connection. Unreliable messages
/// may be lost, duplicated, or reordered, so they should carry state
/// where only the latest value matters (positions, animation frames).
/// Nothing orders a reliable message against an unreliable one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Channel {
    /// TCP stream.
    #[default]
    Reliable,
    /// UDP datagrams.
    Unreliable,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reliable => write!(f, "reliable"),
            Self::Unreliable => write!(f, "unreliable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_id_wire_form_is_big_endian() {
        assert_eq!(MessageTypeId(99).to_be_bytes(), [0, 0, 0, 99]);
        assert_eq!(MessageTypeId(0x0102_0304).to_be_bytes(), [1, 2, 3, 4]);
        assert_eq!(
            MessageTypeId::from_be_bytes([0xff, 0xff, 0xff, 0xff]),
            MessageTypeId::END_OF_STREAM
        );
    }

    #[test]
    fn test_only_negative_ids_are_sentinels() {
        assert!(MessageTypeId::END_OF_STREAM.is_sentinel());
        assert!(MessageTypeId(i32::MIN).is_sentinel());
        assert!(!MessageTypeId(0).is_sentinel());
    }

    #[test]
    fn test_channel_default_is_reliable() {
        assert_eq!(Channel::default(), Channel::Reliable);
    }

    #[test]
    fn test_display() {
        assert_eq!(MessageTypeId(4).to_string(), "#4");
        assert_eq!(Channel::Unreliable.to_string(), "unreliable");
    }
}
