//! Error types for the protocol layer.
//!
//! Everything here is recoverable at the frame level: the reader that
//! hits one of these drops the offending frame and keeps going.

use crate::MessageTypeId;

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// A frame carried a type id with no catalog entry.
    #[error("unknown message type {0}")]
    UnknownMessageType(MessageTypeId),

    /// A field could not be decoded (negative length, bad UTF-16,
    /// truncated datagram, trailing bytes).
    #[error("corrupt frame: {0}")]
    CorruptFrame(String),

    /// The buffer ends before the frame does. On the stream this means
    /// "wait for more bytes", not failure.
    #[error("frame incomplete")]
    Incomplete,

    /// An outbound message whose type was never registered.
    #[error("message type {0} is not registered")]
    UnregisteredMessage(&'static str),
}
