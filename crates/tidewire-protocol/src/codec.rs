//! Frame layout on the two transports.
//!
//! Reliable stream, a back-to-back sequence of:
//!
//! ```text
//! ┌──────────────────┬──────────────────────────┐
//! │ i32 BE type id   │ payload (no length)      │
//! └──────────────────┴──────────────────────────┘
//! ```
//!
//! The payload has no length prefix; its end is wherever the message's
//! `decode` stops reading. A negative type id is the end-of-stream
//! sentinel and is never produced by a message encoder.
//!
//! Unreliable, two datagrams per message:
//!
//! ```text
//! datagram 1: [i32 BE type id]      (exactly 4 bytes)
//! datagram 2: [payload]
//! ```
//!
//! If the payload datagram is lost the message is silently gone; that is
//! normal for this transport and not reported as an error.

use bytes::{Buf, Bytes, BytesMut};

use crate::{Catalog, MessageTypeId, Packet, ProtocolError, WireReader, WireWriter};

/// Size of the type id on both transports.
pub const TYPE_ID_LEN: usize = 4;

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encodes one reliable-stream frame.
pub fn encode_reliable<P: Packet>(
    catalog: &Catalog<P>,
    packet: &P,
) -> Result<Bytes, ProtocolError> {
    let msg = packet.message();
    let id = catalog.id_for(msg)?;
    let mut w = WireWriter::new();
    w.put_i32(id.0);
    msg.encode_fields(&mut w);
    Ok(w.into_bytes())
}

/// Encodes the end-of-stream sentinel.
pub fn encode_end_of_stream() -> Bytes {
    Bytes::copy_from_slice(&MessageTypeId::END_OF_STREAM.to_be_bytes())
}

/// Encodes one unreliable message as its (id datagram, payload datagram)
/// pair.
pub fn encode_unreliable<P: Packet>(
    catalog: &Catalog<P>,
    packet: &P,
) -> Result<(Bytes, Bytes), ProtocolError> {
    let msg = packet.message();
    let id = catalog.id_for(msg)?;
    let mut w = WireWriter::new();
    msg.encode_fields(&mut w);
    Ok((Bytes::copy_from_slice(&id.to_be_bytes()), w.into_bytes()))
}

// ---------------------------------------------------------------------------
// Stream decoding
// ---------------------------------------------------------------------------

/// One item parsed off the reliable stream.
#[derive(Debug, PartialEq)]
pub enum StreamItem<P> {
    /// A complete message.
    Frame(MessageTypeId, P),
    /// The peer's end-of-stream sentinel.
    End,
}

/// Incremental parser for the reliable stream.
///
/// Bytes are appended to [`buffer_mut`](Self::buffer_mut) by the stream
/// reader; [`next_frame`](Self::next_frame) is then called until it
/// returns `Ok(None)`.
///
/// Recovery after a bad frame: an unknown type id costs only its 4
/// bytes, and parsing resumes right after it. A corrupt payload costs
/// the id plus every byte the decoder consumed before failing.
#[derive(Debug)]
pub struct StreamDecoder {
    buf: BytesMut,
}

impl StreamDecoder {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Receive buffer for the stream reader to fill.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Bytes received but not yet parsed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Parses the next item, if a complete one is buffered.
    ///
    /// Errors are per frame: the offending bytes have already been
    /// discarded, so the caller logs and calls again.
    pub fn next_frame<P: Packet>(
        &mut self,
        catalog: &Catalog<P>,
    ) -> Result<Option<StreamItem<P>>, ProtocolError> {
        if self.buf.len() < TYPE_ID_LEN {
            return Ok(None);
        }

        let id = MessageTypeId::from_be_bytes([
            self.buf[0],
            self.buf[1],
            self.buf[2],
            self.buf[3],
        ]);
        if id.is_sentinel() {
            self.buf.advance(TYPE_ID_LEN);
            return Ok(Some(StreamItem::End));
        }

        let (result, consumed) = {
            let mut r = WireReader::new(&self.buf[TYPE_ID_LEN..]);
            let result = catalog.decode(id, &mut r);
            (result, r.position())
        };

        match result {
            Ok(packet) => {
                self.buf.advance(TYPE_ID_LEN + consumed);
                Ok(Some(StreamItem::Frame(id, packet)))
            }
            Err(ProtocolError::Incomplete) => Ok(None),
            Err(e @ ProtocolError::CorruptFrame(_)) => {
                self.buf.advance(TYPE_ID_LEN + consumed);
                Err(e)
            }
            Err(e) => {
                self.buf.advance(TYPE_ID_LEN);
                Err(e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Datagram decoding
// ---------------------------------------------------------------------------

/// Pairs id datagrams with the payload datagram that follows.
///
/// Datagrams can be lost or reordered, so pairing is best effort:
///
/// - a 4-byte datagram while nothing is pending is an id;
/// - the next datagram is that id's payload and must decode completely;
/// - if that datagram is 4 bytes and does not decode as the payload, the
///   payload was lost and the datagram is taken as the next id.
#[derive(Debug, Default)]
pub struct DatagramDecoder {
    pending: Option<MessageTypeId>,
}

impl DatagramDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Type id waiting for its payload, if any.
    pub fn pending(&self) -> Option<MessageTypeId> {
        self.pending
    }

    /// Feeds one datagram. Returns a packet once a pair completes.
    pub fn push<P: Packet>(
        &mut self,
        catalog: &Catalog<P>,
        datagram: &[u8],
    ) -> Result<Option<P>, ProtocolError> {
        let Some(id) = self.pending.take() else {
            self.pending = Some(read_type_id(datagram)?);
            return Ok(None);
        };

        match decode_payload(catalog, id, datagram) {
            Ok(packet) => Ok(Some(packet)),
            Err(ProtocolError::UnknownMessageType(id)) => {
                Err(ProtocolError::UnknownMessageType(id))
            }
            Err(_) if datagram.len() == TYPE_ID_LEN => {
                self.pending = Some(read_type_id(datagram)?);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

fn read_type_id(datagram: &[u8]) -> Result<MessageTypeId, ProtocolError> {
    let bytes: [u8; TYPE_ID_LEN] = datagram.try_into().map_err(|_| {
        ProtocolError::CorruptFrame(format!(
            "expected a {TYPE_ID_LEN}-byte type id datagram, got {} bytes",
            datagram.len()
        ))
    })?;
    let id = MessageTypeId::from_be_bytes(bytes);
    if id.is_sentinel() {
        return Err(ProtocolError::CorruptFrame(format!(
            "reserved type id {id} on the datagram channel"
        )));
    }
    Ok(id)
}

fn decode_payload<P: Packet>(
    catalog: &Catalog<P>,
    id: MessageTypeId,
    datagram: &[u8],
) -> Result<P, ProtocolError> {
    let mut r = WireReader::new(datagram);
    let packet = catalog.decode(id, &mut r).map_err(|e| match e {
        ProtocolError::Incomplete => {
            ProtocolError::CorruptFrame(format!("truncated payload for {id}"))
        }
        other => other,
    })?;
    if r.remaining() > 0 {
        return Err(ProtocolError::CorruptFrame(format!(
            "{} trailing bytes after payload for {id}",
            r.remaining()
        )));
    }
    Ok(packet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChatMessage, CoreMessage, Disconnect, Ping};

    fn core_catalog() -> Catalog<CoreMessage> {
        let mut builder = Catalog::builder();
        builder.register_core();
        builder.build()
    }

    fn chat(pnum: i32, msg: &str) -> CoreMessage {
        CoreMessage::Chat(ChatMessage {
            pnum,
            msg: msg.into(),
        })
    }

    #[test]
    fn test_reliable_frame_layout() {
        let catalog = core_catalog();
        let frame = encode_reliable(&catalog, &chat(2, "hi")).unwrap();
        // ChatMessage is id 4.
        assert_eq!(
            &frame[..],
            &[0, 0, 0, 4, 0, 0, 0, 2, 0, 2, 0, b'h', 0, b'i']
        );
    }

    #[test]
    fn test_end_of_stream_is_minus_one() {
        assert_eq!(&encode_end_of_stream()[..], &[0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn test_unreliable_encoding_is_two_datagrams() {
        let catalog = core_catalog();
        let (id, payload) = encode_unreliable(
            &catalog,
            &CoreMessage::Ping(Ping { sent_at_micros: 1 }),
        )
        .unwrap();
        assert_eq!(&id[..], &[0, 0, 0, 1]);
        assert_eq!(&payload[..], &[0, 0, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_stream_decoder_waits_for_complete_frame() {
        let catalog = core_catalog();
        let frame = encode_reliable(&catalog, &chat(1, "hello")).unwrap();

        let mut decoder = StreamDecoder::with_capacity(64);
        decoder.buffer_mut().extend_from_slice(&frame[..frame.len() - 1]);
        assert_eq!(decoder.next_frame(&catalog), Ok(None));

        decoder.buffer_mut().extend_from_slice(&frame[frame.len() - 1..]);
        assert_eq!(
            decoder.next_frame(&catalog),
            Ok(Some(StreamItem::Frame(MessageTypeId(4), chat(1, "hello"))))
        );
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_stream_decoder_parses_back_to_back_frames_in_order() {
        let catalog = core_catalog();
        let mut decoder = StreamDecoder::with_capacity(64);
        for (i, text) in ["a", "b", "c"].iter().enumerate() {
            let frame = encode_reliable(&catalog, &chat(i as i32, text)).unwrap();
            decoder.buffer_mut().extend_from_slice(&frame);
        }

        let mut got = Vec::new();
        while let Some(StreamItem::Frame(_, p)) =
            decoder.next_frame(&catalog).unwrap()
        {
            got.push(p);
        }
        assert_eq!(got, vec![chat(0, "a"), chat(1, "b"), chat(2, "c")]);
    }

    #[test]
    fn test_stream_decoder_skips_unknown_id_and_continues() {
        let catalog = core_catalog();
        let mut decoder = StreamDecoder::with_capacity(64);
        decoder.buffer_mut().extend_from_slice(&[0, 0, 0, 99]);
        let frame = encode_reliable(&catalog, &chat(2, "hi")).unwrap();
        decoder.buffer_mut().extend_from_slice(&frame);

        assert_eq!(
            decoder.next_frame(&catalog),
            Err(ProtocolError::UnknownMessageType(MessageTypeId(99)))
        );
        assert_eq!(
            decoder.next_frame(&catalog),
            Ok(Some(StreamItem::Frame(MessageTypeId(4), chat(2, "hi"))))
        );
    }

    #[test]
    fn test_stream_decoder_drops_corrupt_frame_and_continues() {
        let catalog = core_catalog();
        let mut decoder = StreamDecoder::with_capacity(64);
        // Disconnect (id 3) with a negative string length.
        decoder.buffer_mut().extend_from_slice(&[0, 0, 0, 3, 0xff, 0xff]);
        let frame = encode_reliable(
            &catalog,
            &CoreMessage::Disconnect(Disconnect { reason: "bye".into() }),
        )
        .unwrap();
        decoder.buffer_mut().extend_from_slice(&frame);

        assert!(matches!(
            decoder.next_frame(&catalog),
            Err(ProtocolError::CorruptFrame(_))
        ));
        assert_eq!(
            decoder.next_frame(&catalog),
            Ok(Some(StreamItem::Frame(
                MessageTypeId(3),
                CoreMessage::Disconnect(Disconnect { reason: "bye".into() })
            )))
        );
    }

    #[test]
    fn test_stream_decoder_reports_end_sentinel() {
        let catalog = core_catalog();
        let mut decoder = StreamDecoder::with_capacity(8);
        decoder.buffer_mut().extend_from_slice(&encode_end_of_stream());
        assert_eq!(decoder.next_frame(&catalog), Ok(Some(StreamItem::End)));
    }

    #[test]
    fn test_datagram_pair_decodes() {
        let catalog = core_catalog();
        let packet = CoreMessage::Ping(Ping { sent_at_micros: 9 });
        let (id, payload) = encode_unreliable(&catalog, &packet).unwrap();

        let mut decoder = DatagramDecoder::new();
        assert_eq!(decoder.push(&catalog, &id), Ok(None));
        assert_eq!(decoder.pending(), Some(MessageTypeId(1)));
        assert_eq!(decoder.push(&catalog, &payload), Ok(Some(packet)));
        assert_eq!(decoder.pending(), None);
    }

    #[test]
    fn test_lost_payload_resynchronises_on_next_id() {
        let catalog = core_catalog();
        let first = chat(1, "lost");
        let second = chat(2, "kept");
        let (id1, _lost) = encode_unreliable(&catalog, &first).unwrap();
        let (id2, payload2) = encode_unreliable(&catalog, &second).unwrap();

        let mut decoder = DatagramDecoder::new();
        assert_eq!(decoder.push(&catalog, &id1), Ok(None));
        // Payload of the first message never arrives.
        assert_eq!(decoder.push(&catalog, &id2), Ok(None));
        assert_eq!(decoder.push(&catalog, &payload2), Ok(Some(second)));
    }

    #[test]
    fn test_payload_without_id_is_corrupt() {
        let catalog = core_catalog();
        let (_id, payload) =
            encode_unreliable(&catalog, &chat(1, "orphan")).unwrap();

        let mut decoder = DatagramDecoder::new();
        assert!(matches!(
            decoder.push(&catalog, &payload),
            Err(ProtocolError::CorruptFrame(_))
        ));
        assert_eq!(decoder.pending(), None);
    }

    #[test]
    fn test_unknown_datagram_id_consumes_its_payload() {
        let catalog = core_catalog();
        let mut decoder = DatagramDecoder::new();
        assert_eq!(decoder.push(&catalog, &[0, 0, 0, 99]), Ok(None));
        assert_eq!(
            decoder.push(&catalog, &[1, 2, 3, 4]),
            Err(ProtocolError::UnknownMessageType(MessageTypeId(99)))
        );
        assert_eq!(decoder.pending(), None);
    }

    #[test]
    fn test_unregistered_outbound_message_fails_to_encode() {
        let catalog = Catalog::<CoreMessage>::builder().build();
        let err = encode_reliable(&catalog, &chat(1, "x")).unwrap_err();
        assert_eq!(err, ProtocolError::UnregisteredMessage("ChatMessage"));
    }
}
