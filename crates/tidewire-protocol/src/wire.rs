//! Field-level cursor for message payloads.
//!
//! Every multi-byte value is big-endian. Variable-length fields carry a
//! signed 16-bit length prefix:
//!
//! ```text
//! string:  [i16 length][length × u16 UTF-16 code unit]
//! bytes:   [i16 length][length × u8]
//! ```
//!
//! A negative length on read is a [`ProtocolError::CorruptFrame`]. Writers
//! truncate anything longer than `i16::MAX` units, so they never produce
//! one.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::ProtocolError;

/// Longest string (in UTF-16 code units) or byte array a length prefix
/// can describe.
pub const MAX_FIELD_LEN: usize = i16::MAX as usize;

// ---------------------------------------------------------------------------
// WireWriter
// ---------------------------------------------------------------------------

/// Append-only payload writer.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continues writing after whatever `buf` already holds.
    pub fn with_buffer(buf: BytesMut) -> Self {
        Self { buf }
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn put_bool(&mut self, v: bool) {
        self.buf.put_u8(u8::from(v));
    }

    pub fn put_i16(&mut self, v: i16) {
        self.buf.put_i16(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    pub fn put_i32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    pub fn put_i64(&mut self, v: i64) {
        self.buf.put_i64(v);
    }

    pub fn put_f32(&mut self, v: f32) {
        self.buf.put_f32(v);
    }

    pub fn put_f64(&mut self, v: f64) {
        self.buf.put_f64(v);
    }

    /// Writes a length-prefixed UTF-16 string.
    pub fn put_string(&mut self, s: &str) {
        let mut units: Vec<u16> = s.encode_utf16().collect();
        if units.len() > MAX_FIELD_LEN {
            units.truncate(MAX_FIELD_LEN);
            // Never leave half of a surrogate pair behind.
            if units.last().is_some_and(|u| (0xD800..0xDC00).contains(u)) {
                units.pop();
            }
        }
        self.buf.put_i16(units.len() as i16);
        for unit in units {
            self.buf.put_u16(unit);
        }
    }

    /// Writes a length-prefixed byte array.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        let bytes = &bytes[..bytes.len().min(MAX_FIELD_LEN)];
        self.buf.put_i16(bytes.len() as i16);
        self.buf.put_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> BytesMut {
        self.buf
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

// ---------------------------------------------------------------------------
// WireReader
// ---------------------------------------------------------------------------

/// Read cursor over a borrowed payload.
///
/// Running off the end yields [`ProtocolError::Incomplete`]; on the
/// stream that means "wait for more bytes".
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < n {
            return Err(ProtocolError::Incomplete);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?.get_u8())
    }

    /// Any non-zero byte reads as `true`.
    pub fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_i16(&mut self) -> Result<i16, ProtocolError> {
        Ok(self.take(2)?.get_i16())
    }

    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        Ok(self.take(2)?.get_u16())
    }

    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(self.take(4)?.get_i32())
    }

    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(self.take(4)?.get_u32())
    }

    pub fn read_i64(&mut self) -> Result<i64, ProtocolError> {
        Ok(self.take(8)?.get_i64())
    }

    pub fn read_f32(&mut self) -> Result<f32, ProtocolError> {
        Ok(self.take(4)?.get_f32())
    }

    pub fn read_f64(&mut self) -> Result<f64, ProtocolError> {
        Ok(self.take(8)?.get_f64())
    }

    fn read_len(&mut self) -> Result<usize, ProtocolError> {
        let len = self.read_i16()?;
        usize::try_from(len).map_err(|_| {
            ProtocolError::CorruptFrame(format!("negative field length {len}"))
        })
    }

    /// Reads a length-prefixed UTF-16 string.
    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        let len = self.read_len()?;
        let mut raw = self.take(len * 2)?;
        let units: Vec<u16> = (0..len).map(|_| raw.get_u16()).collect();
        String::from_utf16(&units).map_err(|e| {
            ProtocolError::CorruptFrame(format!("invalid UTF-16 string: {e}"))
        })
    }

    /// Reads a length-prefixed byte array.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let len = self.read_len()?;
        Ok(self.take(len)?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_layout_is_length_then_utf16_units() {
        let mut w = WireWriter::new();
        w.put_string("hi");
        assert_eq!(w.as_slice(), &[0, 2, 0, b'h', 0, b'i']);
    }

    #[test]
    fn test_string_outside_bmp_uses_surrogate_pair() {
        let mut w = WireWriter::new();
        w.put_string("🎮");
        // One char, two UTF-16 code units.
        assert_eq!(&w.as_slice()[..2], &[0, 2]);

        let bytes = w.into_bytes();
        let mut r = WireReader::new(&bytes);
        assert_eq!(r.read_string().unwrap(), "🎮");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_byte_array_layout() {
        let mut w = WireWriter::new();
        w.put_bytes(&[9, 8, 7]);
        assert_eq!(w.as_slice(), &[0, 3, 9, 8, 7]);
    }

    #[test]
    fn test_negative_string_length_is_corrupt() {
        let data = [0xff, 0xfe, 0, 0];
        let err = WireReader::new(&data).read_string().unwrap_err();
        assert!(matches!(err, ProtocolError::CorruptFrame(_)));
    }

    #[test]
    fn test_negative_byte_array_length_is_corrupt() {
        let data = [0x80, 0x00];
        let err = WireReader::new(&data).read_bytes().unwrap_err();
        assert!(matches!(err, ProtocolError::CorruptFrame(_)));
    }

    #[test]
    fn test_unpaired_surrogate_is_corrupt() {
        let data = [0, 1, 0xd8, 0x00];
        let err = WireReader::new(&data).read_string().unwrap_err();
        assert!(matches!(err, ProtocolError::CorruptFrame(_)));
    }

    #[test]
    fn test_short_buffer_is_incomplete_and_consumes_nothing_useful() {
        let data = [0, 3, 0, b'a'];
        let mut r = WireReader::new(&data);
        assert_eq!(r.read_string(), Err(ProtocolError::Incomplete));

        let mut r = WireReader::new(&[0, 0, 1]);
        assert_eq!(r.read_i32(), Err(ProtocolError::Incomplete));
        assert_eq!(r.position(), 0);
    }

    #[test]
    fn test_overlong_string_is_truncated_to_max_len() {
        let long = "x".repeat(MAX_FIELD_LEN + 10);
        let mut w = WireWriter::new();
        w.put_string(&long);
        assert_eq!(w.len(), 2 + MAX_FIELD_LEN * 2);

        let bytes = w.into_bytes();
        let s = WireReader::new(&bytes).read_string().unwrap();
        assert_eq!(s.len(), MAX_FIELD_LEN);
    }

    #[test]
    fn test_truncation_does_not_split_surrogate_pair() {
        // An odd cut point lands between the halves of the last pair.
        let long = "🎮".repeat(MAX_FIELD_LEN / 2 + 1);
        let mut w = WireWriter::new();
        w.put_string(&long);

        let bytes = w.into_bytes();
        let s = WireReader::new(&bytes).read_string().unwrap();
        assert_eq!(s.encode_utf16().count(), MAX_FIELD_LEN - 1);
    }

    #[test]
    fn test_mixed_fields_read_back_in_order() {
        let mut w = WireWriter::new();
        w.put_i32(-5);
        w.put_bool(true);
        w.put_f32(1.5);
        w.put_i64(1 << 40);
        w.put_u16(65_000);

        let bytes = w.into_bytes();
        let mut r = WireReader::new(&bytes);
        assert_eq!(r.read_i32().unwrap(), -5);
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_f32().unwrap(), 1.5);
        assert_eq!(r.read_i64().unwrap(), 1 << 40);
        assert_eq!(r.read_u16().unwrap(), 65_000);
        assert_eq!(r.remaining(), 0);
    }
}
