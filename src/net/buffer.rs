//! Packet buffer implementation
//!
//! Provides a byte buffer with the frontend wire encodings:
//! - Fixed width little-endian integers used by the mux header
//! - LEB128 varints used for message ids, lengths and numeric fields
//! - Length-prefixed byte strings and UTF-8 strings
//!
//! Reads are checked: running off the end of the payload is a
//! [`ProtocolError`], never a silent zero.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Result of a buffer read
pub type ReadResult<T> = std::result::Result<T, ProtocolError>;

/// Packet buffer for reading and writing frontend protocol data
#[derive(Debug, Clone, Default)]
pub struct PacketBuffer {
    /// Internal byte buffer
    data: BytesMut,
    /// Current read position
    read_pos: usize,
}

impl PacketBuffer {
    /// Create a new empty packet buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a packet buffer with a specific capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            read_pos: 0,
        }
    }

    /// Create a packet buffer from existing bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: BytesMut::from(bytes),
            read_pos: 0,
        }
    }

    // ============ Properties ============

    /// Get the current read position
    #[inline]
    pub fn read_position(&self) -> usize {
        self.read_pos
    }

    /// Get the total length of the buffer
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the buffer is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the number of bytes remaining to read
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.read_pos)
    }

    /// Check if there are bytes remaining to read
    #[inline]
    pub fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }

    /// Get a reference to the underlying bytes
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Freeze the written bytes
    pub fn freeze(self) -> Bytes {
        self.data.freeze()
    }

    fn ensure(&self, needed: usize) -> ReadResult<()> {
        if self.remaining() < needed {
            return Err(ProtocolError::UnexpectedEof {
                needed,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    // ============ Reading Methods ============

    /// Read an unsigned byte
    pub fn read_ubyte(&mut self) -> ReadResult<u8> {
        self.ensure(1)?;
        let value = self.data[self.read_pos];
        self.read_pos += 1;
        Ok(value)
    }

    /// Read an unsigned little-endian short (2 bytes)
    pub fn read_ushort_le(&mut self) -> ReadResult<u16> {
        self.ensure(2)?;
        let p = self.read_pos;
        self.read_pos += 2;
        Ok(u16::from_le_bytes([self.data[p], self.data[p + 1]]))
    }

    /// Read an unsigned little-endian 24-bit integer (3 bytes)
    pub fn read_uint24_le(&mut self) -> ReadResult<u32> {
        self.ensure(3)?;
        let p = self.read_pos;
        self.read_pos += 3;
        Ok(u32::from_le_bytes([
            self.data[p],
            self.data[p + 1],
            self.data[p + 2],
            0,
        ]))
    }

    /// Read a LEB128 varint
    pub fn read_varint(&mut self) -> ReadResult<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_ubyte()?;
            if shift == 63 && byte > 1 {
                return Err(ProtocolError::VarintOverflow);
            }
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift > 63 {
                return Err(ProtocolError::VarintOverflow);
            }
        }
    }

    /// Read a varint that must fit in a u32
    pub fn read_varint_u32(&mut self, field: &'static str) -> ReadResult<u32> {
        let value = self.read_varint()?;
        u32::try_from(value).map_err(|_| ProtocolError::ValueOutOfRange { field, value })
    }

    /// Read raw bytes
    pub fn read_bytes(&mut self, length: usize) -> ReadResult<Bytes> {
        self.ensure(length)?;
        let start = self.read_pos;
        self.read_pos += length;
        Ok(Bytes::copy_from_slice(&self.data[start..start + length]))
    }

    /// Read a varint length-prefixed byte string
    pub fn read_prefixed_bytes(&mut self) -> ReadResult<Bytes> {
        let length = self.read_varint()?;
        let length = usize::try_from(length).map_err(|_| ProtocolError::ValueOutOfRange {
            field: "length",
            value: length,
        })?;
        self.read_bytes(length)
    }

    /// Read a varint length-prefixed UTF-8 string
    pub fn read_string(&mut self) -> ReadResult<String> {
        let raw = self.read_prefixed_bytes()?;
        String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidStringEncoding)
    }

    // ============ Writing Methods ============

    /// Write an unsigned byte
    pub fn write_ubyte(&mut self, value: u8) {
        self.data.put_u8(value);
    }

    /// Write an unsigned little-endian short
    pub fn write_ushort_le(&mut self, value: u16) {
        self.data.put_u16_le(value);
    }

    /// Write the low 24 bits of a value, little-endian
    pub fn write_uint24_le(&mut self, value: u32) {
        let bytes = value.to_le_bytes();
        self.data.put_slice(&bytes[..3]);
    }

    /// Write a LEB128 varint
    pub fn write_varint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.data.put_u8((value as u8 & 0x7F) | 0x80);
            value >>= 7;
        }
        self.data.put_u8(value as u8);
    }

    /// Write raw bytes
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.put_slice(bytes);
    }

    /// Write a varint length-prefixed byte string
    pub fn write_prefixed_bytes(&mut self, bytes: &[u8]) {
        self.write_varint(bytes.len() as u64);
        self.write_bytes(bytes);
    }

    /// Write a varint length-prefixed UTF-8 string
    pub fn write_string(&mut self, value: &str) {
        self.write_prefixed_bytes(value.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_width_le() {
        let mut buf = PacketBuffer::new();
        buf.write_ushort_le(0x1234);
        buf.write_uint24_le(0x00ABCDEF);
        assert_eq!(buf.as_bytes(), &[0x34, 0x12, 0xEF, 0xCD, 0xAB]);

        let mut buf = PacketBuffer::from_bytes(buf.as_bytes());
        assert_eq!(buf.read_ushort_le().unwrap(), 0x1234);
        assert_eq!(buf.read_uint24_le().unwrap(), 0xABCDEF);
        assert!(!buf.has_remaining());
    }

    #[test]
    fn test_varint_encoding() {
        let mut buf = PacketBuffer::new();
        buf.write_varint(1);
        buf.write_varint(300);
        assert_eq!(buf.as_bytes(), &[0x01, 0xAC, 0x02]);
    }

    #[test]
    fn test_varint_large_values() {
        let mut buf = PacketBuffer::new();
        buf.write_varint(1125336957151523818);
        buf.write_varint(u64::MAX);

        let mut buf = PacketBuffer::from_bytes(buf.as_bytes());
        assert_eq!(buf.read_varint().unwrap(), 1125336957151523818);
        assert_eq!(buf.read_varint().unwrap(), u64::MAX);
    }

    #[test]
    fn test_varint_overflow() {
        let mut buf = PacketBuffer::from_bytes(&[0xFF; 11]);
        assert_eq!(buf.read_varint(), Err(ProtocolError::VarintOverflow));
    }

    #[test]
    fn test_varint_u32_range() {
        let mut buf = PacketBuffer::new();
        buf.write_varint(u64::from(u32::MAX) + 1);

        let mut buf = PacketBuffer::from_bytes(buf.as_bytes());
        assert!(matches!(
            buf.read_varint_u32("server_type"),
            Err(ProtocolError::ValueOutOfRange {
                field: "server_type",
                ..
            })
        ));
    }

    #[test]
    fn test_read_past_end() {
        let mut buf = PacketBuffer::from_bytes(&[0x01]);
        assert_eq!(
            buf.read_ushort_le(),
            Err(ProtocolError::UnexpectedEof {
                needed: 2,
                remaining: 1
            })
        );

        // A truncated varint is an EOF, not a zero
        let mut buf = PacketBuffer::from_bytes(&[0x80]);
        assert!(matches!(
            buf.read_varint(),
            Err(ProtocolError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_prefixed_length_exceeds_payload() {
        let mut buf = PacketBuffer::new();
        buf.write_varint(10);
        buf.write_bytes(b"abc");

        let mut buf = PacketBuffer::from_bytes(buf.as_bytes());
        assert!(matches!(
            buf.read_prefixed_bytes(),
            Err(ProtocolError::UnexpectedEof {
                needed: 10,
                remaining: 3
            })
        ));
    }

    #[test]
    fn test_string() {
        let mut buf = PacketBuffer::new();
        buf.write_string("Hello");
        assert_eq!(buf.len(), 6);

        let mut buf = PacketBuffer::from_bytes(buf.as_bytes());
        assert_eq!(buf.read_string().unwrap(), "Hello");
    }

    #[test]
    fn test_invalid_utf8_string() {
        let mut buf = PacketBuffer::new();
        buf.write_prefixed_bytes(&[0xC3, 0x28]);

        let mut buf = PacketBuffer::from_bytes(buf.as_bytes());
        assert_eq!(buf.read_string(), Err(ProtocolError::InvalidStringEncoding));
    }
}
