//! Primitive encoders and decoders for packet payloads
//!
//! Lengths and counts use length-encoded integers:
//! - `< 251`: one byte
//! - `0xfc` + 2 bytes, `0xfd` + 3 bytes, `0xfe` + 8 bytes (little-endian)
//!
//! Byte blocks and strings are a length-encoded integer followed by the data.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::{ProtocolError, ProtocolResult};
use crate::executor::Datum;

// Datum type tags
const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_BYTES: u8 = 5;
const TAG_TIMESTAMP: u8 = 6;

/// Growable output buffer for one packet payload
#[derive(Debug, Default)]
pub struct NetOutput {
    buf: BytesMut,
}

impl NetOutput {
    /// Create an empty output buffer
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.write_u8(value as u8)
    }

    pub fn write_i64(&mut self, value: i64) -> &mut Self {
        self.buf.put_i64_le(value);
        self
    }

    /// Write a length-encoded integer
    pub fn write_var_int(&mut self, value: u64) -> &mut Self {
        if value < 251 {
            self.buf.put_u8(value as u8);
        } else if value < 65_536 {
            self.buf.put_u8(0xfc);
            self.buf.put_u16_le(value as u16);
        } else if value < 16_777_216 {
            let bytes = (value as u32).to_le_bytes();
            self.buf.put_slice(&[0xfd, bytes[0], bytes[1], bytes[2]]);
        } else {
            self.buf.put_u8(0xfe);
            self.buf.put_u64_le(value);
        }
        self
    }

    /// Write a length-prefixed block of bytes
    pub fn write_bytes(&mut self, data: &[u8]) -> &mut Self {
        self.write_var_int(data.len() as u64);
        self.buf.put_slice(data);
        self
    }

    /// Write a length-prefixed UTF-8 string
    pub fn write_string(&mut self, s: &str) -> &mut Self {
        self.write_bytes(s.as_bytes())
    }

    /// Write a tagged datum
    pub fn write_datum(&mut self, datum: &Datum) -> &mut Self {
        match datum {
            Datum::Null => self.write_u8(TAG_NULL),
            Datum::Bool(b) => self.write_u8(TAG_BOOL).write_bool(*b),
            Datum::Int(i) => self.write_u8(TAG_INT).write_i64(*i),
            Datum::Float(f) => {
                self.write_u8(TAG_FLOAT);
                self.buf.put_f64_le(*f);
                self
            }
            Datum::String(s) => self.write_u8(TAG_STRING).write_string(s),
            Datum::Bytes(b) => self.write_u8(TAG_BYTES).write_bytes(b),
            Datum::Timestamp(t) => self.write_u8(TAG_TIMESTAMP).write_i64(*t),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Finish writing and take the payload
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Cursor over one packet payload
#[derive(Debug)]
pub struct NetInput {
    buf: Bytes,
}

impl NetInput {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Fail if any payload bytes were left unread
    pub fn expect_end(&self) -> ProtocolResult<()> {
        if self.buf.has_remaining() {
            return Err(ProtocolError::InvalidPacket(format!(
                "{} trailing bytes",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    fn need(&self, n: usize, what: &str) -> ProtocolResult<()> {
        if self.buf.remaining() < n {
            return Err(ProtocolError::InvalidPacket(format!("truncated {}", what)));
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> ProtocolResult<u8> {
        self.need(1, "u8")?;
        Ok(self.buf.get_u8())
    }

    pub fn read_bool(&mut self) -> ProtocolResult<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            b => Err(ProtocolError::InvalidPacket(format!("invalid bool {}", b))),
        }
    }

    pub fn read_i64(&mut self) -> ProtocolResult<i64> {
        self.need(8, "i64")?;
        Ok(self.buf.get_i64_le())
    }

    /// Read a length-encoded integer
    pub fn read_var_int(&mut self) -> ProtocolResult<u64> {
        match self.read_u8()? {
            b @ 0..=250 => Ok(b as u64),
            0xfc => {
                self.need(2, "2-byte int")?;
                Ok(self.buf.get_u16_le() as u64)
            }
            0xfd => {
                self.need(3, "3-byte int")?;
                let mut bytes = [0u8; 4];
                self.buf.copy_to_slice(&mut bytes[..3]);
                Ok(u32::from_le_bytes(bytes) as u64)
            }
            0xfe => {
                self.need(8, "8-byte int")?;
                Ok(self.buf.get_u64_le())
            }
            b => Err(ProtocolError::InvalidPacket(format!(
                "unexpected {:#x} in length-encoded int",
                b
            ))),
        }
    }

    /// Read a length-encoded count or length, bounded by the bytes left
    pub fn read_len(&mut self) -> ProtocolResult<usize> {
        let len = self.read_var_int()?;
        if len > self.buf.remaining() as u64 {
            return Err(ProtocolError::InvalidPacket(format!(
                "length {} exceeds remaining {} bytes",
                len,
                self.buf.remaining()
            )));
        }
        Ok(len as usize)
    }

    /// Read a length-prefixed block without copying
    pub fn read_bytes(&mut self) -> ProtocolResult<Bytes> {
        let len = self.read_len()?;
        Ok(self.buf.split_to(len))
    }

    /// Read a length-prefixed UTF-8 string
    pub fn read_string(&mut self) -> ProtocolResult<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| ProtocolError::InvalidPacket("invalid UTF-8 in string".to_string()))
    }

    /// Read a tagged datum
    pub fn read_datum(&mut self) -> ProtocolResult<Datum> {
        match self.read_u8()? {
            TAG_NULL => Ok(Datum::Null),
            TAG_BOOL => Ok(Datum::Bool(self.read_bool()?)),
            TAG_INT => Ok(Datum::Int(self.read_i64()?)),
            TAG_FLOAT => {
                self.need(8, "f64")?;
                Ok(Datum::Float(self.buf.get_f64_le()))
            }
            TAG_STRING => Ok(Datum::String(self.read_string()?)),
            TAG_BYTES => Ok(Datum::Bytes(self.read_bytes()?.to_vec())),
            TAG_TIMESTAMP => Ok(Datum::Timestamp(self.read_i64()?)),
            tag => Err(ProtocolError::InvalidPacket(format!(
                "unknown datum tag {}",
                tag
            ))),
        }
    }
}
