//! Typed payload encoding
//!
//! All numbers are little-endian. Strings carry a 7-bit variable-length byte
//! count followed by UTF-8 bytes, which is the layout the desktop client
//! produces for its start commands.

use thiserror::Error;

/// Payload decoding errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PayloadError {
    #[error("payload truncated: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("invalid length field: {0}")]
    InvalidLength(i64),

    #[error("unexpected payload length {actual} for {what} (expected {expected})")]
    UnexpectedLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("rows {start}..{start}+{count} do not fit a {size}x{size} system")]
    RowsOutOfRange {
        start: usize,
        count: usize,
        size: usize,
    },
}

/// Builder for outbound payloads
#[derive(Debug, Default)]
pub struct PayloadWriter {
    buf: Vec<u8>,
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { buf: Vec::with_capacity(capacity) }
    }

    pub fn put_u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn put_bool(&mut self, v: bool) -> &mut Self {
        self.put_u8(v as u8)
    }

    pub fn put_i32(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn put_i64(&mut self, v: i64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn put_f64(&mut self, v: f64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn put_f64_slice(&mut self, values: &[f64]) -> &mut Self {
        self.buf.reserve(values.len() * 8);
        for v in values {
            self.buf.extend_from_slice(&v.to_le_bytes());
        }
        self
    }

    /// Length-prefixed string (7-bit encoded byte count)
    pub fn put_str(&mut self, s: &str) -> &mut Self {
        let mut len = s.len();
        while len >= 0x80 {
            self.buf.push((len as u8 & 0x7F) | 0x80);
            len >>= 7;
        }
        self.buf.push(len as u8);
        self.buf.extend_from_slice(s.as_bytes());
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over an inbound payload
#[derive(Debug)]
pub struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], PayloadError> {
        if self.remaining() < n {
            return Err(PayloadError::Truncated {
                offset: self.pos,
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], PayloadError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn get_u8(&mut self) -> Result<u8, PayloadError> {
        Ok(self.take(1)?[0])
    }

    pub fn get_bool(&mut self) -> Result<bool, PayloadError> {
        Ok(self.get_u8()? != 0)
    }

    pub fn get_i32(&mut self) -> Result<i32, PayloadError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn get_i64(&mut self) -> Result<i64, PayloadError> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn get_f64(&mut self) -> Result<f64, PayloadError> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    /// Read `count` consecutive f64 values
    pub fn get_f64_vec(&mut self, count: usize) -> Result<Vec<f64>, PayloadError> {
        let needed = count.checked_mul(8).ok_or(PayloadError::InvalidLength(count as i64))?;
        let bytes = self.take(needed)?;
        Ok(bytes
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect())
    }

    /// Read every remaining byte as f64 values
    pub fn get_f64_rest(&mut self) -> Result<Vec<f64>, PayloadError> {
        let rem = self.remaining();
        if rem % 8 != 0 {
            return Err(PayloadError::Truncated {
                offset: self.pos + rem - rem % 8,
                needed: 8,
                available: rem % 8,
            });
        }
        self.get_f64_vec(rem / 8)
    }

    pub fn get_str(&mut self) -> Result<String, PayloadError> {
        let mut len: usize = 0;
        let mut shift = 0;
        loop {
            let byte = self.get_u8()?;
            len |= ((byte & 0x7F) as usize) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
            // Five groups cover a full i32 byte count
            if shift > 28 {
                return Err(PayloadError::InvalidLength(len as i64));
            }
        }
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| PayloadError::InvalidUtf8)
    }

    /// Consume the rest of the payload as UTF-8 text
    pub fn get_text_rest(&mut self) -> Result<String, PayloadError> {
        let bytes = self.take(self.remaining())?;
        String::from_utf8(bytes.to_vec()).map_err(|_| PayloadError::InvalidUtf8)
    }
}

/// Read a non-negative i32 as a count
pub(crate) fn get_count(reader: &mut PayloadReader<'_>) -> Result<usize, PayloadError> {
    let v = reader.get_i32()?;
    if v < 0 {
        return Err(PayloadError::InvalidLength(v as i64));
    }
    Ok(v as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars() {
        let mut w = PayloadWriter::new();
        w.put_bool(true).put_i32(-7).put_i64(1 << 40).put_f64(2.5).put_u8(3);
        let bytes = w.finish();
        assert_eq!(bytes.len(), 1 + 4 + 8 + 8 + 1);

        let mut r = PayloadReader::new(&bytes);
        assert!(r.get_bool().unwrap());
        assert_eq!(r.get_i32().unwrap(), -7);
        assert_eq!(r.get_i64().unwrap(), 1 << 40);
        assert_eq!(r.get_f64().unwrap(), 2.5);
        assert_eq!(r.get_u8().unwrap(), 3);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_short_string_prefix() {
        let mut w = PayloadWriter::new();
        w.put_str("A.txt");
        assert_eq!(w.finish(), vec![5, b'A', b'.', b't', b'x', b't']);
    }

    #[test]
    fn test_long_string_prefix() {
        let s = "x".repeat(300);
        let mut w = PayloadWriter::new();
        w.put_str(&s);
        let bytes = w.finish();
        // 300 = 0b10_0101100 -> 0xAC 0x02
        assert_eq!(&bytes[..2], &[0xAC, 0x02]);

        let mut r = PayloadReader::new(&bytes);
        assert_eq!(r.get_str().unwrap(), s);
    }

    #[test]
    fn test_utf8_string() {
        let mut w = PayloadWriter::new();
        w.put_str("матрица.txt");
        let bytes = w.finish();
        let mut r = PayloadReader::new(&bytes);
        assert_eq!(r.get_str().unwrap(), "матрица.txt");
    }

    #[test]
    fn test_truncated() {
        let bytes = [1u8, 2, 3];
        let mut r = PayloadReader::new(&bytes);
        match r.get_i32() {
            Err(PayloadError::Truncated { needed, available, .. }) => {
                assert_eq!(needed, 4);
                assert_eq!(available, 3);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_f64_rest_requires_whole_values() {
        let mut w = PayloadWriter::new();
        w.put_f64_slice(&[1.0, 2.0]);
        let mut bytes = w.finish();
        let mut r = PayloadReader::new(&bytes);
        assert_eq!(r.get_f64_rest().unwrap(), vec![1.0, 2.0]);

        bytes.push(0);
        let mut r = PayloadReader::new(&bytes);
        assert!(r.get_f64_rest().is_err());
    }

    #[test]
    fn test_negative_count() {
        let mut w = PayloadWriter::new();
        w.put_i32(-1);
        let bytes = w.finish();
        let mut r = PayloadReader::new(&bytes);
        assert_eq!(get_count(&mut r), Err(PayloadError::InvalidLength(-1)));
    }
}
