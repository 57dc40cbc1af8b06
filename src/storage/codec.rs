//! Fixed-width record codec
//!
//! Every table record is a fixed-size, little-endian byte layout. Strings are
//! zero-padded UTF-8 of a fixed width; a value that does not fit is rejected,
//! never truncated.

use crate::error::{BankError, BankResult};

/// A record type stored in a [`RecordStore`](super::RecordStore).
pub trait Record: Sized + Clone + Send {
    /// Table name used in logs and error messages
    const TABLE: &'static str;
    /// Encoded size in bytes (identical for every record of the table)
    const SIZE: usize;

    /// Primary key; the sequence allocator derives the next id from it
    fn id(&self) -> i64;

    /// Encode into `out`, which is exactly `SIZE` bytes
    fn encode(&self, out: &mut [u8]) -> BankResult<()>;

    /// Decode from `buf`, which is exactly `SIZE` bytes
    fn decode(buf: &[u8]) -> BankResult<Self>;
}

/// Sequential field writer over a record buffer
pub struct FieldWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> FieldWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn put(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    pub fn put_i32(&mut self, v: i32) {
        self.put(&v.to_le_bytes());
    }

    pub fn put_i64(&mut self, v: i64) {
        self.put(&v.to_le_bytes());
    }

    pub fn put_f64(&mut self, v: f64) {
        self.put(&v.to_le_bytes());
    }

    pub fn put_u8(&mut self, v: u8) {
        self.put(&[v]);
    }

    pub fn put_bool(&mut self, v: bool) {
        self.put_u8(v as u8);
    }

    /// Write `value` zero-padded to `width` bytes
    pub fn put_str(&mut self, field: &str, value: &str, width: usize) -> BankResult<()> {
        let bytes = value.as_bytes();
        if bytes.len() > width {
            return Err(BankError::InvalidInput(format!(
                "{} is too long (max {} bytes)",
                field, width
            )));
        }
        if bytes.contains(&0) {
            return Err(BankError::InvalidInput(format!(
                "{} contains a NUL byte",
                field
            )));
        }
        let field_buf = &mut self.buf[self.pos..self.pos + width];
        field_buf.fill(0);
        field_buf[..bytes.len()].copy_from_slice(bytes);
        self.pos += width;
        Ok(())
    }

    /// Bytes written so far
    pub fn position(&self) -> usize {
        self.pos
    }
}

/// Sequential field reader over a record buffer
pub struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    pub fn get_i32(&mut self) -> i32 {
        i32::from_le_bytes(self.take())
    }

    pub fn get_i64(&mut self) -> i64 {
        i64::from_le_bytes(self.take())
    }

    pub fn get_f64(&mut self) -> f64 {
        f64::from_le_bytes(self.take())
    }

    pub fn get_u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    pub fn get_bool(&mut self) -> bool {
        self.get_u8() != 0
    }

    pub fn get_str(&mut self, table: &str, width: usize) -> BankResult<String> {
        let raw = &self.buf[self.pos..self.pos + width];
        self.pos += width;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(width);
        String::from_utf8(raw[..end].to_vec()).map_err(|e| BankError::corrupt(table, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_round_trip() {
        let mut buf = [0u8; 4 + 8 + 8 + 1 + 10];
        {
            let mut w = FieldWriter::new(&mut buf);
            w.put_i32(-7);
            w.put_i64(1 << 40);
            w.put_f64(12.5);
            w.put_bool(true);
            w.put_str("name", "SB-10", 10).unwrap();
            assert_eq!(w.position(), 31);
        }

        let mut r = FieldReader::new(&buf);
        assert_eq!(r.get_i32(), -7);
        assert_eq!(r.get_i64(), 1 << 40);
        assert_eq!(r.get_f64(), 12.5);
        assert!(r.get_bool());
        assert_eq!(r.get_str("t", 10).unwrap(), "SB-10");
    }

    #[test]
    fn test_string_overflow_is_rejected() {
        let mut buf = [0u8; 4];
        let mut w = FieldWriter::new(&mut buf);
        let err = w.put_str("phone", "12345", 4).unwrap_err();
        assert!(matches!(err, BankError::InvalidInput(_)));
    }

    #[test]
    fn test_string_exact_width_has_no_terminator() {
        let mut buf = [0xFFu8; 4];
        FieldWriter::new(&mut buf).put_str("f", "abcd", 4).unwrap();
        assert_eq!(FieldReader::new(&buf).get_str("t", 4).unwrap(), "abcd");
    }

    #[test]
    fn test_shorter_string_overwrites_stale_bytes() {
        let mut buf = [0u8; 8];
        FieldWriter::new(&mut buf).put_str("f", "longname", 8).unwrap();
        FieldWriter::new(&mut buf).put_str("f", "ab", 8).unwrap();
        assert_eq!(FieldReader::new(&buf).get_str("t", 8).unwrap(), "ab");
    }
}
