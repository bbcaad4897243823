//! Shared codec plumbing: the error type and a bounds-checked byte reader.

use bytes::Buf;
use std::io;
use thiserror::Error;

/// Codec errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Input ended in the middle of `field`; more bytes may complete it
    #[error("Incomplete message: input ends inside {field}")]
    Incomplete { field: String },

    #[error("Malformed message: {field}: {reason}")]
    Malformed { field: String, reason: String },

    #[error("Unsupported HTTP method: {0} (only POST is allowed)")]
    UnsupportedMethod(String),

    #[error("HTTP error {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Message too large: {0} bytes (max: {1})")]
    MessageTooLarge(usize, usize),

    #[error("IO error: {0}")]
    Transport(#[from] io::Error),

    #[error("Connection closed")]
    Closed,
}

impl ProtocolError {
    pub fn malformed(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ProtocolError::Malformed {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Truncated or invalid wire input
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            ProtocolError::Incomplete { .. } | ProtocolError::Malformed { .. }
        )
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Big-endian reader over a borrowed buffer.
///
/// Every read checks `remaining()` first and reports a shortfall as
/// [`ProtocolError::Incomplete`] naming the field being read, so callers can
/// tell "wait for more bytes" apart from corrupt input.
pub struct WireReader<'a> {
    buf: &'a [u8],
    len: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            len: buf.len(),
        }
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.len - self.buf.remaining()
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, n: usize, field: &str) -> ProtocolResult<()> {
        if self.buf.remaining() < n {
            return Err(ProtocolError::Incomplete {
                field: field.to_string(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self, field: &str) -> ProtocolResult<u8> {
        self.need(1, field)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_bool(&mut self, field: &str) -> ProtocolResult<bool> {
        Ok(self.read_u8(field)? != 0)
    }

    pub fn read_i32(&mut self, field: &str) -> ProtocolResult<i32> {
        self.need(4, field)?;
        Ok(self.buf.get_i32())
    }

    pub fn read_i64(&mut self, field: &str) -> ProtocolResult<i64> {
        self.need(8, field)?;
        Ok(self.buf.get_i64())
    }

    pub fn read_f64(&mut self, field: &str) -> ProtocolResult<f64> {
        self.need(8, field)?;
        Ok(self.buf.get_f64())
    }

    /// Read an `i32` length that must not be negative
    pub fn read_len(&mut self, field: &str) -> ProtocolResult<usize> {
        let len = self.read_i32(field)?;
        usize::try_from(len)
            .map_err(|_| ProtocolError::malformed(field, format!("negative length {len}")))
    }

    pub fn read_slice(&mut self, n: usize, field: &str) -> ProtocolResult<&'a [u8]> {
        self.need(n, field)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_big_endian() {
        let bytes = [0x00, 0x00, 0x01, 0x02, 0xFF];
        let mut reader = WireReader::new(&bytes);
        assert_eq!(reader.read_i32("n").unwrap(), 258);
        assert_eq!(reader.read_u8("b").unwrap(), 0xFF);
        assert_eq!(reader.position(), 5);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_shortfall_names_field() {
        let bytes = [0x00, 0x01];
        let mut reader = WireReader::new(&bytes);
        match reader.read_i64("message id") {
            Err(ProtocolError::Incomplete { field }) => assert_eq!(field, "message id"),
            other => panic!("unexpected {other:?}"),
        }
        // a failed read consumes nothing
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn test_negative_length_is_malformed() {
        let bytes = (-1i32).to_be_bytes();
        let mut reader = WireReader::new(&bytes);
        let err = reader.read_len("string length").unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { .. }));
        assert!(err.is_malformed());
    }
}
