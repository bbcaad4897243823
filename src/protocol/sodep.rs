//! SODEP binary codec
//!
//! Wire layout (all integers and doubles big-endian):
//! - string: `i32` byte length + bytes in the configured charset
//! - byte array: `i32` length + raw bytes
//! - value: `u8` type tag + scalar payload, `i32` child count, then per child
//!   the field name, an `i32` vector length and that many values
//! - message: `i64` id, resource path, operation name, `u8` fault flag,
//!   optional fault name + fault value, then the message value

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;

use super::codec::{ProtocolError, ProtocolResult, WireReader};
use super::{CommProtocol, DEFAULT_MAX_MESSAGE_SIZE};
use crate::config::SodepConfig;
use crate::message::{CommMessage, Fault};
use crate::value::{ByteArray, Scalar, Value, ValueVector};

/// Type tags of the value scalar
pub mod tags {
    pub const UNDEFINED: u8 = 0;
    pub const STRING: u8 = 1;
    pub const INT32: u8 = 2;
    pub const DOUBLE: u8 = 3;
    pub const BYTE_ARRAY: u8 = 4;
    pub const BOOL: u8 = 5;
    pub const INT64: u8 = 6;
}

/// Deepest value nesting accepted on decode
pub const MAX_VALUE_DEPTH: usize = 256;

/// Character set used for strings on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Charset {
    #[default]
    Utf8,
    /// ISO-8859-1: one byte per character
    Latin1,
}

impl Charset {
    fn encode<'a>(self, s: &'a str) -> std::borrow::Cow<'a, [u8]> {
        match self {
            Charset::Utf8 => std::borrow::Cow::Borrowed(s.as_bytes()),
            Charset::Latin1 => std::borrow::Cow::Owned(
                s.chars()
                    .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                    .collect(),
            ),
        }
    }

    fn decode(self, bytes: &[u8], field: &str) -> ProtocolResult<String> {
        match self {
            Charset::Utf8 => String::from_utf8(bytes.to_vec())
                .map_err(|e| ProtocolError::malformed(field, format!("invalid UTF-8: {e}"))),
            Charset::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
        }
    }
}

/// One pending piece of the message layout
#[derive(Debug, Clone, Copy)]
enum Step {
    /// Exactly this many bytes
    Fixed(usize),
    /// `i32` length followed by that many bytes
    Sized,
    /// `u8` flag; when set a fault name and fault value follow
    FaultFlag,
    /// Type tag, scalar payload and children of a value at this depth
    Value(usize),
    /// `i32` child count of a value
    ChildCount(usize),
    /// Child entries still to come
    Children { remaining: usize, depth: usize },
    /// `i32` length of a child vector
    VectorLen(usize),
    /// Values still to come in the current child vector
    Vector { remaining: usize, depth: usize },
}

/// Outcome of advancing a [`FrameScan`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    /// The message occupies this many bytes
    Complete(usize),
    /// At least this many bytes are needed before the scan can move on
    Partial(usize),
    /// The layout is broken; a full decode reports how
    Invalid,
}

/// Resumable walk over the layout of one message.
///
/// The scan only looks at tags and lengths. When the buffer runs out it
/// stops in place and continues from the same byte on the next call, so a
/// message delivered in many reads is walked once instead of once per read.
#[derive(Debug, Clone)]
struct FrameScan {
    pos: usize,
    steps: Vec<Step>,
}

impl FrameScan {
    fn new() -> Self {
        Self {
            pos: 0,
            // id, resource path, operation name, fault flag, message value
            steps: vec![
                Step::Value(0),
                Step::FaultFlag,
                Step::Sized,
                Step::Sized,
                Step::Fixed(8),
            ],
        }
    }

    fn advance(&mut self, buf: &[u8]) -> Scan {
        while let Some(step) = self.steps.pop() {
            let rest = &buf[self.pos..];
            match step {
                Step::Fixed(n) => {
                    if rest.len() < n {
                        self.steps.push(step);
                        return Scan::Partial(self.pos + n);
                    }
                    self.pos += n;
                }
                Step::FaultFlag => {
                    let Some(&flag) = rest.first() else {
                        self.steps.push(step);
                        return Scan::Partial(self.pos + 1);
                    };
                    self.pos += 1;
                    if flag != 0 {
                        self.steps.push(Step::Value(0));
                        self.steps.push(Step::Sized);
                    }
                }
                Step::Value(depth) => {
                    if depth > MAX_VALUE_DEPTH {
                        return Scan::Invalid;
                    }
                    let Some(&tag) = rest.first() else {
                        self.steps.push(step);
                        return Scan::Partial(self.pos + 1);
                    };
                    let payload = match tag {
                        tags::UNDEFINED => None,
                        tags::STRING | tags::BYTE_ARRAY => Some(Step::Sized),
                        tags::INT32 => Some(Step::Fixed(4)),
                        tags::DOUBLE | tags::INT64 => Some(Step::Fixed(8)),
                        tags::BOOL => Some(Step::Fixed(1)),
                        _ => return Scan::Invalid,
                    };
                    self.pos += 1;
                    self.steps.push(Step::ChildCount(depth));
                    self.steps.extend(payload);
                }
                Step::Sized | Step::ChildCount(_) | Step::VectorLen(_) => {
                    let Some(len) = peek_len(rest) else {
                        self.steps.push(step);
                        return Scan::Partial(self.pos + 4);
                    };
                    let Ok(len) = usize::try_from(len) else {
                        return Scan::Invalid;
                    };
                    self.pos += 4;
                    self.steps.push(match step {
                        Step::ChildCount(depth) => Step::Children {
                            remaining: len,
                            depth,
                        },
                        Step::VectorLen(depth) => Step::Vector {
                            remaining: len,
                            depth,
                        },
                        _ => Step::Fixed(len),
                    });
                }
                Step::Children { remaining, depth } => {
                    if remaining > 0 {
                        self.steps.push(Step::Children {
                            remaining: remaining - 1,
                            depth,
                        });
                        self.steps.push(Step::VectorLen(depth));
                        self.steps.push(Step::Sized);
                    }
                }
                Step::Vector { remaining, depth } => {
                    if remaining > 0 {
                        self.steps.push(Step::Vector {
                            remaining: remaining - 1,
                            depth,
                        });
                        self.steps.push(Step::Value(depth + 1));
                    }
                }
            }
        }
        Scan::Complete(self.pos)
    }
}

fn peek_len(buf: &[u8]) -> Option<i32> {
    let bytes: [u8; 4] = buf.get(..4)?.try_into().ok()?;
    Some(i32::from_be_bytes(bytes))
}

/// SODEP codec.
///
/// `decode` remembers how far it got into a partial message, so it must be
/// called again with the same buffer after more bytes were appended.
#[derive(Debug, Clone)]
pub struct SodepProtocol {
    charset: Charset,
    max_message_size: usize,
    scan: Option<FrameScan>,
}

impl SodepProtocol {
    pub fn new() -> Self {
        Self {
            charset: Charset::Utf8,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            scan: None,
        }
    }

    pub fn from_config(config: &SodepConfig) -> Self {
        Self {
            charset: config.charset,
            max_message_size: config.max_message_size,
            scan: None,
        }
    }

    pub fn with_charset(mut self, charset: Charset) -> Self {
        self.charset = charset;
        self
    }

    pub fn charset(&self) -> Charset {
        self.charset
    }

    /// Encode a message into `buf`
    pub fn encode_message(&self, message: &CommMessage, buf: &mut BytesMut) {
        buf.put_i64(message.id());
        self.write_string(buf, message.resource_path());
        self.write_string(buf, message.operation_name());
        match message.fault() {
            Some(fault) => {
                buf.put_u8(1);
                self.write_string(buf, &fault.name);
                self.write_value(buf, &fault.value);
            }
            None => buf.put_u8(0),
        }
        self.write_value(buf, message.value());
    }

    /// Decode a message from the front of `reader`
    pub fn decode_message(&self, reader: &mut WireReader<'_>) -> ProtocolResult<CommMessage> {
        let id = reader.read_i64("message id")?;
        let resource_path = self.read_string(reader, "resource path")?;
        let operation_name = self.read_string(reader, "operation name")?;

        let fault = if reader.read_bool("fault flag")? {
            let name = self.read_string(reader, "fault name")?;
            let value = self.read_value(reader, 0)?;
            Some(Fault::new(name, value))
        } else {
            None
        };

        // Always consumed; dropped by the envelope when a fault is present.
        let value = self.read_value(reader, 0)?;

        Ok(CommMessage::new(id, operation_name, resource_path, value, fault))
    }

    /// Encode a bare value tree
    pub fn encode_value(&self, value: &Value, buf: &mut BytesMut) {
        self.write_value(buf, value);
    }

    /// Decode a bare value tree
    pub fn decode_value(&self, reader: &mut WireReader<'_>) -> ProtocolResult<Value> {
        self.read_value(reader, 0)
    }

    fn write_string(&self, buf: &mut BytesMut, s: &str) {
        let bytes = self.charset.encode(s);
        buf.put_i32(bytes.len() as i32);
        buf.put_slice(&bytes);
    }

    fn read_string(&self, reader: &mut WireReader<'_>, field: &str) -> ProtocolResult<String> {
        let len = reader.read_len(field)?;
        if len == 0 {
            return Ok(String::new());
        }
        let bytes = reader.read_slice(len, field)?;
        self.charset.decode(bytes, field)
    }

    fn write_byte_array(buf: &mut BytesMut, bytes: &ByteArray) {
        buf.put_i32(bytes.len() as i32);
        buf.put_slice(bytes.as_bytes());
    }

    fn read_byte_array(reader: &mut WireReader<'_>) -> ProtocolResult<ByteArray> {
        let len = reader.read_len("byte array length")?;
        let bytes = reader.read_slice(len, "byte array")?;
        Ok(ByteArray::from(bytes))
    }

    fn write_value(&self, buf: &mut BytesMut, value: &Value) {
        match value.scalar() {
            Scalar::Undefined => buf.put_u8(tags::UNDEFINED),
            Scalar::String(s) => {
                buf.put_u8(tags::STRING);
                self.write_string(buf, s);
            }
            Scalar::Int32(i) => {
                buf.put_u8(tags::INT32);
                buf.put_i32(*i);
            }
            Scalar::Double(d) => {
                buf.put_u8(tags::DOUBLE);
                buf.put_f64(*d);
            }
            Scalar::ByteArray(b) => {
                buf.put_u8(tags::BYTE_ARRAY);
                Self::write_byte_array(buf, b);
            }
            Scalar::Bool(b) => {
                buf.put_u8(tags::BOOL);
                buf.put_u8(u8::from(*b));
            }
            Scalar::Int64(l) => {
                buf.put_u8(tags::INT64);
                buf.put_i64(*l);
            }
        }

        let children = value.children();
        buf.put_i32(children.len() as i32);
        for (name, vector) in children {
            self.write_string(buf, name);
            buf.put_i32(vector.len() as i32);
            for child in vector {
                self.write_value(buf, child);
            }
        }
    }

    fn read_value(&self, reader: &mut WireReader<'_>, depth: usize) -> ProtocolResult<Value> {
        if depth > MAX_VALUE_DEPTH {
            return Err(ProtocolError::malformed(
                "value",
                format!("nesting deeper than {MAX_VALUE_DEPTH}"),
            ));
        }

        let tag = reader.read_u8("value type tag")?;
        let scalar = match tag {
            tags::UNDEFINED => Scalar::Undefined,
            tags::STRING => Scalar::String(self.read_string(reader, "string value")?),
            tags::INT32 => Scalar::Int32(reader.read_i32("int value")?),
            tags::DOUBLE => Scalar::Double(reader.read_f64("double value")?),
            tags::BYTE_ARRAY => Scalar::ByteArray(Self::read_byte_array(reader)?),
            tags::BOOL => Scalar::Bool(reader.read_bool("bool value")?),
            tags::INT64 => Scalar::Int64(reader.read_i64("long value")?),
            other => {
                return Err(ProtocolError::malformed(
                    "value type tag",
                    format!("unknown tag {other}"),
                ))
            }
        };

        let mut value = Value::with_scalar(scalar);
        let count = reader.read_len("child count")?;
        for _ in 0..count {
            let name = self.read_string(reader, "child name")?;
            let size = reader.read_len("child vector length")?;
            let mut vector = ValueVector::new();
            for _ in 0..size {
                vector.push(self.read_value(reader, depth + 1)?);
            }

            // First occurrence wins; repeated names are read and dropped.
            match value.children_mut().entry(name) {
                Entry::Vacant(slot) => {
                    slot.insert(vector);
                }
                Entry::Occupied(slot) => {
                    tracing::warn!("Ignoring duplicate child field '{}'", slot.key());
                }
            }
        }
        Ok(value)
    }
}

impl Default for SodepProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl CommProtocol for SodepProtocol {
    fn name(&self) -> &'static str {
        "sodep"
    }

    fn encode(&mut self, message: &CommMessage, dst: &mut BytesMut) -> ProtocolResult<()> {
        let start = dst.len();
        self.encode_message(message, dst);

        let size = dst.len() - start;
        if size > self.max_message_size {
            dst.truncate(start);
            return Err(ProtocolError::MessageTooLarge(size, self.max_message_size));
        }

        tracing::debug!(
            "SODEP send: id={} op={} ({} bytes)",
            message.id(),
            message.operation_name(),
            size
        );
        Ok(())
    }

    fn decode(&mut self, src: &mut BytesMut) -> ProtocolResult<Option<CommMessage>> {
        if src.is_empty() {
            return Ok(None);
        }

        let scan = self.scan.get_or_insert_with(FrameScan::new);
        if scan.pos > src.len() {
            // not the buffer the scan started on
            *scan = FrameScan::new();
        }
        match scan.advance(&src[..]) {
            Scan::Partial(needed) => {
                tracing::trace!("SODEP recv: {} of at least {} bytes", src.len(), needed);
                return Ok(None);
            }
            Scan::Complete(len) => tracing::trace!("SODEP recv: frame of {} bytes", len),
            Scan::Invalid => {}
        }
        self.scan = None;

        let mut reader = WireReader::new(&src[..]);
        match self.decode_message(&mut reader) {
            Ok(message) => {
                let consumed = reader.position();
                let _ = src.split_to(consumed);
                tracing::debug!(
                    "SODEP recv: id={} op={} ({} bytes)",
                    message.id(),
                    message.operation_name(),
                    consumed
                );
                Ok(Some(message))
            }
            Err(ProtocolError::Incomplete { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> ProtocolResult<CommMessage> {
        self.scan = None;
        let mut reader = WireReader::new(&src[..]);
        let message = self.decode_message(&mut reader).map_err(|e| match e {
            ProtocolError::Incomplete { field } => {
                ProtocolError::malformed(field, "truncated input")
            }
            other => other,
        })?;
        let consumed = reader.position();
        let _ = src.split_to(consumed);
        Ok(message)
    }

    fn max_message_size(&self) -> usize {
        self.max_message_size
    }
}
