//! Protocol module - Wire codecs for message envelopes
//!
//! Every codec implements [`CommProtocol`]: it turns a [`CommMessage`] into
//! bytes and rebuilds one from a buffer. Two codecs are provided:
//! - [`SodepProtocol`]: compact binary value-tree format
//! - [`JsonRpcProtocol`]: JSON-RPC 2.0 bodies carried over HTTP/1.1
//!
//! Decoding is framed: `decode` returns `Ok(None)` until a whole message is
//! buffered and never consumes a partial one.

mod codec;
pub mod jsonrpc;
pub mod sodep;

pub use codec::{ProtocolError, ProtocolResult, WireReader};
pub use jsonrpc::{JsonRpcProtocol, JsonRpcTransport, Role};
pub use sodep::{Charset, SodepProtocol};

use bytes::BytesMut;
use std::io::{Read, Write};

use crate::config::{ProtocolConfig, ProtocolKind};
use crate::message::CommMessage;

/// Maximum buffered message size (10 MB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

const READ_CHUNK_SIZE: usize = 4096;

/// A wire codec for [`CommMessage`]s
pub trait CommProtocol: Send {
    /// Protocol name as used in configuration ("sodep", "jsonrpc")
    fn name(&self) -> &'static str;

    /// Append the wire form of `message` to `dst`
    fn encode(&mut self, message: &CommMessage, dst: &mut BytesMut) -> ProtocolResult<()>;

    /// Decode one message from the front of `src`.
    ///
    /// Returns `Ok(None)` without consuming anything when `src` does not yet
    /// hold a complete message.
    fn decode(&mut self, src: &mut BytesMut) -> ProtocolResult<Option<CommMessage>>;

    /// Decode the last message once the peer has closed the stream.
    ///
    /// Whatever is still incomplete at this point is truncated input.
    fn decode_eof(&mut self, src: &mut BytesMut) -> ProtocolResult<CommMessage> {
        match self.decode(src)? {
            Some(message) => Ok(message),
            None => Err(ProtocolError::Malformed {
                field: "message".into(),
                reason: format!("stream closed with {} unread bytes", src.len()),
            }),
        }
    }

    /// Upper bound on a single buffered message
    fn max_message_size(&self) -> usize {
        DEFAULT_MAX_MESSAGE_SIZE
    }

    /// Encode `message` and write it to `out`
    fn send(&mut self, out: &mut dyn Write, message: &CommMessage) -> ProtocolResult<()> {
        let mut buf = BytesMut::with_capacity(256);
        self.encode(message, &mut buf)?;
        out.write_all(&buf)?;
        out.flush()?;
        Ok(())
    }

    /// Read from `input` until one message can be decoded.
    ///
    /// `read_buf` keeps bytes that arrived after the returned message so the
    /// next call can pick them up.
    fn recv(&mut self, input: &mut dyn Read, read_buf: &mut BytesMut) -> ProtocolResult<CommMessage> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            if let Some(message) = self.decode(read_buf)? {
                return Ok(message);
            }

            let max = self.max_message_size();
            if read_buf.len() > max {
                return Err(ProtocolError::MessageTooLarge(read_buf.len(), max));
            }

            let n = input.read(&mut chunk)?;
            if n == 0 {
                if read_buf.is_empty() {
                    return Err(ProtocolError::Closed);
                }
                return self.decode_eof(read_buf);
            }
            read_buf.extend_from_slice(&chunk[..n]);
        }
    }
}

/// Build the codec selected by `config`
pub fn create_protocol(config: &ProtocolConfig) -> Box<dyn CommProtocol> {
    match config.kind {
        ProtocolKind::Sodep => Box::new(SodepProtocol::from_config(&config.sodep)),
        ProtocolKind::JsonRpc => Box::new(JsonRpcProtocol::from_config(&config.jsonrpc)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{JsonRpcConfig, SodepConfig};

    #[test]
    fn test_factory_selects_codec() {
        let mut config = ProtocolConfig::default();
        assert_eq!(create_protocol(&config).name(), "sodep");

        config.kind = ProtocolKind::JsonRpc;
        config.jsonrpc = JsonRpcConfig::default();
        config.sodep = SodepConfig::default();
        assert_eq!(create_protocol(&config).name(), "jsonrpc");
    }
}
