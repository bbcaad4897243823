//! Blocking message channel over any `Read + Write` stream

use bytes::BytesMut;
use std::io::{Read, Write};

use crate::config::ProtocolConfig;
use crate::message::CommMessage;
use crate::protocol::{create_protocol, CommProtocol, ProtocolResult};

pub struct Channel<S> {
    stream: S,
    protocol: Box<dyn CommProtocol>,
    /// Bytes received past the last decoded message
    read_buf: BytesMut,
}

impl<S: Read + Write> Channel<S> {
    pub fn new(stream: S, protocol: Box<dyn CommProtocol>) -> Self {
        Self {
            stream,
            protocol,
            read_buf: BytesMut::new(),
        }
    }

    /// Channel speaking the protocol selected in `config`
    pub fn from_config(stream: S, config: &ProtocolConfig) -> Self {
        Self::new(stream, create_protocol(config))
    }

    pub fn protocol(&self) -> &dyn CommProtocol {
        self.protocol.as_ref()
    }

    pub fn send(&mut self, message: &CommMessage) -> ProtocolResult<()> {
        self.protocol.send(&mut self.stream, message)
    }

    /// Block until the next message arrives
    pub fn recv(&mut self) -> ProtocolResult<CommMessage> {
        self.protocol.recv(&mut self.stream, &mut self.read_buf)
    }

    /// Send a request and block for its reply
    pub fn call(&mut self, request: &CommMessage) -> ProtocolResult<CommMessage> {
        self.send(request)?;
        self.recv()
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolKind;
    use crate::protocol::{ProtocolError, SodepProtocol};
    use crate::value::Value;
    use std::io::Cursor;

    /// Reads from a fixed input, collects writes
    struct Loopback {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Loopback {
        fn new(input: Vec<u8>) -> Self {
            Self {
                input: Cursor::new(input),
                output: Vec::new(),
            }
        }
    }

    impl Read for Loopback {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Loopback {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn encoded(messages: &[CommMessage]) -> Vec<u8> {
        let mut protocol = SodepProtocol::new();
        let mut buf = BytesMut::new();
        for m in messages {
            protocol.encode(m, &mut buf).unwrap();
        }
        buf.to_vec()
    }

    #[test]
    fn test_recv_in_order_then_closed() {
        let first = CommMessage::create_request("a", "/", Value::from(1));
        let second = CommMessage::create_request("b", "/", Value::from(2));
        let mut channel = Channel::new(
            Loopback::new(encoded(&[first.clone(), second.clone()])),
            Box::new(SodepProtocol::new()),
        );

        assert_eq!(channel.recv().unwrap(), first);
        assert_eq!(channel.recv().unwrap(), second);
        assert!(matches!(channel.recv(), Err(ProtocolError::Closed)));
    }

    #[test]
    fn test_send_writes_wire_form() {
        let message = CommMessage::create_notification("ping", "/", Value::new());
        let mut channel = Channel::from_config(Loopback::new(Vec::new()), &ProtocolConfig::default());
        assert_eq!(channel.protocol().name(), "sodep");

        channel.send(&message).unwrap();
        assert_eq!(channel.get_ref().output, encoded(&[message]));
    }

    #[test]
    fn test_call_over_jsonrpc() {
        let mut config = ProtocolConfig::default();
        config.kind = ProtocolKind::JsonRpc;

        let request = CommMessage::create_request("now", "/", Value::new());
        let body = format!(r#"{{"jsonrpc":"2.0","result":"noon","id":{}}}"#, request.id());
        let reply = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );

        let mut channel = Channel::from_config(Loopback::new(reply.into_bytes()), &config);
        let response = channel.call(&request).unwrap();
        assert_eq!(response.operation_name(), "now");
        assert_eq!(response.value().str_value(), "noon");

        let sent = String::from_utf8(channel.into_inner().output).unwrap();
        assert!(sent.starts_with("POST / HTTP/1.1\r\n"));
    }

    #[test]
    fn test_truncated_input_is_malformed() {
        let mut bytes = encoded(&[CommMessage::create_request("a", "/", Value::from("x"))]);
        bytes.truncate(bytes.len() - 1);
        let mut channel = Channel::new(Loopback::new(bytes), Box::new(SodepProtocol::new()));
        assert!(channel.recv().unwrap_err().is_malformed());
    }
}
