//! Async connection handling
//!
//! A [`Connection`] owns one byte stream and one protocol instance, including:
//! - Message encoding/decoding through the configured codec
//! - Buffering of bytes that arrive ahead of the next message
//! - Connection state and traffic statistics

use bytes::BytesMut;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::message::CommMessage;
use crate::protocol::{CommProtocol, ProtocolError};

const READ_CHUNK_SIZE: usize = 4096;

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Connection closed")]
    Closed,

    #[error("Connection timeout")]
    Timeout,
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// State of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Ready for communication
    Open,
    /// Connection is closing gracefully
    Closing,
    /// Peer or local side closed the stream
    Closed,
}

/// Connection statistics
#[derive(Debug, Default, Clone)]
pub struct ConnectionStats {
    /// Messages sent
    pub messages_sent: u64,
    /// Messages received
    pub messages_received: u64,
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Duration of the last completed `call` (microseconds)
    pub rtt_us: u64,
}

/// A message channel over an async byte stream
pub struct Connection<S> {
    /// The underlying stream
    stream: S,
    /// Wire codec
    protocol: Box<dyn CommProtocol>,
    /// Read buffer
    read_buf: BytesMut,
    /// Write buffer
    write_buf: BytesMut,
    /// Connection state
    state: ConnectionState,
    /// Last activity timestamp
    last_activity: Instant,
    /// Statistics
    stats: ConnectionStats,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an established stream
    pub fn new(stream: S, protocol: Box<dyn CommProtocol>) -> Self {
        Self {
            stream,
            protocol,
            read_buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
            write_buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
            state: ConnectionState::Open,
            last_activity: Instant::now(),
            stats: ConnectionStats::default(),
        }
    }

    /// Name of the codec in use
    pub fn protocol_name(&self) -> &'static str {
        self.protocol.name()
    }

    /// Get the current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Get connection statistics
    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Send a message
    pub async fn send(&mut self, message: &CommMessage) -> ConnectionResult<()> {
        if self.state != ConnectionState::Open {
            return Err(ConnectionError::Closed);
        }

        self.write_buf.clear();
        self.protocol.encode(message, &mut self.write_buf)?;

        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;

        self.stats.messages_sent += 1;
        self.stats.bytes_sent += self.write_buf.len() as u64;
        self.last_activity = Instant::now();

        tracing::debug!(
            "Sent {} message {} ({} bytes)",
            self.protocol.name(),
            message.id(),
            self.write_buf.len()
        );
        Ok(())
    }

    /// Receive a message (returns None if the peer closed cleanly)
    pub async fn recv(&mut self) -> ConnectionResult<Option<CommMessage>> {
        loop {
            // Try to decode a message from the buffer
            if let Some(message) = self.protocol.decode(&mut self.read_buf)? {
                return Ok(Some(self.received(message)));
            }

            let max = self.protocol.max_message_size();
            if self.read_buf.len() > max {
                return Err(ProtocolError::MessageTooLarge(self.read_buf.len(), max).into());
            }

            // Read more data
            let mut buf = [0u8; READ_CHUNK_SIZE];
            let n = self.stream.read(&mut buf).await?;

            if n == 0 {
                self.state = ConnectionState::Closed;
                if self.read_buf.is_empty() {
                    return Ok(None); // Clean close
                }
                let message = self.protocol.decode_eof(&mut self.read_buf)?;
                return Ok(Some(self.received(message)));
            }

            self.read_buf.extend_from_slice(&buf[..n]);
            self.stats.bytes_received += n as u64;
        }
    }

    fn received(&mut self, message: CommMessage) -> CommMessage {
        self.stats.messages_received += 1;
        self.last_activity = Instant::now();
        tracing::debug!(
            "Received {} message {} ({})",
            self.protocol.name(),
            message.id(),
            message.operation_name()
        );
        message
    }

    /// Try to receive a message with a timeout
    pub async fn recv_timeout(&mut self, timeout: Duration) -> ConnectionResult<Option<CommMessage>> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout),
        }
    }

    /// Send a request and wait for its reply
    pub async fn call(&mut self, request: &CommMessage) -> ConnectionResult<CommMessage> {
        let start = Instant::now();
        self.send(request).await?;
        let reply = self.recv().await?.ok_or(ConnectionError::Closed)?;
        self.stats.rtt_us = start.elapsed().as_micros() as u64;
        Ok(reply)
    }

    /// Close the connection gracefully
    pub async fn close(&mut self) -> ConnectionResult<()> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }
        self.state = ConnectionState::Closing;
        self.stream.shutdown().await?;
        self.state = ConnectionState::Closed;
        Ok(())
    }

    /// Check if the connection is still active
    pub fn is_active(&self) -> bool {
        matches!(self.state, ConnectionState::Open)
    }

    /// Get time since last activity
    pub fn idle_time(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Get the underlying stream
    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{JsonRpcProtocol, Role, SodepProtocol};
    use crate::value::Value;

    fn sodep() -> Box<dyn CommProtocol> {
        Box::new(SodepProtocol::new())
    }

    #[tokio::test]
    async fn test_sodep_exchange() {
        let (a, b) = tokio::io::duplex(64);
        let mut client = Connection::new(a, sodep());
        let mut server = Connection::new(b, sodep());

        let mut payload = Value::from("hello");
        payload.set_first_child("n", 7);
        let request = CommMessage::create_request("greet", "/", payload.clone());

        let serve = async {
            let received = server.recv().await.unwrap().unwrap();
            assert_eq!(received.value(), &payload);
            server
                .send(&CommMessage::create_response(&received, Value::from("hi")))
                .await
                .unwrap();
        };
        let (reply, ()) = tokio::join!(client.call(&request), serve);

        let reply = reply.unwrap();
        assert_eq!(reply.id(), request.id());
        assert_eq!(reply.value().str_value(), "hi");
        assert_eq!(client.stats().messages_sent, 1);
        assert_eq!(client.stats().messages_received, 1);
        assert_eq!(server.stats().bytes_received, client.stats().bytes_sent);
    }

    #[tokio::test]
    async fn test_jsonrpc_exchange() {
        let (a, b) = tokio::io::duplex(1024);
        let mut client = Connection::new(a, Box::new(JsonRpcProtocol::new(Role::Client)));
        let mut server = Connection::new(b, Box::new(JsonRpcProtocol::new(Role::Server)));
        assert_eq!(client.protocol_name(), "jsonrpc");

        let request = CommMessage::create_request("twice", "/", Value::from(21));
        let serve = async {
            let received = server.recv().await.unwrap().unwrap();
            let doubled = Value::from(received.value().int_value() * 2);
            server
                .send(&CommMessage::create_response(&received, doubled))
                .await
                .unwrap();
        };
        let (reply, ()) = tokio::join!(client.call(&request), serve);

        let reply = reply.unwrap();
        assert_eq!(reply.operation_name(), "twice");
        assert_eq!(reply.value().int_value(), 42);
    }

    #[tokio::test]
    async fn test_call_against_scripted_peer() {
        let request = CommMessage::new(9, "op", "/", Value::from(1), None);
        let reply = CommMessage::create_response(&request, Value::from(2));

        let mut codec = SodepProtocol::new();
        let mut outgoing = BytesMut::new();
        let mut incoming = BytesMut::new();
        codec.encode(&request, &mut outgoing).unwrap();
        codec.encode(&reply, &mut incoming).unwrap();

        let peer = tokio_test::io::Builder::new()
            .write(&outgoing)
            .read(&incoming)
            .build();
        let mut conn = Connection::new(peer, sodep());
        assert_eq!(conn.call(&request).await.unwrap(), reply);
        assert_eq!(conn.stats().bytes_received, incoming.len() as u64);
    }

    #[tokio::test]
    async fn test_large_message_over_small_pipe() {
        let (a, b) = tokio::io::duplex(4096);
        let mut client = Connection::new(a, sodep());
        let mut server = Connection::new(b, sodep());

        let mut payload = Value::from(vec![1u8; 3 * 1024 * 1024]);
        let items = payload.get_or_create_children("item");
        for i in 0..20_000 {
            items.push(Value::from(i));
        }
        let request = CommMessage::new(11, "upload", "/", payload, None);

        let (sent, received) = tokio::join!(client.send(&request), server.recv());
        sent.unwrap();
        assert_eq!(received.unwrap().unwrap(), request);
        assert_eq!(server.stats().bytes_received, client.stats().bytes_sent);
    }

    #[tokio::test]
    async fn test_clean_close() {
        let (a, b) = tokio::io::duplex(64);
        let mut client = Connection::new(a, sodep());
        let mut server = Connection::new(b, sodep());

        client.close().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(server.recv().await.unwrap().is_none());
        assert!(!server.is_active());
    }

    #[tokio::test]
    async fn test_truncated_stream() {
        let (a, b) = tokio::io::duplex(64);
        let mut server = Connection::new(b, sodep());

        let mut raw = a;
        raw.write_all(&[0, 0, 0, 0, 0, 0, 0, 1, 0, 0]).await.unwrap();
        raw.shutdown().await.unwrap();

        match server.recv().await {
            Err(ConnectionError::Protocol(err)) => assert!(err.is_malformed()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_recv_timeout() {
        let (_a, b) = tokio::io::duplex(64);
        let mut server = Connection::new(b, sodep());
        let result = server.recv_timeout(Duration::from_millis(20)).await;
        assert!(matches!(result, Err(ConnectionError::Timeout)));
    }

    #[tokio::test]
    async fn test_send_after_close() {
        let (a, _b) = tokio::io::duplex(64);
        let mut client = Connection::new(a, sodep());
        client.close().await.unwrap();
        let result = client
            .send(&CommMessage::create_notification("x", "/", Value::new()))
            .await;
        assert!(matches!(result, Err(ConnectionError::Closed)));
    }
}
