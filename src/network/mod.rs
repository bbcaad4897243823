//! Network module - Message channels over byte streams
//!
//! Provides:
//! - [`Channel`]: blocking send/receive over any `Read + Write` stream
//! - [`Connection`]: async send/receive over tokio streams
//! - [`connect`]: open a TCP connection speaking a configured protocol

mod channel;
mod connection;

pub use channel::Channel;
pub use connection::*;

use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;

use crate::protocol::CommProtocol;

/// Resolve a hostname to a socket address
pub async fn resolve_host(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    use tokio::net::lookup_host;

    let addr_string = format!("{}:{}", host, port);
    let mut addrs = lookup_host(&addr_string).await?;

    addrs.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Could not resolve host: {}", host),
        )
    })
}

/// Connect to `host:port` and wrap the stream in a [`Connection`]
pub async fn connect(
    host: &str,
    port: u16,
    protocol: Box<dyn CommProtocol>,
    timeout: Duration,
) -> ConnectionResult<Connection<TcpStream>> {
    let addr = resolve_host(host, port).await?;
    tracing::info!("Connecting to {} ({})", addr, protocol.name());

    let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(ConnectionError::Io(e)),
        Err(_) => return Err(ConnectionError::Timeout),
    };
    stream.set_nodelay(true)?;

    Ok(Connection::new(stream, protocol))
}
