//! commwire - value-tree message envelopes over interchangeable wire codecs
//!
//! A [`Value`] tree is the payload of every [`CommMessage`]. Codecs
//! implementing [`CommProtocol`] move messages over byte streams: the compact
//! binary SODEP format and JSON-RPC 2.0 over HTTP/1.1.

pub mod config;
pub mod message;
pub mod network;
pub mod protocol;
pub mod value;

pub use config::Config;
pub use message::{CommMessage, Fault};
pub use protocol::{create_protocol, CommProtocol, ProtocolError, ProtocolResult};
pub use value::{Value, ValueVector};
