//! Configuration module
//!
//! Handles loading and saving commwire configuration: which protocol a
//! channel speaks and the parameters of each codec.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::protocol::jsonrpc::{ContentEncoding, JsonRpcTransport, Role};
use crate::protocol::{Charset, DEFAULT_MAX_MESSAGE_SIZE};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Protocol selection and codec settings
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

/// General configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
}

/// Which codec a channel uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    #[default]
    Sodep,
    #[serde(rename = "jsonrpc")]
    JsonRpc,
}

/// Protocol configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Codec to use
    #[serde(default)]
    pub kind: ProtocolKind,

    /// SODEP settings
    #[serde(default)]
    pub sodep: SodepConfig,

    /// JSON-RPC settings
    #[serde(default)]
    pub jsonrpc: JsonRpcConfig,
}

/// SODEP codec configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SodepConfig {
    /// String character set on the wire
    #[serde(default)]
    pub charset: Charset,
    /// Largest accepted message in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl Default for SodepConfig {
    fn default() -> Self {
        Self {
            charset: Charset::default(),
            max_message_size: default_max_message_size(),
        }
    }
}

/// JSON-RPC configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcConfig {
    /// Whether this end sends requests or answers them
    #[serde(default)]
    pub role: Role,
    /// Message framing: HTTP/1.1 or bare `Content-Length` headers
    #[serde(default)]
    pub transport: JsonRpcTransport,
    /// Value of the Host header on requests
    #[serde(default = "default_host")]
    pub host: String,
    /// Request target of outgoing POSTs
    #[serde(default = "default_path")]
    pub path: String,
    /// Keep the connection open between exchanges
    #[serde(default = "default_true")]
    pub keep_alive: bool,
    /// Allow gzip/deflate content coding
    #[serde(default = "default_true")]
    pub compression: bool,
    /// Coding to request and use for outgoing requests
    #[serde(default)]
    pub request_compression: Option<ContentEncoding>,
    /// Log full wire messages at debug level
    #[serde(default)]
    pub debug: bool,
    /// Largest accepted message in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Operation name -> method name used on the wire
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_path() -> String {
    "/".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

impl Default for JsonRpcConfig {
    fn default() -> Self {
        Self {
            role: Role::default(),
            transport: JsonRpcTransport::default(),
            host: default_host(),
            path: default_path(),
            keep_alive: default_true(),
            compression: default_true(),
            request_compression: None,
            debug: false,
            max_message_size: default_max_message_size(),
            aliases: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("commwire/config.toml")),
            Some(PathBuf::from("./commwire.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        protocol: ProtocolConfig {
            kind: ProtocolKind::JsonRpc,
            jsonrpc: JsonRpcConfig {
                role: Role::Client,
                host: "api.example.com".to_string(),
                path: "/rpc".to_string(),
                request_compression: Some(ContentEncoding::Gzip),
                ..Default::default()
            },
            ..Default::default()
        },
        ..Default::default()
    };

    Ok(toml::to_string_pretty(&config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.protocol.kind, ProtocolKind::Sodep);
        assert_eq!(config.protocol.sodep.charset, Charset::Utf8);
        assert_eq!(config.protocol.jsonrpc.role, Role::Client);
        assert!(config.protocol.jsonrpc.compression);
    }

    #[test]
    fn test_save_and_load() {
        let mut config = Config::default();
        config.protocol.sodep.charset = Charset::Latin1;
        let file = NamedTempFile::new().unwrap();

        config.save(file.path()).unwrap();

        let loaded = Config::load(file.path()).unwrap();
        assert_eq!(loaded.protocol.sodep.charset, Charset::Latin1);
        assert_eq!(
            loaded.protocol.sodep.max_message_size,
            config.protocol.sodep.max_message_size
        );
    }

    #[test]
    fn test_sample_config() {
        let sample = generate_sample_config().unwrap();
        let parsed: Config = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.protocol.kind, ProtocolKind::JsonRpc);
        assert_eq!(parsed.protocol.jsonrpc.path, "/rpc");
        assert_eq!(
            parsed.protocol.jsonrpc.request_compression,
            Some(ContentEncoding::Gzip)
        );
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [protocol]
            kind = "jsonrpc"

            [protocol.jsonrpc]
            role = "server"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.protocol.jsonrpc.role, Role::Server);
        assert_eq!(parsed.protocol.jsonrpc.host, "localhost");
        assert!(parsed.protocol.jsonrpc.keep_alive);
    }

    #[test]
    fn test_lsp_transport_with_aliases() {
        let parsed: Config = toml::from_str(
            r#"
            [protocol]
            kind = "jsonrpc"

            [protocol.jsonrpc]
            role = "server"
            transport = "lsp"

            [protocol.jsonrpc.aliases]
            didOpen = "textDocument/didOpen"
            "#,
        )
        .unwrap();
        let jsonrpc = &parsed.protocol.jsonrpc;
        assert_eq!(jsonrpc.transport, JsonRpcTransport::Lsp);
        assert_eq!(jsonrpc.aliases["didOpen"], "textDocument/didOpen");
        assert_eq!(
            Config::default().protocol.jsonrpc.transport,
            JsonRpcTransport::Http
        );
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load(Path::new("/nonexistent/commwire.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
