//! commwire - inspect and produce wire messages
//!
//! Decodes captured SODEP or JSON-RPC traffic and writes sample messages.

use std::path::PathBuf;

use bytes::BytesMut;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commwire::config::{self, Config, ProtocolKind};
use commwire::protocol::{create_protocol, CommProtocol, ProtocolError, Role};
use commwire::{CommMessage, Value};

/// commwire - value-tree message codecs
#[derive(Parser)]
#[command(name = "commwire")]
#[command(version = "0.1.0")]
#[command(about = "Decode and encode SODEP / JSON-RPC messages", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode every message in a captured byte stream
    Decode {
        /// Codec to decode with (defaults to the configured one)
        #[arg(short, long, value_enum)]
        protocol: Option<ProtocolArg>,

        /// JSON-RPC side that reads the capture: servers read requests
        #[arg(short, long, value_enum)]
        role: Option<RoleArg>,

        /// File holding the raw bytes
        file: PathBuf,
    },

    /// Write an encoded sample request
    EncodeSample {
        /// Codec to encode with (defaults to the configured one)
        #[arg(short, long, value_enum)]
        protocol: Option<ProtocolArg>,

        /// Output path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ProtocolArg {
    Sodep,
    Jsonrpc,
}

impl From<ProtocolArg> for ProtocolKind {
    fn from(arg: ProtocolArg) -> Self {
        match arg {
            ProtocolArg::Sodep => ProtocolKind::Sodep,
            ProtocolArg::Jsonrpc => ProtocolKind::JsonRpc,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    Client,
    Server,
}

impl From<RoleArg> for Role {
    fn from(arg: RoleArg) -> Self {
        match arg {
            RoleArg::Client => Role::Client,
            RoleArg::Server => Role::Server,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    // Initialize logging
    let filter = if cli.verbose || config.general.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Decode {
            protocol,
            role,
            file,
        } => {
            if let Some(protocol) = protocol {
                config.protocol.kind = protocol.into();
            }
            if let Some(role) = role {
                config.protocol.jsonrpc.role = role.into();
            }
            decode_file(&config, &file)?;
        }
        Commands::EncodeSample { protocol, output } => {
            if let Some(protocol) = protocol {
                config.protocol.kind = protocol.into();
            }
            // A server answers; make the sample a request.
            config.protocol.jsonrpc.role = Role::Client;

            let mut protocol = create_protocol(&config.protocol);
            let mut buf = BytesMut::new();
            protocol.encode(&sample_message(), &mut buf)?;
            std::fs::write(&output, &buf)?;
            tracing::info!(
                "Wrote {} byte {} sample to {}",
                buf.len(),
                protocol.name(),
                output.display()
            );
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

/// Decode and print every message in `path`
fn decode_file(config: &Config, path: &std::path::Path) -> anyhow::Result<()> {
    let mut protocol = create_protocol(&config.protocol);
    let mut buf = BytesMut::from(std::fs::read(path)?.as_slice());
    let mut count = 0;

    while !buf.is_empty() {
        let message = match protocol.decode(&mut buf)? {
            Some(message) => message,
            None => protocol.decode_eof(&mut buf)?,
        };
        count += 1;
        print_message(&message);
    }

    if count == 0 {
        return Err(ProtocolError::Closed.into());
    }
    tracing::info!("Decoded {} {} message(s)", count, protocol.name());
    Ok(())
}

fn print_message(message: &CommMessage) {
    println!(
        "message {} op={:?} path={:?}",
        message.id(),
        message.operation_name(),
        message.resource_path()
    );
    match message.fault() {
        Some(fault) => print!("{}\n{}", fault, fault.value),
        None => print!("{}", message.value()),
    }
}

/// The request written by `encode-sample`
fn sample_message() -> CommMessage {
    let mut value = Value::from("This is a test!");
    value
        .get_or_create_children("test")
        .push(Value::from("Testing child of vector"));
    CommMessage::new(500, "lol", "/test", value, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["commwire", "decode", "-p", "jsonrpc", "-r", "server", "x.bin"]);
        assert!(cli.is_ok());
        assert!(Cli::try_parse_from(["commwire", "encode-sample"]).is_err());
    }

    #[test]
    fn test_decode_sample_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.bin");

        let config = Config::default();
        let mut protocol = create_protocol(&config.protocol);
        let mut buf = BytesMut::new();
        protocol.encode(&sample_message(), &mut buf).unwrap();
        protocol.encode(&sample_message(), &mut buf).unwrap();
        std::fs::write(&path, &buf).unwrap();

        decode_file(&config, &path).unwrap();
    }

    #[test]
    fn test_decode_empty_file_fails() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(decode_file(&Config::default(), file.path()).is_err());
    }
}
