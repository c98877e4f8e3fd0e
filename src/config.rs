//! Binary configuration: optional YAML file merged with command-line values
//!
//! Command-line flags (and their `HIJACK_*` environment variables) win over the file;
//! the file wins over built-in defaults.

use anyhow::{Context, Result};
use hijack_proto::DestinationDescriptor;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_SERVER_LISTEN: &str = "127.0.0.1:9990";
pub const DEFAULT_SERVER_ADDRESS: &str = "localhost:9990";
pub const DEFAULT_INGRESS_LISTEN: &str = "127.0.0.1:9991";
pub const DEFAULT_DESTINATION: &str = "localhost:2222";
pub const DEFAULT_CLIENT_NAME: &str = "client";

/// Configuration file format
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Dialer (server role) settings
    #[serde(default)]
    pub server: ServerSection,

    /// Ingress (client role) settings
    #[serde(default)]
    pub client: ClientSection,

    /// Drain window after one direction of a session stops cleanly
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutdown_grace_ms: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ServerSection {
    /// RPC listen address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer_size: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dial_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ClientSection {
    /// RPC server to connect to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,

    /// Name sent in the handshake
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Local TCP listen address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,

    /// Destination the server should dial (host:port)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer_size: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub handshake_timeout_ms: Option<u64>,
}

impl ConfigFile {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents).context("Failed to parse YAML config")
    }
}

/// Command-line values for the `serve` command
#[derive(Debug, Default, Clone)]
pub struct ServeArgs {
    pub listen: Option<String>,
    pub buffer_size: Option<usize>,
    pub dial_timeout_secs: Option<u64>,
    pub shutdown_grace_ms: Option<u64>,
}

/// Command-line values for the `connect` command
#[derive(Debug, Default, Clone)]
pub struct ConnectArgs {
    pub server: Option<String>,
    pub name: Option<String>,
    pub listen: Option<String>,
    pub destination: Option<String>,
    pub buffer_size: Option<usize>,
    pub handshake_timeout_ms: Option<u64>,
    pub shutdown_grace_ms: Option<u64>,
}

/// Resolved settings for the dialer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeSettings {
    pub listen: String,
    pub buffer_size: usize,
    pub dial_timeout: Duration,
    pub shutdown_grace: Duration,
}

/// Resolved settings for the ingress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectSettings {
    pub server: String,
    pub name: String,
    pub listen: String,
    pub destination: DestinationDescriptor,
    pub buffer_size: usize,
    pub handshake_timeout: Duration,
    pub shutdown_grace: Duration,
}

/// Merge CLI args with the config file, giving precedence to CLI args
pub fn build_serve_settings(args: ServeArgs, file: &ConfigFile) -> Result<ServeSettings> {
    let listen = args
        .listen
        .or_else(|| file.server.listen.clone())
        .unwrap_or_else(|| DEFAULT_SERVER_LISTEN.to_string());
    validate_address(&listen, "listen")?;

    let buffer_size = args
        .buffer_size
        .or(file.server.buffer_size)
        .unwrap_or(hijack_tunnel::config::DEFAULT_DIALER_BUFFER_SIZE);

    let dial_timeout = args
        .dial_timeout_secs
        .or(file.server.dial_timeout_secs)
        .map(Duration::from_secs)
        .unwrap_or(hijack_tunnel::config::DEFAULT_DIAL_TIMEOUT);

    Ok(ServeSettings {
        listen,
        buffer_size,
        dial_timeout,
        shutdown_grace: shutdown_grace(args.shutdown_grace_ms, file),
    })
}

/// Merge CLI args with the config file, giving precedence to CLI args
pub fn build_connect_settings(args: ConnectArgs, file: &ConfigFile) -> Result<ConnectSettings> {
    let server = args
        .server
        .or_else(|| file.client.server.clone())
        .unwrap_or_else(|| DEFAULT_SERVER_ADDRESS.to_string());
    validate_address(&server, "server")?;

    let listen = args
        .listen
        .or_else(|| file.client.listen.clone())
        .unwrap_or_else(|| DEFAULT_INGRESS_LISTEN.to_string());
    validate_address(&listen, "listen")?;

    let destination = args
        .destination
        .or_else(|| file.client.destination.clone())
        .unwrap_or_else(|| DEFAULT_DESTINATION.to_string());
    let destination = DestinationDescriptor::parse(&destination)
        .with_context(|| format!("Invalid destination address: {}", destination))?;

    let name = args
        .name
        .or_else(|| file.client.name.clone())
        .unwrap_or_else(|| DEFAULT_CLIENT_NAME.to_string());

    let buffer_size = args
        .buffer_size
        .or(file.client.buffer_size)
        .unwrap_or(hijack_tunnel::config::DEFAULT_INGRESS_BUFFER_SIZE);

    let handshake_timeout = Duration::from_millis(
        args.handshake_timeout_ms
            .or(file.client.handshake_timeout_ms)
            .unwrap_or(1000),
    );

    Ok(ConnectSettings {
        server,
        name,
        listen,
        destination,
        buffer_size,
        handshake_timeout,
        shutdown_grace: shutdown_grace(args.shutdown_grace_ms, file),
    })
}

fn shutdown_grace(cli: Option<u64>, file: &ConfigFile) -> Duration {
    cli.or(file.shutdown_grace_ms)
        .map(Duration::from_millis)
        .unwrap_or(hijack_tunnel::config::DEFAULT_SHUTDOWN_GRACE)
}

/// Validate address format (should be host:port)
pub fn validate_address(addr: &str, addr_type: &str) -> Result<()> {
    let (host, port) = addr.rsplit_once(':').ok_or_else(|| {
        anyhow::anyhow!(
            "Invalid {} address format: '{}' (expected format: host:port)",
            addr_type,
            addr
        )
    })?;

    if host.is_empty() {
        anyhow::bail!(
            "Invalid {} address format: '{}' (host cannot be empty)",
            addr_type,
            addr
        );
    }

    port.parse::<u16>()
        .with_context(|| format!("Invalid port in {} address: {}", addr_type, addr))?;

    Ok(())
}

/// Resolve a `host:port` listen address to a socket address
pub async fn resolve_listen_addr(addr: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(addr)
        .await
        .with_context(|| format!("Failed to resolve listen address: {}", addr))?
        .next()
        .ok_or_else(|| anyhow::anyhow!("No addresses found for {}", addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_address() {
        assert!(validate_address("localhost:9990", "server").is_ok());
        assert!(validate_address("192.168.1.1:2222", "destination").is_ok());
        assert!(validate_address("[::1]:9991", "listen").is_ok());

        assert!(validate_address("localhost", "server").is_err());
        assert!(validate_address("localhost:", "server").is_err());
        assert!(validate_address("localhost:abc", "server").is_err());
        assert!(validate_address(":9990", "server").is_err());
        assert!(validate_address("", "listen").is_err());
    }

    #[test]
    fn test_defaults_without_file() {
        let settings =
            build_connect_settings(ConnectArgs::default(), &ConfigFile::default()).unwrap();
        assert_eq!(settings.server, "localhost:9990");
        assert_eq!(settings.listen, "127.0.0.1:9991");
        assert_eq!(settings.destination, DestinationDescriptor::new("localhost", "2222"));
        assert_eq!(settings.name, "client");
        assert_eq!(settings.buffer_size, 4096);
        assert_eq!(settings.handshake_timeout, Duration::from_secs(1));
        assert_eq!(settings.shutdown_grace, Duration::from_secs(2));

        let settings = build_serve_settings(ServeArgs::default(), &ConfigFile::default()).unwrap();
        assert_eq!(settings.listen, "127.0.0.1:9990");
        assert_eq!(settings.buffer_size, 10_000);
        assert_eq!(settings.dial_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_cli_overrides_file() {
        let file = ConfigFile::parse(
            r#"
client:
  server: relay.internal:9990
  destination: 10.0.0.5:22
  buffer_size: 8192
server:
  listen: 0.0.0.0:9990
shutdown_grace_ms: 500
"#,
        )
        .unwrap();

        let args = ConnectArgs {
            destination: Some("10.0.0.6:2222".to_string()),
            ..Default::default()
        };
        let settings = build_connect_settings(args, &file).unwrap();
        assert_eq!(settings.server, "relay.internal:9990");
        assert_eq!(settings.destination, DestinationDescriptor::new("10.0.0.6", "2222"));
        assert_eq!(settings.buffer_size, 8192);
        assert_eq!(settings.shutdown_grace, Duration::from_millis(500));

        let settings = build_serve_settings(ServeArgs::default(), &file).unwrap();
        assert_eq!(settings.listen, "0.0.0.0:9990");
    }

    #[test]
    fn test_invalid_destination_rejected() {
        let args = ConnectArgs {
            destination: Some("no-port".to_string()),
            ..Default::default()
        };
        assert!(build_connect_settings(args, &ConfigFile::default()).is_err());
    }

    #[test]
    fn test_malformed_yaml_is_error() {
        assert!(ConfigFile::parse("client: [1, 2").is_err());
    }
}
