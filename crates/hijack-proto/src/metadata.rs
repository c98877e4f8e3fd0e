//! Destination metadata carried on tunnel stream requests
//!
//! The ingress side picks the destination and attaches it once, as two request headers,
//! when it opens the stream. The dialer side recovers it before dialing.

use http::header::{HeaderMap, HeaderName, HeaderValue};
use std::fmt;
use thiserror::Error;

/// Metadata key holding the destination host
pub const CONNECT_IP_KEY: &str = "connect_ip";

/// Metadata key holding the destination port
pub const CONNECT_PORT_KEY: &str = "connect_port";

/// Errors while encoding or decoding destination metadata
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("expected {0} in stream metadata")]
    Missing(&'static str),

    #[error("metadata value for {0} is empty")]
    Empty(&'static str),

    #[error("metadata value for {key} is not valid: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("invalid destination address '{0}' (expected format: host:port)")]
    InvalidAddress(String),
}

/// Host/port pair telling the dialer where to connect
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DestinationDescriptor {
    pub host: String,
    pub port: String,
}

impl DestinationDescriptor {
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
        }
    }

    /// Parse a `host:port` string. IPv6 hosts may be given in brackets.
    pub fn parse(addr: &str) -> Result<Self, MetadataError> {
        let invalid = || MetadataError::InvalidAddress(addr.to_string());

        let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        if host.is_empty() || port.parse::<u16>().is_err() {
            return Err(invalid());
        }

        Ok(Self::new(host, port))
    }

    /// Address suitable for dialing (`host:port`, IPv6 hosts bracketed)
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Attach the descriptor to outgoing request metadata
    pub fn write_to(&self, metadata: &mut HeaderMap) -> Result<(), MetadataError> {
        metadata.insert(
            HeaderName::from_static(CONNECT_IP_KEY),
            encode_value(CONNECT_IP_KEY, &self.host)?,
        );
        metadata.insert(
            HeaderName::from_static(CONNECT_PORT_KEY),
            encode_value(CONNECT_PORT_KEY, &self.port)?,
        );
        Ok(())
    }

    /// Recover the descriptor from incoming request metadata
    pub fn from_metadata(metadata: &HeaderMap) -> Result<Self, MetadataError> {
        let host = decode_value(metadata, CONNECT_IP_KEY)?;
        let port = decode_value(metadata, CONNECT_PORT_KEY)?;
        Ok(Self { host, port })
    }
}

impl fmt::Display for DestinationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

fn encode_value(key: &'static str, value: &str) -> Result<HeaderValue, MetadataError> {
    if value.is_empty() {
        return Err(MetadataError::Empty(key));
    }
    HeaderValue::from_str(value).map_err(|e| MetadataError::Invalid {
        key,
        reason: e.to_string(),
    })
}

fn decode_value(metadata: &HeaderMap, key: &'static str) -> Result<String, MetadataError> {
    // Only the first value counts when a key is repeated
    let value = metadata.get(key).ok_or(MetadataError::Missing(key))?;
    let value = value.to_str().map_err(|e| MetadataError::Invalid {
        key,
        reason: e.to_string(),
    })?;
    if value.is_empty() {
        return Err(MetadataError::Empty(key));
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_read_metadata() {
        let descriptor = DestinationDescriptor::new("localhost", "2222");
        let mut metadata = HeaderMap::new();
        descriptor.write_to(&mut metadata).unwrap();

        assert_eq!(metadata.get(CONNECT_IP_KEY).unwrap(), "localhost");
        assert_eq!(metadata.get(CONNECT_PORT_KEY).unwrap(), "2222");
        assert_eq!(
            DestinationDescriptor::from_metadata(&metadata).unwrap(),
            descriptor
        );
    }

    #[test]
    fn test_missing_keys() {
        let mut metadata = HeaderMap::new();
        assert_eq!(
            DestinationDescriptor::from_metadata(&metadata),
            Err(MetadataError::Missing(CONNECT_IP_KEY))
        );

        metadata.insert(CONNECT_IP_KEY, HeaderValue::from_static("10.0.0.1"));
        assert_eq!(
            DestinationDescriptor::from_metadata(&metadata),
            Err(MetadataError::Missing(CONNECT_PORT_KEY))
        );
    }

    #[test]
    fn test_empty_values_rejected() {
        let mut metadata = HeaderMap::new();
        metadata.insert(CONNECT_IP_KEY, HeaderValue::from_static(""));
        metadata.insert(CONNECT_PORT_KEY, HeaderValue::from_static("22"));
        assert_eq!(
            DestinationDescriptor::from_metadata(&metadata),
            Err(MetadataError::Empty(CONNECT_IP_KEY))
        );

        let descriptor = DestinationDescriptor::new("host", "");
        assert_eq!(
            descriptor.write_to(&mut HeaderMap::new()),
            Err(MetadataError::Empty(CONNECT_PORT_KEY))
        );
    }

    #[test]
    fn test_parse_address() {
        let d = DestinationDescriptor::parse("127.0.0.1:2222").unwrap();
        assert_eq!(d.host, "127.0.0.1");
        assert_eq!(d.port, "2222");
        assert_eq!(d.address(), "127.0.0.1:2222");

        let d = DestinationDescriptor::parse("[::1]:8080").unwrap();
        assert_eq!(d.host, "::1");
        assert_eq!(d.address(), "[::1]:8080");

        assert!(DestinationDescriptor::parse("no-port").is_err());
        assert!(DestinationDescriptor::parse(":22").is_err());
        assert!(DestinationDescriptor::parse("host:http").is_err());
    }
}
