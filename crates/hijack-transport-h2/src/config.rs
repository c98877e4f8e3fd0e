//! HTTP/2 transport configuration

use hijack_transport::{TransportError, TransportResult};
use std::time::Duration;

/// HTTP/2-specific configuration shared by the RPC client and server
#[derive(Debug, Clone)]
pub struct H2Config {
    /// Bound on the TCP connect to the RPC server (client)
    pub connect_timeout: Duration,

    /// Deadline for the unary handshake call (client)
    pub handshake_timeout: Duration,

    /// Initial per-stream window size
    pub initial_window_size: u32,

    /// Initial connection window size
    pub initial_connection_window_size: u32,

    /// Maximum concurrent streams (server)
    pub max_concurrent_streams: u32,

    /// Maximum frame size
    pub max_frame_size: u32,
}

impl H2Config {
    /// Create a client configuration with defaults
    pub fn client_default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(1),
            initial_window_size: 1024 * 1024,            // 1MB
            initial_connection_window_size: 4 * 1024 * 1024, // 4MB
            max_concurrent_streams: 100,
            max_frame_size: 16 * 1024, // 16KB (HTTP/2 default)
        }
    }

    /// Create a server configuration with defaults
    pub fn server_default() -> Self {
        Self {
            max_concurrent_streams: 1000,
            ..Self::client_default()
        }
    }

    /// Set the handshake deadline
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn validate(&self) -> TransportResult<()> {
        if self.initial_window_size == 0 {
            return Err(TransportError::ConfigurationError(
                "Initial window size must be > 0".to_string(),
            ));
        }
        // RFC 7540 section 4.2
        if !(16 * 1024..=16 * 1024 * 1024 - 1).contains(&self.max_frame_size) {
            return Err(TransportError::ConfigurationError(format!(
                "Max frame size {} outside 16KB..16MB",
                self.max_frame_size
            )));
        }
        if self.handshake_timeout.is_zero() {
            return Err(TransportError::ConfigurationError(
                "Handshake timeout must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn client_builder(&self) -> h2::client::Builder {
        let mut builder = h2::client::Builder::new();
        builder
            .initial_window_size(self.initial_window_size)
            .initial_connection_window_size(self.initial_connection_window_size)
            .initial_max_send_streams(self.max_concurrent_streams as usize)
            .max_frame_size(self.max_frame_size);
        builder
    }

    pub(crate) fn server_builder(&self) -> h2::server::Builder {
        let mut builder = h2::server::Builder::new();
        builder
            .initial_window_size(self.initial_window_size)
            .initial_connection_window_size(self.initial_connection_window_size)
            .max_concurrent_streams(self.max_concurrent_streams)
            .max_frame_size(self.max_frame_size);
        builder
    }
}

impl Default for H2Config {
    fn default() -> Self {
        Self::client_default()
    }
}
