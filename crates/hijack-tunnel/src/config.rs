//! Typed configuration for the tunnel components

use hijack_proto::DestinationDescriptor;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{TunnelError, TunnelResult};

/// Default read buffer on the ingress side
pub const DEFAULT_INGRESS_BUFFER_SIZE: usize = 4 * 1024;

/// Default read buffer on the dialer side
pub const DEFAULT_DIALER_BUFFER_SIZE: usize = 10_000;

/// Default drain window for the second direction after a clean stop
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Default bound on dialing the destination
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings for one stream pump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpConfig {
    /// Maximum bytes read from TCP per chunk
    pub buffer_size: usize,

    /// How long the second direction may keep draining after the first stops cleanly
    pub shutdown_grace: Duration,
}

impl PumpConfig {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn validate(&self) -> TunnelResult<()> {
        if self.buffer_size == 0 {
            return Err(TunnelError::Config(
                "Read buffer size must be > 0".to_string(),
            ));
        }
        if self.buffer_size > hijack_proto::MAX_MESSAGE_SIZE as usize / 2 {
            return Err(TunnelError::Config(format!(
                "Read buffer size {} exceeds the message size limit",
                self.buffer_size
            )));
        }
        Ok(())
    }
}

/// Client role: where to listen and which destination to request
#[derive(Debug, Clone)]
pub struct IngressConfig {
    pub listen_addr: SocketAddr,
    pub destination: DestinationDescriptor,
    pub pump: PumpConfig,
}

impl IngressConfig {
    pub fn new(listen_addr: SocketAddr, destination: DestinationDescriptor) -> Self {
        Self {
            listen_addr,
            destination,
            pump: PumpConfig::new(DEFAULT_INGRESS_BUFFER_SIZE),
        }
    }

    pub fn with_pump(mut self, pump: PumpConfig) -> Self {
        self.pump = pump;
        self
    }

    pub fn validate(&self) -> TunnelResult<()> {
        if self.destination.host.is_empty() || self.destination.port.is_empty() {
            return Err(TunnelError::Config(
                "Destination host and port are required".to_string(),
            ));
        }
        self.pump.validate()
    }
}

/// Server role: how to reach destinations
#[derive(Debug, Clone)]
pub struct DialerConfig {
    pub connect_timeout: Duration,
    pub pump: PumpConfig,
}

impl DialerConfig {
    pub fn with_pump(mut self, pump: PumpConfig) -> Self {
        self.pump = pump;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn validate(&self) -> TunnelResult<()> {
        if self.connect_timeout.is_zero() {
            return Err(TunnelError::Config(
                "Dial timeout must be > 0".to_string(),
            ));
        }
        self.pump.validate()
    }
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_DIAL_TIMEOUT,
            pump: PumpConfig::new(DEFAULT_DIALER_BUFFER_SIZE),
        }
    }
}
