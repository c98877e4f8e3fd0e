//! TCP tunnel over streaming RPC
//!
//! The client role runs an [`IngressListener`]: every local TCP connection gets one tunnel
//! stream and one [`StreamPump`]. The server role runs a [`Dialer`]: every incoming tunnel
//! stream is resolved to a destination, dialed, and pumped the same way.
//!
//! Sessions share no state; a failing session only closes its own connections.

pub mod config;
pub mod dialer;
pub mod error;
pub mod ingress;
pub mod pump;
pub mod session;

pub use config::{DialerConfig, IngressConfig, PumpConfig};
pub use dialer::{DestinationConnector, Dialer, DialerSession, TcpConnector};
pub use error::{TunnelError, TunnelResult};
pub use ingress::{IngressHandle, IngressListener};
pub use pump::StreamPump;
pub use session::{Direction, PumpStats, SessionIdGenerator};
