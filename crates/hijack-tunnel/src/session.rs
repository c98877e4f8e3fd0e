//! Session bookkeeping shared by both roles

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Monotonic session id generator for logging
#[derive(Debug, Clone)]
pub struct SessionIdGenerator {
    next_session_id: Arc<AtomicU64>,
}

impl SessionIdGenerator {
    pub fn new() -> Self {
        Self {
            next_session_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn generate(&self) -> u64 {
        self.next_session_id.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for SessionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle of an ingress session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngressState {
    Accepted,
    StreamOpened,
    Pumping,
    Closed,
}

/// Lifecycle of a dialer session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialerState {
    StreamReceived,
    AddressResolved,
    DestinationDialed,
    Pumping,
    Closed,
}

impl fmt::Display for IngressState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngressState::Accepted => "accepted",
            IngressState::StreamOpened => "stream_opened",
            IngressState::Pumping => "pumping",
            IngressState::Closed => "closed",
        };
        f.write_str(name)
    }
}

impl fmt::Display for DialerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DialerState::StreamReceived => "stream_received",
            DialerState::AddressResolved => "address_resolved",
            DialerState::DestinationDialed => "destination_dialed",
            DialerState::Pumping => "pumping",
            DialerState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// One of the two pump directions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// TCP reads sent as chunks
    TcpToRpc,
    /// Chunks received and written to TCP
    RpcToTcp,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::TcpToRpc => f.write_str("tcp->rpc"),
            Direction::RpcToTcp => f.write_str("rpc->tcp"),
        }
    }
}

/// Counters reported when a pump finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpStats {
    pub bytes_tcp_to_rpc: u64,
    pub bytes_rpc_to_tcp: u64,
    /// Direction whose outcome decided the session
    pub first_stopped: Direction,
    pub duration: Duration,
}
