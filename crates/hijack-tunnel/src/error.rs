//! Tunnel errors

use hijack_proto::{MetadataError, Status};
use hijack_transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Failed to bind to {address}: {reason}\n\nTroubleshooting:\n  - Check if another process is using this port: lsof -i :{port}\n  - Try using a different address or port")]
    BindError {
        address: String,
        port: u16,
        reason: String,
    },

    #[error("Failed to dial {address}: {source}")]
    Dial {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Dial to {0} timed out")]
    DialTimeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Pump task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl TunnelError {
    /// Status reported to the far end of the tunnel stream for this error
    pub fn to_status(&self) -> Status {
        match self {
            TunnelError::Metadata(e) => Status::invalid_argument(e.to_string()),
            TunnelError::Dial { .. } | TunnelError::DialTimeout(_) => {
                Status::unavailable(self.to_string())
            }
            TunnelError::Transport(TransportError::Status(status)) => status.clone(),
            TunnelError::Transport(TransportError::StreamReset) => {
                Status::cancelled("stream reset by peer")
            }
            _ => Status::internal(self.to_string()),
        }
    }
}

pub type TunnelResult<T> = Result<T, TunnelError>;
