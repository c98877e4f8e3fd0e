//! Transport abstraction for tunnel streams
//!
//! A tunnel stream is a bidirectional sequence of [`Chunk`]s. The pump never touches a
//! concrete RPC library: it talks to a [`ChunkSender`] / [`ChunkReceiver`] pair obtained
//! by splitting a [`ChunkStream`]. Client roles open streams through a [`TunnelOpener`];
//! server roles implement [`TunnelService`] and get handed accepted streams.

pub mod memory;

use async_trait::async_trait;
use hijack_proto::{Chunk, CodecError, DestinationDescriptor, HelloReply, HelloRequest, Status};
use http::HeaderMap;
use thiserror::Error;

pub use memory::{memory_stream_pair, MemoryStream};

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Stream closed")]
    StreamClosed,

    #[error("Stream reset by peer")]
    StreamReset,

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Failed to bind to {address}:{port}: {reason}")]
    BindError {
        address: String,
        port: u16,
        reason: String,
    },

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Call failed with {0}")]
    Status(Status),

    #[error("Timeout")]
    Timeout,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Sending half of a tunnel stream
#[async_trait]
pub trait ChunkSender: Send + 'static {
    /// Send one chunk, in order
    async fn send_chunk(&mut self, chunk: Chunk) -> TransportResult<()>;

    /// Close the sending side normally (no more chunks follow)
    async fn finish(&mut self) -> TransportResult<()>;

    /// Close the sending side with an error outcome
    async fn abort(&mut self, status: Status);
}

/// Receiving half of a tunnel stream
#[async_trait]
pub trait ChunkReceiver: Send + 'static {
    /// Receive the next chunk.
    ///
    /// `Ok(None)` means the peer closed the stream cleanly; any abnormal end is an error.
    async fn recv_chunk(&mut self) -> TransportResult<Option<Chunk>>;
}

/// A bidirectional chunk stream that can be split into independently owned halves
pub trait ChunkStream: Send + 'static {
    type Sender: ChunkSender;
    type Receiver: ChunkReceiver;

    /// Identifier for logging
    fn stream_id(&self) -> u64;

    fn split(self) -> (Self::Sender, Self::Receiver);
}

/// Client side: opens one new tunnel stream per session
#[async_trait]
pub trait TunnelOpener: Send + Sync + 'static {
    type Stream: ChunkStream;

    /// Open a stream tagged with the destination the far end should dial
    async fn open_tunnel(
        &self,
        destination: &DestinationDescriptor,
    ) -> TransportResult<Self::Stream>;
}

/// Server side: handlers for the `hijack.HTService` calls
#[async_trait]
pub trait TunnelService: Send + Sync + 'static {
    /// State produced by a successfully accepted tunnel call
    type Session: Send + 'static;

    /// Unary handshake
    async fn hello(&self, request: HelloRequest) -> Result<HelloReply, Status>;

    /// Inspect the metadata of a new tunnel call before any message flows.
    ///
    /// An error rejects the call with that status; the stream is never opened.
    async fn accept_tunnel(&self, metadata: &HeaderMap) -> Result<Self::Session, Status>;

    /// Drive an accepted tunnel call until it ends
    async fn run_tunnel<S>(&self, session: Self::Session, stream: S)
    where
        S: ChunkStream;
}

#[cfg(test)]
mod tests;
