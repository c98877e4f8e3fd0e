//! HTTP/2 tunnel stream implementation
//!
//! One tunnel call = one HTTP/2 stream. Chunks travel as length-prefixed messages in
//! DATA frames. How the sending side closes depends on which end holds it: the client
//! ends its request body with END_STREAM, the server ends the response with status
//! trailers.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::future::poll_fn;
use h2::{Reason, RecvStream, SendStream};
use hijack_proto::{Chunk, RpcCodec, Status};
use hijack_transport::{
    ChunkReceiver, ChunkSender, ChunkStream, TransportError, TransportResult,
};
use tracing::trace;

/// Which end of the call a stream belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRole {
    Client,
    Server,
}

/// HTTP/2 stream wrapper
pub struct H2ChunkStream {
    role: StreamRole,
    send: SendStream<Bytes>,
    recv: RecvStream,
    stream_id: u32,
}

impl std::fmt::Debug for H2ChunkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("H2ChunkStream")
            .field("role", &self.role)
            .field("stream_id", &self.stream_id)
            .finish()
    }
}

impl H2ChunkStream {
    pub(crate) fn new(role: StreamRole, send: SendStream<Bytes>, recv: RecvStream) -> Self {
        let stream_id = send.stream_id().as_u32();
        Self {
            role,
            send,
            recv,
            stream_id,
        }
    }
}

impl ChunkStream for H2ChunkStream {
    type Sender = H2ChunkSender;
    type Receiver = H2ChunkReceiver;

    fn stream_id(&self) -> u64 {
        self.stream_id as u64
    }

    fn split(self) -> (H2ChunkSender, H2ChunkReceiver) {
        (
            H2ChunkSender {
                role: self.role,
                send: self.send,
                stream_id: self.stream_id,
                closed: false,
            },
            H2ChunkReceiver {
                role: self.role,
                recv: self.recv,
                stream_id: self.stream_id,
                buffer: BytesMut::with_capacity(8192),
                ended: false,
            },
        )
    }
}

/// Sending half of an HTTP/2 tunnel stream
pub struct H2ChunkSender {
    role: StreamRole,
    send: SendStream<Bytes>,
    stream_id: u32,
    closed: bool,
}

#[async_trait]
impl ChunkSender for H2ChunkSender {
    async fn send_chunk(&mut self, chunk: Chunk) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::StreamClosed);
        }

        let encoded = RpcCodec::encode(&chunk)?;
        send_data(&mut self.send, encoded).await?;

        trace!(
            "Sent {} bytes on H2 stream {}",
            chunk.len(),
            self.stream_id
        );
        Ok(())
    }

    async fn finish(&mut self) -> TransportResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        match self.role {
            StreamRole::Client => self.send.send_data(Bytes::new(), true),
            StreamRole::Server => self.send.send_trailers(Status::ok().to_header_map()),
        }
        .map_err(map_h2_error)
    }

    async fn abort(&mut self, status: Status) {
        if self.closed {
            return;
        }
        self.closed = true;

        match self.role {
            StreamRole::Client => self.send.send_reset(Reason::CANCEL),
            StreamRole::Server => {
                if self.send.send_trailers(status.to_header_map()).is_err() {
                    self.send.send_reset(Reason::INTERNAL_ERROR);
                }
            }
        }
    }
}

/// Receiving half of an HTTP/2 tunnel stream
pub struct H2ChunkReceiver {
    role: StreamRole,
    recv: RecvStream,
    stream_id: u32,
    buffer: BytesMut,
    ended: bool,
}

#[async_trait]
impl ChunkReceiver for H2ChunkReceiver {
    async fn recv_chunk(&mut self) -> TransportResult<Option<Chunk>> {
        loop {
            // Try to decode a message from the buffer
            if let Some(chunk) = RpcCodec::decode::<Chunk>(&mut self.buffer)? {
                trace!(
                    "Received {} bytes on H2 stream {}",
                    chunk.len(),
                    self.stream_id
                );
                return Ok(Some(chunk));
            }

            if self.ended {
                return Ok(None);
            }

            // Wait for more data from H2 stream
            match self.recv.data().await {
                Some(Ok(data)) => {
                    // Release flow control capacity
                    let _ = self.recv.flow_control().release_capacity(data.len());
                    self.buffer.extend_from_slice(&data);
                }
                Some(Err(e)) => {
                    self.ended = true;
                    return Err(map_h2_error(e));
                }
                None => {
                    self.ended = true;
                    if !self.buffer.is_empty() {
                        return Err(TransportError::ProtocolError(
                            "Incomplete message in buffer".to_string(),
                        ));
                    }
                    if self.role == StreamRole::Client {
                        self.check_trailers().await?;
                    }
                    return Ok(None);
                }
            }
        }
    }
}

impl H2ChunkReceiver {
    /// The server reports the call outcome in trailers after the last message
    async fn check_trailers(&mut self) -> TransportResult<()> {
        let trailers = self.recv.trailers().await.map_err(map_h2_error)?;
        match trailers.as_ref().and_then(Status::from_header_map) {
            Some(status) if !status.is_ok() => Err(TransportError::Status(status)),
            _ => Ok(()),
        }
    }
}

/// Send `data` on `send`, waiting for HTTP/2 flow control capacity as needed
pub(crate) async fn send_data(send: &mut SendStream<Bytes>, mut data: Bytes) -> TransportResult<()> {
    while !data.is_empty() {
        send.reserve_capacity(data.len());

        let mut available = send.capacity();
        while available == 0 {
            available = match poll_fn(|cx| send.poll_capacity(cx)).await {
                Some(Ok(n)) => n,
                Some(Err(e)) => return Err(map_h2_error(e)),
                None => return Err(TransportError::StreamClosed),
            };
        }

        let part = data.split_to(available.min(data.len()));
        send.send_data(part, false).map_err(map_h2_error)?;
    }
    Ok(())
}

pub(crate) fn map_h2_error(e: h2::Error) -> TransportError {
    if e.is_reset() {
        TransportError::StreamReset
    } else if e.is_io() {
        match e.into_io() {
            Some(io) => TransportError::IoError(io),
            None => TransportError::ConnectionError("H2 I/O error".to_string()),
        }
    } else {
        TransportError::ConnectionError(format!("H2 error: {}", e))
    }
}
