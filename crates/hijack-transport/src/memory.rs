//! In-process chunk streams
//!
//! Two connected [`MemoryStream`] ends behave like the two sides of one RPC tunnel
//! stream: chunks arrive in order, `finish` is seen as a clean end and `abort` as an
//! error carrying the status. Dropping a sender without closing it looks like a reset.

use async_trait::async_trait;
use hijack_proto::{Chunk, Status};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use crate::{ChunkReceiver, ChunkSender, ChunkStream, TransportError, TransportResult};

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
enum Frame {
    Data(Chunk),
    End,
    Abort(Status),
}

/// One end of an in-process chunk stream
#[derive(Debug)]
pub struct MemoryStream {
    id: u64,
    tx: mpsc::Sender<Frame>,
    rx: mpsc::Receiver<Frame>,
}

/// Create two connected stream ends. `capacity` bounds the chunks in flight per direction.
pub fn memory_stream_pair(capacity: usize) -> (MemoryStream, MemoryStream) {
    let (a_tx, b_rx) = mpsc::channel(capacity);
    let (b_tx, a_rx) = mpsc::channel(capacity);
    let a = MemoryStream {
        id: NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed),
        tx: a_tx,
        rx: a_rx,
    };
    let b = MemoryStream {
        id: NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed),
        tx: b_tx,
        rx: b_rx,
    };
    (a, b)
}

impl ChunkStream for MemoryStream {
    type Sender = MemorySender;
    type Receiver = MemoryReceiver;

    fn stream_id(&self) -> u64 {
        self.id
    }

    fn split(self) -> (MemorySender, MemoryReceiver) {
        (
            MemorySender {
                tx: self.tx,
                closed: false,
            },
            MemoryReceiver {
                rx: self.rx,
                ended: false,
            },
        )
    }
}

/// Sending half of a [`MemoryStream`]
#[derive(Debug)]
pub struct MemorySender {
    tx: mpsc::Sender<Frame>,
    closed: bool,
}

#[async_trait]
impl ChunkSender for MemorySender {
    async fn send_chunk(&mut self, chunk: Chunk) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::StreamClosed);
        }
        self.tx
            .send(Frame::Data(chunk))
            .await
            .map_err(|_| TransportError::StreamClosed)
    }

    async fn finish(&mut self) -> TransportResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.tx
            .send(Frame::End)
            .await
            .map_err(|_| TransportError::StreamClosed)
    }

    async fn abort(&mut self, status: Status) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.tx.send(Frame::Abort(status)).await;
    }
}

/// Receiving half of a [`MemoryStream`]
#[derive(Debug)]
pub struct MemoryReceiver {
    rx: mpsc::Receiver<Frame>,
    ended: bool,
}

#[async_trait]
impl ChunkReceiver for MemoryReceiver {
    async fn recv_chunk(&mut self) -> TransportResult<Option<Chunk>> {
        if self.ended {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(Frame::Data(chunk)) => Ok(Some(chunk)),
            Some(Frame::End) => {
                self.ended = true;
                Ok(None)
            }
            Some(Frame::Abort(status)) => {
                self.ended = true;
                Err(TransportError::Status(status))
            }
            None => Err(TransportError::StreamReset),
        }
    }
}
