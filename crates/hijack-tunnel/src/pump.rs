//! Bidirectional stream pump
//!
//! Couples a byte stream (the TCP side) to a chunk stream (the RPC side). Each direction
//! runs on its own task:
//!
//! - TCP -> RPC: every read becomes one chunk holding exactly the bytes read. End of
//!   input finishes the RPC send side.
//! - RPC -> TCP: every chunk is written out in order. A clean end of the RPC stream shuts
//!   down the TCP write side.
//!
//! The first direction to stop decides the outcome. After an error the other direction
//! is cancelled right away and the RPC send side is aborted with a matching status. After
//! a clean stop the other direction may keep draining for the configured grace period.

use hijack_proto::{Chunk, Status};
use hijack_transport::{ChunkReceiver, ChunkSender, ChunkStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::PumpConfig;
use crate::error::{TunnelError, TunnelResult};
use crate::session::{Direction, PumpStats};

/// Pump for one session
#[derive(Debug, Clone)]
pub struct StreamPump {
    session_id: u64,
    config: PumpConfig,
}

impl StreamPump {
    pub fn new(session_id: u64, config: PumpConfig) -> Self {
        Self { session_id, config }
    }

    /// Move bytes both ways until the session ends.
    ///
    /// Returns the outcome of whichever direction stopped first. Both transports are
    /// released when this returns.
    pub async fn run<T, S>(self, tcp: T, stream: S) -> TunnelResult<PumpStats>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
        S: ChunkStream,
    {
        let session_id = self.session_id;
        let started = Instant::now();

        let (reader, writer) = tokio::io::split(tcp);
        let (sender, receiver) = stream.split();
        let (cancel_tx, cancel_rx) = watch::channel(None::<Status>);

        let bytes_tcp_to_rpc = Arc::new(AtomicU64::new(0));
        let bytes_rpc_to_tcp = Arc::new(AtomicU64::new(0));

        let mut tcp_to_rpc = tokio::spawn(pump_tcp_to_rpc(
            session_id,
            reader,
            sender,
            self.config.buffer_size,
            bytes_tcp_to_rpc.clone(),
            cancel_rx.clone(),
        ));
        let mut rpc_to_tcp = tokio::spawn(pump_rpc_to_tcp(
            session_id,
            receiver,
            writer,
            bytes_rpc_to_tcp.clone(),
            cancel_rx,
        ));

        let (first_stopped, outcome, remaining) = tokio::select! {
            result = &mut tcp_to_rpc => (Direction::TcpToRpc, flatten(result), rpc_to_tcp),
            result = &mut rpc_to_tcp => (Direction::RpcToTcp, flatten(result), tcp_to_rpc),
        };

        match &outcome {
            Ok(()) => {
                debug!(session_id, direction = %first_stopped, "Direction stopped cleanly, draining");
                let mut remaining = remaining;
                match tokio::time::timeout(self.config.shutdown_grace, &mut remaining).await {
                    Ok(result) => {
                        if let Err(e) = flatten(result) {
                            debug!(session_id, "Draining direction ended with error: {}", e);
                        }
                    }
                    Err(_) => {
                        debug!(session_id, "Grace period expired, cancelling other direction");
                        cancel_tx.send_replace(Some(Status::ok()));
                        stop(remaining, self.config.shutdown_grace).await;
                    }
                }
            }
            Err(e) => {
                debug!(session_id, direction = %first_stopped, "Direction failed: {}", e);
                cancel_tx.send_replace(Some(e.to_status()));
                stop(remaining, self.config.shutdown_grace).await;
            }
        }

        let stats = PumpStats {
            bytes_tcp_to_rpc: bytes_tcp_to_rpc.load(Ordering::Relaxed),
            bytes_rpc_to_tcp: bytes_rpc_to_tcp.load(Ordering::Relaxed),
            first_stopped,
            duration: started.elapsed(),
        };

        outcome.map(|_| stats)
    }
}

fn flatten(result: Result<TunnelResult<()>, tokio::task::JoinError>) -> TunnelResult<()> {
    result.map_err(TunnelError::from).and_then(|r| r)
}

/// Give a cancelled direction a bounded window to close its half, then abort it
async fn stop(handle: JoinHandle<TunnelResult<()>>, bound: Duration) {
    let abort_handle = handle.abort_handle();
    if tokio::time::timeout(bound, handle).await.is_err() {
        warn!("Pump direction did not stop in time, aborting");
        abort_handle.abort();
    }
}

/// Resolves with the status once the session asks this direction to stop
async fn cancelled(cancel: &mut watch::Receiver<Option<Status>>) -> Status {
    loop {
        if let Some(status) = cancel.borrow_and_update().clone() {
            return status;
        }
        if cancel.changed().await.is_err() {
            return Status::cancelled("session dropped");
        }
    }
}

async fn pump_tcp_to_rpc<R, Tx>(
    session_id: u64,
    mut reader: R,
    mut sender: Tx,
    buffer_size: usize,
    bytes: Arc<AtomicU64>,
    mut cancel: watch::Receiver<Option<Status>>,
) -> TunnelResult<()>
where
    R: AsyncRead + Unpin + Send,
    Tx: ChunkSender,
{
    let mut buffer = vec![0u8; buffer_size];

    let outcome = tokio::select! {
        result = copy_tcp_to_rpc(session_id, &mut reader, &mut sender, &mut buffer, &bytes) => Ok(result),
        status = cancelled(&mut cancel) => Err(status),
    };

    match outcome {
        Ok(Ok(())) => {
            debug!(session_id, "TCP side reached end of input, finishing RPC stream");
            sender.finish().await?;
            Ok(())
        }
        Ok(Err(e)) => {
            sender.abort(e.to_status()).await;
            Err(e)
        }
        Err(status) if status.is_ok() => {
            let _ = sender.finish().await;
            Ok(())
        }
        Err(status) => {
            sender.abort(status).await;
            Ok(())
        }
    }
}

async fn copy_tcp_to_rpc<R, Tx>(
    session_id: u64,
    reader: &mut R,
    sender: &mut Tx,
    buffer: &mut [u8],
    bytes: &AtomicU64,
) -> TunnelResult<()>
where
    R: AsyncRead + Unpin + Send,
    Tx: ChunkSender,
{
    loop {
        let n = reader.read(buffer).await?;
        if n == 0 {
            return Ok(());
        }

        sender.send_chunk(Chunk::from(&buffer[..n])).await?;
        bytes.fetch_add(n as u64, Ordering::Relaxed);
        trace!(session_id, "Forwarded {} bytes TCP -> RPC", n);
    }
}

async fn pump_rpc_to_tcp<Rx, W>(
    session_id: u64,
    mut receiver: Rx,
    mut writer: W,
    bytes: Arc<AtomicU64>,
    mut cancel: watch::Receiver<Option<Status>>,
) -> TunnelResult<()>
where
    Rx: ChunkReceiver,
    W: AsyncWrite + Unpin + Send,
{
    let outcome = tokio::select! {
        result = copy_rpc_to_tcp(session_id, &mut receiver, &mut writer, &bytes) => Some(result),
        _ = cancelled(&mut cancel) => None,
    };

    match outcome {
        Some(Ok(())) => {
            debug!(session_id, "RPC stream ended, shutting down TCP write side");
            if let Err(e) = writer.shutdown().await {
                debug!(session_id, "TCP shutdown failed: {}", e);
            }
            Ok(())
        }
        Some(Err(e)) => Err(e),
        None => Ok(()),
    }
}

async fn copy_rpc_to_tcp<Rx, W>(
    session_id: u64,
    receiver: &mut Rx,
    writer: &mut W,
    bytes: &AtomicU64,
) -> TunnelResult<()>
where
    Rx: ChunkReceiver,
    W: AsyncWrite + Unpin + Send,
{
    while let Some(chunk) = receiver.recv_chunk().await? {
        if chunk.is_empty() {
            continue;
        }

        writer.write_all(&chunk.data).await?;
        writer.flush().await?;
        bytes.fetch_add(chunk.len() as u64, Ordering::Relaxed);
        trace!(session_id, "Forwarded {} bytes RPC -> TCP", chunk.len());
    }
    Ok(())
}
