//! Ingress listener (client role)
//!
//! Accepts TCP connections on a local endpoint. Every connection gets its own tunnel
//! stream, tagged with the configured destination, and its own pump.

use hijack_proto::DestinationDescriptor;
use hijack_transport::{ChunkStream, TunnelOpener};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{IngressConfig, PumpConfig};
use crate::error::{TunnelError, TunnelResult};
use crate::pump::StreamPump;
use crate::session::{IngressState, PumpStats, SessionIdGenerator};

/// Local TCP listener feeding tunnel streams
pub struct IngressListener<O: TunnelOpener> {
    config: IngressConfig,
    opener: Arc<O>,
    session_ids: SessionIdGenerator,
}

/// Running listener. Returned once the socket is bound; dropping it stops the listener.
#[derive(Debug)]
pub struct IngressHandle {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl IngressHandle {
    /// Address the listener is bound to; connect here to ride the tunnel
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting. Sessions already running finish on their own.
    pub async fn shutdown(mut self) -> TunnelResult<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        (&mut self.task).await.map_err(|e| {
            error!("Ingress accept loop failed on {}: {}", self.local_addr, e);
            TunnelError::from(e)
        })
    }

    /// Wait for the accept loop to end
    pub async fn wait(mut self) -> TunnelResult<()> {
        let result = (&mut self.task).await;
        // Keep the shutdown sender alive until the loop has ended
        drop(self.shutdown_tx.take());
        result.map_err(TunnelError::from)
    }
}

impl<O: TunnelOpener> IngressListener<O> {
    pub fn new(config: IngressConfig, opener: Arc<O>) -> Self {
        Self {
            config,
            opener,
            session_ids: SessionIdGenerator::new(),
        }
    }

    /// Bind the listener and start accepting in the background.
    ///
    /// Bind failure is fatal and returned here; once this returns `Ok` the listener is
    /// ready for connections.
    pub async fn start(self) -> TunnelResult<IngressHandle> {
        self.config.validate()?;

        let listener = bind_with_retry(self.config.listen_addr).await?;
        let local_addr = listener.local_addr()?;

        info!(
            "Ingress listening on {} (destination {})",
            local_addr, self.config.destination
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(self.accept_loop(listener, shutdown_rx));

        Ok(IngressHandle {
            local_addr,
            shutdown_tx: Some(shutdown_tx),
            task,
        })
    }

    async fn accept_loop(self, listener: TcpListener, mut shutdown_rx: oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            let session_id = self.session_ids.generate();
                            let opener = self.opener.clone();
                            let destination = self.config.destination.clone();
                            let pump = self.config.pump;

                            tokio::spawn(async move {
                                match handle_connection(
                                    session_id,
                                    stream,
                                    peer_addr,
                                    opener,
                                    destination,
                                    pump,
                                )
                                .await
                                {
                                    Ok(stats) => info!(
                                        session_id,
                                        bytes_out = stats.bytes_tcp_to_rpc,
                                        bytes_in = stats.bytes_rpc_to_tcp,
                                        first_stopped = %stats.first_stopped,
                                        duration_ms = stats.duration.as_millis() as u64,
                                        "Session from {} closed", peer_addr
                                    ),
                                    Err(e) => warn!(
                                        session_id,
                                        "Session from {} failed: {}", peer_addr, e
                                    ),
                                }
                                debug!(session_id, state = %IngressState::Closed, "Session state");
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept TCP connection: {}", e);
                        }
                    }
                }
                _ = &mut shutdown_rx => {
                    info!("Ingress listener shutting down");
                    return;
                }
            }
        }
    }
}

async fn handle_connection<O: TunnelOpener>(
    session_id: u64,
    stream: TcpStream,
    peer_addr: SocketAddr,
    opener: Arc<O>,
    destination: DestinationDescriptor,
    pump: PumpConfig,
) -> TunnelResult<PumpStats> {
    debug!(
        session_id,
        state = %IngressState::Accepted,
        "New TCP connection from {}", peer_addr
    );
    let _ = stream.set_nodelay(true);

    let tunnel = opener.open_tunnel(&destination).await?;
    debug!(
        session_id,
        state = %IngressState::StreamOpened,
        rpc_stream = tunnel.stream_id(),
        "Tunnel stream opened to {}", destination
    );

    debug!(session_id, state = %IngressState::Pumping, "Session state");
    StreamPump::new(session_id, pump).run(stream, tunnel).await
}

/// Bind, retrying while the port is still in use (TIME_WAIT)
async fn bind_with_retry(bind_addr: SocketAddr) -> TunnelResult<TcpListener> {
    // Up to 3 attempts with 1 second delays
    for attempt in 1..=3 {
        match TcpListener::bind(bind_addr).await {
            Ok(listener) => {
                if attempt > 1 {
                    info!("Successfully bound to {} on attempt {}/3", bind_addr, attempt);
                }
                return Ok(listener);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse && attempt < 3 => {
                warn!(
                    "Port {} is in use (attempt {}/3, may be in TIME_WAIT state), retrying in 1 second...",
                    bind_addr.port(),
                    attempt
                );
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
            Err(e) => {
                return Err(TunnelError::BindError {
                    address: bind_addr.ip().to_string(),
                    port: bind_addr.port(),
                    reason: e.to_string(),
                });
            }
        }
    }

    Err(TunnelError::BindError {
        address: bind_addr.ip().to_string(),
        port: bind_addr.port(),
        reason: "Address in use after 3 retry attempts".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hijack_transport::{memory_stream_pair, MemoryStream, TransportError, TransportResult};
    use std::time::Duration;

    /// Opener whose streams lead nowhere
    struct RefusingOpener;

    #[async_trait]
    impl TunnelOpener for RefusingOpener {
        type Stream = MemoryStream;

        async fn open_tunnel(
            &self,
            _destination: &DestinationDescriptor,
        ) -> TransportResult<MemoryStream> {
            Err(TransportError::ConnectionError("refused".to_string()))
        }
    }

    /// Opener that hands its peer ends to the test
    struct PairOpener {
        peers: tokio::sync::mpsc::UnboundedSender<MemoryStream>,
    }

    #[async_trait]
    impl TunnelOpener for PairOpener {
        type Stream = MemoryStream;

        async fn open_tunnel(
            &self,
            _destination: &DestinationDescriptor,
        ) -> TransportResult<MemoryStream> {
            let (local, peer) = memory_stream_pair(16);
            self.peers
                .send(peer)
                .map_err(|_| TransportError::StreamClosed)?;
            Ok(local)
        }
    }

    fn config() -> IngressConfig {
        IngressConfig::new(
            "127.0.0.1:0".parse().unwrap(),
            DestinationDescriptor::new("localhost", "2222"),
        )
    }

    #[tokio::test]
    async fn test_bind_failure_is_fatal() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = config();
        config.listen_addr = taken.local_addr().unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            IngressListener::new(config, Arc::new(RefusingOpener)).start(),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(TunnelError::BindError { .. })));
    }

    #[tokio::test]
    async fn test_open_failure_closes_only_that_connection() {
        use tokio::io::AsyncReadExt;

        let handle = IngressListener::new(config(), Arc::new(RefusingOpener))
            .start()
            .await
            .unwrap();

        for _ in 0..3 {
            let mut client = TcpStream::connect(handle.local_addr()).await.unwrap();
            let mut buf = [0u8; 4];
            let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
                .await
                .unwrap()
                .unwrap_or(0);
            assert_eq!(n, 0);
        }

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_reports_failed_accept_loop() {
        let handle = IngressHandle {
            local_addr: "127.0.0.1:0".parse().unwrap(),
            shutdown_tx: None,
            task: tokio::spawn(async { panic!("accept loop failed") }),
        };

        assert!(matches!(handle.shutdown().await, Err(TunnelError::Join(_))));
    }

    #[tokio::test]
    async fn test_each_connection_gets_its_own_stream() {
        use hijack_transport::ChunkReceiver;
        use tokio::io::AsyncWriteExt;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = IngressListener::new(config(), Arc::new(PairOpener { peers: tx }))
            .start()
            .await
            .unwrap();

        let mut first = TcpStream::connect(handle.local_addr()).await.unwrap();
        let mut second = TcpStream::connect(handle.local_addr()).await.unwrap();

        let peer_a = rx.recv().await.unwrap();
        let peer_b = rx.recv().await.unwrap();
        assert_ne!(peer_a.stream_id(), peer_b.stream_id());

        first.write_all(b"one").await.unwrap();
        second.write_all(b"two").await.unwrap();

        let (_send_a, mut recv_a) = peer_a.split();
        let (_send_b, mut recv_b) = peer_b.split();
        let mut seen = vec![
            recv_a.recv_chunk().await.unwrap().unwrap().data,
            recv_b.recv_chunk().await.unwrap().unwrap().data,
        ];
        seen.sort();
        assert_eq!(seen, vec![b"one".to_vec(), b"two".to_vec()]);

        handle.shutdown().await.unwrap();
    }
}
