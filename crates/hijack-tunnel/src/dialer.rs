//! Destination dialer (server role)
//!
//! Serves the tunnel RPC service. Each incoming tunnel stream names its destination in
//! metadata; the dialer resolves it, connects, and pumps bytes between the two until
//! the session ends. A stream is only accepted once the destination connection exists.

use async_trait::async_trait;
use hijack_proto::{DestinationDescriptor, HelloReply, HelloRequest, Status};
use hijack_transport::{ChunkStream, TunnelService};
use http::HeaderMap;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::config::DialerConfig;
use crate::error::{TunnelError, TunnelResult};
use crate::pump::StreamPump;
use crate::session::{DialerState, SessionIdGenerator};

/// Opens the byte stream to a destination
#[async_trait]
pub trait DestinationConnector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + 'static;

    async fn connect(&self, destination: &DestinationDescriptor) -> TunnelResult<Self::Stream>;
}

/// Plain TCP dial bounded by a timeout
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl DestinationConnector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, destination: &DestinationDescriptor) -> TunnelResult<TcpStream> {
        let address = destination.address();

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| TunnelError::DialTimeout(address.clone()))?
            .map_err(|source| TunnelError::Dial {
                address: address.clone(),
                source,
            })?;
        let _ = stream.set_nodelay(true);

        Ok(stream)
    }
}

/// State of an accepted tunnel: the destination is already connected
pub struct DialerSession<T> {
    session_id: u64,
    destination: DestinationDescriptor,
    connection: T,
}

impl<T> DialerSession<T> {
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn destination(&self) -> &DestinationDescriptor {
        &self.destination
    }
}

/// Tunnel RPC service that dials the requested destination
pub struct Dialer<C = TcpConnector> {
    config: DialerConfig,
    connector: C,
    session_ids: SessionIdGenerator,
}

impl Dialer<TcpConnector> {
    pub fn new(config: DialerConfig) -> Self {
        let connector = TcpConnector::new(config.connect_timeout);
        Self::with_connector(config, connector)
    }
}

impl<C: DestinationConnector> Dialer<C> {
    pub fn with_connector(config: DialerConfig, connector: C) -> Self {
        Self {
            config,
            connector,
            session_ids: SessionIdGenerator::new(),
        }
    }
}

#[async_trait]
impl<C: DestinationConnector> TunnelService for Dialer<C> {
    type Session = DialerSession<C::Stream>;

    async fn hello(&self, request: HelloRequest) -> Result<HelloReply, Status> {
        info!("Handshake from {}", request.name);
        Ok(HelloReply::greet(&request))
    }

    async fn accept_tunnel(&self, metadata: &HeaderMap) -> Result<Self::Session, Status> {
        let session_id = self.session_ids.generate();
        debug!(session_id, state = %DialerState::StreamReceived, "Session state");

        let destination = DestinationDescriptor::from_metadata(metadata).map_err(|e| {
            let err = TunnelError::from(e);
            warn!(session_id, "Rejecting tunnel stream: {}", err);
            err.to_status()
        })?;
        debug!(
            session_id,
            state = %DialerState::AddressResolved,
            "Destination {}", destination
        );

        let connection = self.connector.connect(&destination).await.map_err(|e| {
            warn!(session_id, "Failed to dial {}: {}", destination, e);
            e.to_status()
        })?;
        debug!(
            session_id,
            state = %DialerState::DestinationDialed,
            "Connected to {}", destination
        );

        Ok(DialerSession {
            session_id,
            destination,
            connection,
        })
    }

    async fn run_tunnel<S>(&self, session: Self::Session, stream: S)
    where
        S: ChunkStream,
    {
        let DialerSession {
            session_id,
            destination,
            connection,
        } = session;

        debug!(
            session_id,
            state = %DialerState::Pumping,
            rpc_stream = stream.stream_id(),
            "Session state"
        );

        match StreamPump::new(session_id, self.config.pump)
            .run(connection, stream)
            .await
        {
            Ok(stats) => info!(
                session_id,
                bytes_out = stats.bytes_tcp_to_rpc,
                bytes_in = stats.bytes_rpc_to_tcp,
                first_stopped = %stats.first_stopped,
                duration_ms = stats.duration.as_millis() as u64,
                "Session to {} closed", destination
            ),
            Err(e) => warn!(session_id, "Session to {} failed: {}", destination, e),
        }

        debug!(session_id, state = %DialerState::Closed, "Session state");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hijack_proto::{Code, CONNECT_IP_KEY, CONNECT_PORT_KEY};
    use http::HeaderValue;
    use tokio::net::TcpListener;

    fn metadata(host: &'static str, port: &str) -> HeaderMap {
        let mut metadata = HeaderMap::new();
        metadata.insert(CONNECT_IP_KEY, HeaderValue::from_static(host));
        metadata.insert(CONNECT_PORT_KEY, HeaderValue::from_str(port).unwrap());
        metadata
    }

    #[tokio::test]
    async fn test_hello_greets() {
        let dialer = Dialer::new(DialerConfig::default());
        let reply = dialer
            .hello(HelloRequest {
                name: "client".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(reply.name, "Hello client");
    }

    #[tokio::test]
    async fn test_accept_dials_destination() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port().to_string();

        let dialer = Dialer::new(DialerConfig::default());
        let session = dialer
            .accept_tunnel(&metadata("127.0.0.1", &port))
            .await
            .unwrap();

        assert_eq!(session.destination().port, port);
        assert!(listener.accept().await.is_ok());
    }

    #[tokio::test]
    async fn test_dial_failure_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port().to_string();
        drop(listener);

        let dialer = Dialer::new(DialerConfig::default());
        let status = match dialer.accept_tunnel(&metadata("127.0.0.1", &port)).await {
            Err(status) => status,
            Ok(_) => panic!("Expected dial failure"),
        };
        assert_eq!(status.code(), Code::Unavailable);
    }

    #[tokio::test]
    async fn test_unparseable_port_is_unavailable() {
        let dialer = Dialer::new(DialerConfig::default());
        let status = match dialer.accept_tunnel(&metadata("127.0.0.1", "not-a-port")).await {
            Err(status) => status,
            Ok(_) => panic!("Expected dial failure"),
        };
        assert_eq!(status.code(), Code::Unavailable);
    }

    #[tokio::test]
    async fn test_session_ids_increase() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port().to_string();

        let dialer = Dialer::new(DialerConfig::default());
        let first = dialer
            .accept_tunnel(&metadata("127.0.0.1", &port))
            .await
            .unwrap();
        let second = dialer
            .accept_tunnel(&metadata("127.0.0.1", &port))
            .await
            .unwrap();
        assert!(second.session_id() > first.session_id());
    }
}
