//! HTTP/2 RPC client
//!
//! One HTTP/2 connection to the RPC server carries every call; each tunnel session gets
//! its own stream on it.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use h2::client::{ResponseFuture, SendRequest};
use hijack_proto::{
    DestinationDescriptor, HelloReply, HelloRequest, RpcCodec, Status, CONTENT_TYPE,
    HELLO_PATH, TUNNEL_PATH,
};
use hijack_transport::{TransportError, TransportResult, TunnelOpener};
use http::header::{HeaderValue, CONTENT_TYPE as CONTENT_TYPE_HEADER, TE};
use http::{Method, Request, Response};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::config::H2Config;
use crate::stream::{map_h2_error, send_data, H2ChunkStream, StreamRole};

/// Client-side HTTP/2 RPC connection
#[derive(Clone)]
pub struct RpcClient {
    connection_id: String,
    authority: String,
    send_request: SendRequest<Bytes>,
    config: Arc<H2Config>,
    closed: watch::Receiver<bool>,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("connection_id", &self.connection_id)
            .field("authority", &self.authority)
            .finish()
    }
}

impl RpcClient {
    /// Dial the RPC server at `addr` (`host:port`) and complete the HTTP/2 handshake
    pub async fn connect(addr: &str, config: Arc<H2Config>) -> TransportResult<Self> {
        config.validate()?;

        debug!("Connecting to RPC server {}", addr);

        let tcp_stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::ConnectionError(format!("TCP connect failed: {}", e)))?;
        let _ = tcp_stream.set_nodelay(true);

        let (send_request, h2_conn) = config
            .client_builder()
            .handshake::<_, Bytes>(tcp_stream)
            .await
            .map_err(|e| TransportError::ConnectionError(format!("H2 handshake failed: {}", e)))?;

        let connection_id = format!("h2-client-{}", uuid::Uuid::new_v4());
        let (closed_tx, closed) = watch::channel(false);

        // Spawn connection driver
        let conn_id = connection_id.clone();
        tokio::spawn(async move {
            if let Err(e) = h2_conn.await {
                if !e.is_go_away() && !e.is_io() {
                    error!("[{}] H2 connection error: {}", conn_id, e);
                }
            }
            debug!("[{}] H2 connection closed", conn_id);
            let _ = closed_tx.send(true);
        });

        info!("HTTP/2 connection established to {}", addr);

        Ok(Self {
            connection_id,
            authority: addr.to_string(),
            send_request,
            config,
            closed,
        })
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Completes once the HTTP/2 connection has ended
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        // An error means the driver is gone, which is closed too
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Unary handshake, bounded by the configured handshake timeout
    pub async fn hello(&self, name: &str) -> TransportResult<HelloReply> {
        let request = HelloRequest {
            name: name.to_string(),
        };
        tokio::time::timeout(self.config.handshake_timeout, self.call_hello(request))
            .await
            .map_err(|_| TransportError::Timeout)?
    }

    async fn call_hello(&self, hello: HelloRequest) -> TransportResult<HelloReply> {
        let request = self.build_request(HELLO_PATH)?;
        let (response, mut send) = self.start_call(request).await?;

        send_data(&mut send, RpcCodec::encode(&hello)?).await?;
        send.send_data(Bytes::new(), true).map_err(map_h2_error)?;

        let response = accept_response(response.await.map_err(map_h2_error)?)?;
        let mut body = response.into_body();
        let mut buffer = BytesMut::new();
        let mut reply = None;

        while let Some(data) = body.data().await {
            let data = data.map_err(map_h2_error)?;
            let _ = body.flow_control().release_capacity(data.len());
            buffer.extend_from_slice(&data);
            if reply.is_none() {
                reply = RpcCodec::decode::<HelloReply>(&mut buffer)?;
            }
        }

        let trailers = body.trailers().await.map_err(map_h2_error)?;
        if let Some(status) = trailers.as_ref().and_then(Status::from_header_map) {
            if !status.is_ok() {
                return Err(TransportError::Status(status));
            }
        }

        reply.ok_or_else(|| TransportError::ProtocolError("missing reply message".to_string()))
    }

    /// Open a tunnel stream tagged with `destination`.
    ///
    /// Resolves once the server has accepted the call (it has dialed the destination).
    pub async fn open_stream(
        &self,
        destination: &DestinationDescriptor,
    ) -> TransportResult<H2ChunkStream> {
        let mut request = self.build_request(TUNNEL_PATH)?;
        destination
            .write_to(request.headers_mut())
            .map_err(|e| TransportError::ProtocolError(e.to_string()))?;

        let (response, send) = self.start_call(request).await?;
        let stream_id = send.stream_id().as_u32();

        let response = accept_response(response.await.map_err(map_h2_error)?)?;

        debug!(
            "[{}] Opened tunnel stream {} to {}",
            self.connection_id, stream_id, destination
        );

        Ok(H2ChunkStream::new(
            StreamRole::Client,
            send,
            response.into_body(),
        ))
    }

    fn build_request(&self, path: &str) -> TransportResult<Request<()>> {
        Request::builder()
            .method(Method::POST)
            .uri(format!("http://{}{}", self.authority, path))
            .header(CONTENT_TYPE_HEADER, HeaderValue::from_static(CONTENT_TYPE))
            .header(TE, HeaderValue::from_static("trailers"))
            .body(())
            .map_err(|e| TransportError::ProtocolError(format!("Invalid request: {}", e)))
    }

    async fn start_call(
        &self,
        request: Request<()>,
    ) -> TransportResult<(ResponseFuture, h2::SendStream<Bytes>)> {
        if self.is_closed() {
            return Err(TransportError::ConnectionError(
                "Connection closed".to_string(),
            ));
        }

        // Wait for the connection to be ready
        let mut ready = self.send_request.clone().ready().await.map_err(|e| {
            TransportError::ConnectionError(format!("H2 connection not ready: {}", e))
        })?;

        ready
            .send_request(request, false)
            .map_err(|e| TransportError::ConnectionError(format!("Failed to start call: {}", e)))
    }
}

/// Check response headers; a status here means the call was rejected outright
fn accept_response<T>(response: Response<T>) -> TransportResult<Response<T>> {
    if !response.status().is_success() {
        return Err(TransportError::ProtocolError(format!(
            "Server returned HTTP {}",
            response.status()
        )));
    }
    if let Some(status) = Status::from_header_map(response.headers()) {
        if !status.is_ok() {
            return Err(TransportError::Status(status));
        }
    }
    Ok(response)
}

#[async_trait]
impl TunnelOpener for RpcClient {
    type Stream = H2ChunkStream;

    async fn open_tunnel(
        &self,
        destination: &DestinationDescriptor,
    ) -> TransportResult<Self::Stream> {
        self.open_stream(destination).await
    }
}
