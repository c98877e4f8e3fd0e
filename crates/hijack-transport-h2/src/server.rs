//! HTTP/2 RPC server
//!
//! Accepts TCP connections, speaks HTTP/2 (prior knowledge, no TLS) and routes each
//! incoming stream to the [`TunnelService`] method named by its request path.

use bytes::{Bytes, BytesMut};
use h2::server::SendResponse;
use h2::RecvStream;
use hijack_proto::{
    HelloRequest, RpcCodec, Status, CONTENT_TYPE, HELLO_PATH, TUNNEL_PATH,
};
use hijack_transport::{TransportError, TransportResult, TunnelService};
use http::header::{HeaderValue, CONTENT_TYPE as CONTENT_TYPE_HEADER};
use http::{Method, Request, Response, StatusCode};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::config::H2Config;
use crate::stream::{map_h2_error, send_data, H2ChunkStream, StreamRole};

/// HTTP/2 RPC server bound to a local address
pub struct RpcServer {
    tcp_listener: TcpListener,
    config: Arc<H2Config>,
}

impl std::fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcServer")
            .field("local_addr", &self.tcp_listener.local_addr())
            .finish()
    }
}

impl RpcServer {
    /// Bind the server socket. Failing here is fatal for the caller.
    pub async fn bind(bind_addr: SocketAddr, config: Arc<H2Config>) -> TransportResult<Self> {
        config.validate()?;

        let tcp_listener =
            TcpListener::bind(bind_addr)
                .await
                .map_err(|e| TransportError::BindError {
                    address: bind_addr.ip().to_string(),
                    port: bind_addr.port(),
                    reason: e.to_string(),
                })?;

        let local_addr = tcp_listener.local_addr()?;
        info!("RPC server bound to {}", local_addr);

        Ok(Self {
            tcp_listener,
            config,
        })
    }

    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        self.tcp_listener
            .local_addr()
            .map_err(TransportError::IoError)
    }

    /// Serve until the listener fails
    pub async fn serve<S: TunnelService>(self, service: Arc<S>) -> TransportResult<()> {
        self.serve_with_shutdown(service, std::future::pending())
            .await
    }

    /// Serve until `shutdown` completes. Calls in flight keep running on their own tasks.
    pub async fn serve_with_shutdown<S, F>(
        self,
        service: Arc<S>,
        shutdown: F,
    ) -> TransportResult<()>
    where
        S: TunnelService,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.tcp_listener.accept() => {
                    match accepted {
                        Ok((tcp_stream, remote_addr)) => {
                            debug!("Incoming TCP connection from {}", remote_addr);
                            let service = service.clone();
                            let config = self.config.clone();
                            tokio::spawn(async move {
                                if let Err(e) =
                                    serve_connection(tcp_stream, remote_addr, service, config).await
                                {
                                    warn!("RPC connection from {} failed: {}", remote_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept RPC connection: {}", e);
                        }
                    }
                }
                _ = &mut shutdown => {
                    info!("RPC server shutting down");
                    return Ok(());
                }
            }
        }
    }
}

async fn serve_connection<S: TunnelService>(
    tcp_stream: TcpStream,
    remote_addr: SocketAddr,
    service: Arc<S>,
    config: Arc<H2Config>,
) -> TransportResult<()> {
    let _ = tcp_stream.set_nodelay(true);

    let mut h2_conn = config
        .server_builder()
        .handshake::<_, Bytes>(tcp_stream)
        .await
        .map_err(|e| TransportError::ConnectionError(format!("H2 handshake failed: {}", e)))?;

    info!("HTTP/2 connection established from {}", remote_addr);

    // Accepting also drives the connection; calls run on their own tasks
    while let Some(result) = h2_conn.accept().await {
        match result {
            Ok((request, respond)) => {
                let service = service.clone();
                tokio::spawn(async move {
                    handle_call(service, request, respond).await;
                });
            }
            Err(e) => {
                if e.is_go_away() || e.is_io() {
                    debug!("H2 connection from {} closed: {}", remote_addr, e);
                    return Ok(());
                }
                return Err(map_h2_error(e));
            }
        }
    }

    debug!("H2 connection from {} closed", remote_addr);
    Ok(())
}

async fn handle_call<S: TunnelService>(
    service: Arc<S>,
    request: Request<RecvStream>,
    mut respond: SendResponse<Bytes>,
) {
    let path = request.uri().path().to_string();

    if *request.method() != Method::POST {
        reject(
            &mut respond,
            Status::unimplemented(format!("method {} not supported", request.method())),
        );
        return;
    }

    let result = match path.as_str() {
        HELLO_PATH => handle_hello(service, request, &mut respond).await,
        TUNNEL_PATH => handle_tunnel(service, request, &mut respond).await,
        _ => {
            debug!("Unknown RPC path {}", path);
            reject(
                &mut respond,
                Status::unimplemented(format!("unknown method {}", path)),
            );
            Ok(())
        }
    };

    if let Err(e) = result {
        warn!("RPC call {} failed: {}", path, e);
    }
}

async fn handle_hello<S: TunnelService>(
    service: Arc<S>,
    request: Request<RecvStream>,
    respond: &mut SendResponse<Bytes>,
) -> TransportResult<()> {
    let mut body = request.into_body();
    let mut buffer = BytesMut::new();

    let hello = loop {
        if let Some(hello) = RpcCodec::decode::<HelloRequest>(&mut buffer)? {
            break hello;
        }
        match body.data().await {
            Some(Ok(data)) => {
                let _ = body.flow_control().release_capacity(data.len());
                buffer.extend_from_slice(&data);
            }
            Some(Err(e)) => return Err(map_h2_error(e)),
            None => {
                reject(respond, Status::invalid_argument("missing request message"));
                return Ok(());
            }
        }
    };

    debug!("Handshake from {}", hello.name);

    match service.hello(hello).await {
        Ok(reply) => {
            let mut send = respond
                .send_response(ok_response(), false)
                .map_err(map_h2_error)?;
            send_data(&mut send, RpcCodec::encode(&reply)?).await?;
            send.send_trailers(Status::ok().to_header_map())
                .map_err(map_h2_error)
        }
        Err(status) => {
            reject(respond, status);
            Ok(())
        }
    }
}

async fn handle_tunnel<S: TunnelService>(
    service: Arc<S>,
    request: Request<RecvStream>,
    respond: &mut SendResponse<Bytes>,
) -> TransportResult<()> {
    let (parts, body) = request.into_parts();

    let session = match service.accept_tunnel(&parts.headers).await {
        Ok(session) => session,
        Err(status) => {
            reject(respond, status);
            return Ok(());
        }
    };

    let send = respond
        .send_response(ok_response(), false)
        .map_err(map_h2_error)?;
    let stream = H2ChunkStream::new(StreamRole::Server, send, body);

    service.run_tunnel(session, stream).await;
    Ok(())
}

fn ok_response() -> Response<()> {
    let mut response = Response::new(());
    *response.status_mut() = StatusCode::OK;
    response
        .headers_mut()
        .insert(CONTENT_TYPE_HEADER, HeaderValue::from_static(CONTENT_TYPE));
    response
}

/// Answer with a trailers-only response carrying `status`
fn reject(respond: &mut SendResponse<Bytes>, status: Status) {
    debug!("Rejecting call: {}", status);

    let mut response = ok_response();
    response.headers_mut().extend(status.to_header_map());

    if let Err(e) = respond.send_response(response, true) {
        debug!("Failed to send rejection: {}", e);
    }
}
