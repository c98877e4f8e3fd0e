//! RPC client/server tests over loopback HTTP/2

use async_trait::async_trait;
use bytes::Bytes;
use hijack_proto::{
    Chunk, Code, DestinationDescriptor, HelloReply, HelloRequest, Status, CONNECT_IP_KEY,
};
use hijack_transport::{
    ChunkReceiver, ChunkSender, ChunkStream, TransportError, TunnelService,
};
use hijack_transport_h2::{H2Config, RpcClient, RpcServer};
use http::HeaderMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Echoes every chunk back, then finishes when the client finishes
#[derive(Default)]
struct EchoService {
    accepted: AtomicUsize,
}

#[async_trait]
impl TunnelService for EchoService {
    type Session = DestinationDescriptor;

    async fn hello(&self, request: HelloRequest) -> Result<HelloReply, Status> {
        if request.name.is_empty() {
            return Err(Status::invalid_argument("name required"));
        }
        Ok(HelloReply::greet(&request))
    }

    async fn accept_tunnel(&self, metadata: &HeaderMap) -> Result<Self::Session, Status> {
        let destination = DestinationDescriptor::from_metadata(metadata)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        self.accepted.fetch_add(1, Ordering::SeqCst);
        Ok(destination)
    }

    async fn run_tunnel<S>(&self, _session: Self::Session, stream: S)
    where
        S: ChunkStream,
    {
        let (mut send, mut recv) = stream.split();
        while let Ok(Some(chunk)) = recv.recv_chunk().await {
            if send.send_chunk(chunk).await.is_err() {
                return;
            }
        }
        let _ = send.finish().await;
    }
}

async fn start_server(service: Arc<EchoService>) -> String {
    let server = RpcServer::bind(
        "127.0.0.1:0".parse().unwrap(),
        Arc::new(H2Config::server_default()),
    )
    .await
    .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.serve(service));
    addr.to_string()
}

async fn connect(addr: &str) -> RpcClient {
    RpcClient::connect(addr, Arc::new(H2Config::client_default()))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_hello_round_trip() {
    let addr = start_server(Arc::new(EchoService::default())).await;
    let client = connect(&addr).await;

    let reply = client.hello("client").await.unwrap();
    assert_eq!(reply.name, "Hello client");
}

#[tokio::test]
async fn test_hello_rejected_with_status() {
    let addr = start_server(Arc::new(EchoService::default())).await;
    let client = connect(&addr).await;

    match client.hello("").await {
        Err(TransportError::Status(status)) => assert_eq!(status.code(), Code::InvalidArgument),
        other => panic!("Expected status error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_hello_times_out_against_silent_server() {
    // Accepts TCP but never speaks HTTP/2
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let config = H2Config::client_default().with_handshake_timeout(Duration::from_millis(200));
    let client = RpcClient::connect(&addr, Arc::new(config)).await.unwrap();

    let result = client.hello("client").await;
    assert!(matches!(result, Err(TransportError::Timeout)));
}

#[tokio::test]
async fn test_tunnel_stream_echo_and_finish() {
    let service = Arc::new(EchoService::default());
    let addr = start_server(service.clone()).await;
    let client = connect(&addr).await;

    let stream = client
        .open_stream(&DestinationDescriptor::new("localhost", "2222"))
        .await
        .unwrap();
    let (mut send, mut recv) = stream.split();

    for payload in [&b"PING"[..], &[0u8; 40_000][..], &b"last"[..]] {
        send.send_chunk(Chunk::from(payload)).await.unwrap();
        let echoed = tokio::time::timeout(Duration::from_secs(5), recv.recv_chunk())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(echoed.data, payload);
    }

    send.finish().await.unwrap();
    let end = tokio::time::timeout(Duration::from_secs(5), recv.recv_chunk())
        .await
        .unwrap()
        .unwrap();
    assert!(end.is_none());
    assert_eq!(service.accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_tunnel_without_metadata_is_rejected() {
    let service = Arc::new(EchoService::default());
    let addr = start_server(service.clone()).await;

    // Raw h2 call without destination headers
    let tcp = tokio::net::TcpStream::connect(&addr).await.unwrap();
    let (send_request, conn) = h2::client::handshake(tcp).await.unwrap();
    tokio::spawn(conn);

    let request = http::Request::builder()
        .method("POST")
        .uri(format!("http://{}{}", addr, hijack_proto::TUNNEL_PATH))
        .header(CONNECT_IP_KEY, "127.0.0.1")
        .body(())
        .unwrap();
    let mut ready = send_request.ready().await.unwrap();
    let (response, _send) = ready.send_request(request, false).unwrap();
    let response = response.await.unwrap();

    let status = Status::from_header_map(response.headers()).unwrap();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert!(status.message().contains("connect_port"));
    assert_eq!(service.accepted.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_method_is_unimplemented() {
    let addr = start_server(Arc::new(EchoService::default())).await;

    let tcp = tokio::net::TcpStream::connect(&addr).await.unwrap();
    let (send_request, conn) = h2::client::handshake(tcp).await.unwrap();
    tokio::spawn(conn);

    let request = http::Request::builder()
        .method("POST")
        .uri(format!("http://{}/hijack.HTService/Nope", addr))
        .body(())
        .unwrap();
    let mut ready = send_request.ready().await.unwrap();
    let (response, mut send) = ready.send_request(request, false).unwrap();
    send.send_data(Bytes::new(), true).unwrap();
    let response = response.await.unwrap();

    let status = Status::from_header_map(response.headers()).unwrap();
    assert_eq!(status.code(), Code::Unimplemented);
}

#[tokio::test]
async fn test_concurrent_streams_on_one_connection() {
    let addr = start_server(Arc::new(EchoService::default())).await;
    let client = connect(&addr).await;

    let mut tasks = Vec::new();
    for i in 0..8u8 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            let stream = client
                .open_stream(&DestinationDescriptor::new("localhost", "2222"))
                .await
                .unwrap();
            let (mut send, mut recv) = stream.split();
            let payload = vec![i; 1000];
            send.send_chunk(Chunk::new(payload.clone())).await.unwrap();
            let echoed = recv.recv_chunk().await.unwrap().unwrap();
            assert_eq!(echoed.data, payload);
            send.finish().await.unwrap();
        }));
    }

    for task in tasks {
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
