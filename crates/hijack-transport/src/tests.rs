//! Tests for transport abstraction layer

use super::*;
use hijack_proto::Code;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Mock opener counting how many streams were requested
struct MockOpener {
    opened: Arc<AtomicUsize>,
}

#[async_trait]
impl TunnelOpener for MockOpener {
    type Stream = MemoryStream;

    async fn open_tunnel(
        &self,
        destination: &DestinationDescriptor,
    ) -> TransportResult<Self::Stream> {
        if destination.host.is_empty() {
            return Err(TransportError::Status(Status::invalid_argument(
                "empty host",
            )));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        let (local, _remote) = memory_stream_pair(8);
        Ok(local)
    }
}

#[tokio::test]
async fn test_memory_stream_send_receive() {
    let (a, b) = memory_stream_pair(4);
    let (mut a_send, _a_recv) = a.split();
    let (_b_send, mut b_recv) = b.split();

    a_send.send_chunk(Chunk::new(b"one".to_vec())).await.unwrap();
    a_send.send_chunk(Chunk::new(b"two".to_vec())).await.unwrap();

    assert_eq!(b_recv.recv_chunk().await.unwrap().unwrap().data, b"one");
    assert_eq!(b_recv.recv_chunk().await.unwrap().unwrap().data, b"two");
}

#[tokio::test]
async fn test_memory_stream_finish() {
    let (a, b) = memory_stream_pair(4);
    let (mut a_send, _a_recv) = a.split();
    let (_b_send, mut b_recv) = b.split();

    a_send.send_chunk(Chunk::new(b"last".to_vec())).await.unwrap();
    a_send.finish().await.unwrap();

    assert!(b_recv.recv_chunk().await.unwrap().is_some());
    assert!(b_recv.recv_chunk().await.unwrap().is_none());
    // End is sticky
    assert!(b_recv.recv_chunk().await.unwrap().is_none());

    // Should fail after close
    let result = a_send.send_chunk(Chunk::new(b"late".to_vec())).await;
    assert!(matches!(result, Err(TransportError::StreamClosed)));
}

#[tokio::test]
async fn test_memory_stream_abort() {
    let (a, b) = memory_stream_pair(4);
    let (mut a_send, _a_recv) = a.split();
    let (_b_send, mut b_recv) = b.split();

    a_send.abort(Status::unavailable("destination gone")).await;

    match b_recv.recv_chunk().await {
        Err(TransportError::Status(status)) => {
            assert_eq!(status.code(), Code::Unavailable);
            assert_eq!(status.message(), "destination gone");
        }
        other => panic!("Expected status error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_memory_stream_dropped_sender_is_reset() {
    let (a, b) = memory_stream_pair(4);
    let (_b_send, mut b_recv) = b.split();
    drop(a);

    assert!(matches!(
        b_recv.recv_chunk().await,
        Err(TransportError::StreamReset)
    ));
}

#[tokio::test]
async fn test_memory_stream_ids_are_distinct() {
    let (a, b) = memory_stream_pair(1);
    assert_ne!(a.stream_id(), b.stream_id());
}

#[tokio::test]
async fn test_mock_opener() {
    let opened = Arc::new(AtomicUsize::new(0));
    let opener = MockOpener {
        opened: opened.clone(),
    };

    opener
        .open_tunnel(&DestinationDescriptor::new("localhost", "2222"))
        .await
        .unwrap();
    assert!(opener
        .open_tunnel(&DestinationDescriptor::new("", "2222"))
        .await
        .is_err());

    assert_eq!(opened.load(Ordering::SeqCst), 1);
}

#[test]
fn test_transport_errors() {
    let err = TransportError::ConnectionError("test".to_string());
    assert!(err.to_string().contains("Connection error"));

    let err = TransportError::StreamClosed;
    assert!(err.to_string().contains("Stream closed"));

    let err = TransportError::Timeout;
    assert!(err.to_string().contains("Timeout"));

    let err = TransportError::Status(Status::invalid_argument("missing connect_ip"));
    assert!(err.to_string().contains("missing connect_ip"));
}
