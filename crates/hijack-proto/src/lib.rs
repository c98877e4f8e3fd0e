//! Tunnel Protocol Definitions
//!
//! This crate defines the RPC surface of the tunnel: the `hijack.HTService` method
//! paths, the message types exchanged on them, the length-prefixed message codec,
//! call status codes and the destination metadata attached to a tunnel stream.

pub mod codec;
pub mod messages;
pub mod metadata;
pub mod status;

pub use codec::{CodecError, RpcCodec};
pub use messages::*;
pub use metadata::{DestinationDescriptor, MetadataError, CONNECT_IP_KEY, CONNECT_PORT_KEY};
pub use status::{Code, Status};

/// Path of the unary handshake call
pub const HELLO_PATH: &str = "/hijack.HTService/HTHello";

/// Path of the bidirectional tunnel stream
pub const TUNNEL_PATH: &str = "/hijack.HTService/HTunnel";

/// Content type announced on every call
pub const CONTENT_TYPE: &str = "application/grpc+bincode";

/// Maximum encoded message size (4MB)
pub const MAX_MESSAGE_SIZE: u32 = 4 * 1024 * 1024;
