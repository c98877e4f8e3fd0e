//! HTTP/2 RPC transport using h2
//!
//! This crate carries the `hijack.HTService` calls over plain HTTP/2 (prior knowledge).
//!
//! # Stream Mapping
//!
//! - Each RPC call = one HTTP/2 stream, `POST /hijack.HTService/<method>`
//! - Call metadata (the tunnel destination) = request headers
//! - Messages = length-prefixed frames inside DATA frames
//! - Call outcome = `grpc-status` trailers, or response headers for an outright rejection
//! - Client half-close = END_STREAM on the request body

pub mod client;
pub mod config;
pub mod server;
pub mod stream;

pub use client::RpcClient;
pub use config::H2Config;
pub use server::RpcServer;
pub use stream::{H2ChunkReceiver, H2ChunkSender, H2ChunkStream, StreamRole};
