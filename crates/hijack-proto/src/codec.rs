//! Length-prefixed message codec
//!
//! Every RPC message travels as a 5 byte header followed by the bincode body:
//! compression flag (1, always 0) + body length (4, big endian). Messages may be split
//! across or packed into transport frames, so decoding works on an accumulating buffer.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("Compressed messages are not supported")]
    CompressionNotSupported,

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

/// Encoder/decoder for framed RPC messages
pub struct RpcCodec;

impl RpcCodec {
    /// Header size: compression flag (1) + length (4) = 5 bytes
    pub const HEADER_SIZE: usize = 5;

    /// Encode a message into one frame
    pub fn encode<M: Serialize>(message: &M) -> Result<Bytes, CodecError> {
        let body = bincode::serialize(message)?;
        if body.len() > crate::MAX_MESSAGE_SIZE as usize {
            return Err(CodecError::MessageTooLarge(body.len()));
        }

        let mut buf = BytesMut::with_capacity(Self::HEADER_SIZE + body.len());
        buf.put_u8(0);
        buf.put_u32(body.len() as u32);
        buf.put_slice(&body);

        Ok(buf.freeze())
    }

    /// Decode one message from the front of `buf`.
    ///
    /// Returns `Ok(None)` until a whole frame is buffered; consumed bytes are removed.
    pub fn decode<M: DeserializeOwned>(buf: &mut BytesMut) -> Result<Option<M>, CodecError> {
        if buf.len() < Self::HEADER_SIZE {
            return Ok(None);
        }

        let compressed = buf[0];
        let length = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);

        if compressed != 0 {
            return Err(CodecError::CompressionNotSupported);
        }
        if length > crate::MAX_MESSAGE_SIZE {
            return Err(CodecError::MessageTooLarge(length as usize));
        }
        if buf.len() < Self::HEADER_SIZE + length as usize {
            return Ok(None);
        }

        buf.advance(Self::HEADER_SIZE);
        let body = buf.split_to(length as usize);
        Ok(Some(bincode::deserialize(&body)?))
    }
}
