//! Protocol message types

use serde::{Deserialize, Serialize};

/// Handshake request carrying the caller's name
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HelloRequest {
    pub name: String,
}

/// Handshake reply carrying the greeting
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HelloReply {
    pub name: String,
}

impl HelloReply {
    /// Build the greeting for a request
    pub fn greet(request: &HelloRequest) -> Self {
        Self {
            name: format!("Hello {}", request.name),
        }
    }
}

/// One slice of the tunneled byte stream.
///
/// Ordering is provided by the stream the chunk travels on; chunks carry no sequence
/// number.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

impl Chunk {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<&[u8]> for Chunk {
    fn from(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
        }
    }
}

// Custom serde helpers for bytes
mod serde_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(data)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Vec::<u8>::deserialize(deserializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting() {
        let reply = HelloReply::greet(&HelloRequest {
            name: "client".to_string(),
        });
        assert_eq!(reply.name, "Hello client");
    }

    #[test]
    fn test_chunk_from_slice() {
        let chunk = Chunk::from(&b"PING"[..]);
        assert_eq!(chunk.len(), 4);
        assert!(!chunk.is_empty());
        assert!(Chunk::default().is_empty());
    }
}
