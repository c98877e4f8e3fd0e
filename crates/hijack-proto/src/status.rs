//! RPC call status
//!
//! Outcomes travel as `grpc-status` / `grpc-message` trailers, or in the response
//! headers when a call is rejected before any message is exchanged.

use http::header::{HeaderMap, HeaderValue};
use std::fmt;

pub const STATUS_HEADER: &str = "grpc-status";
pub const MESSAGE_HEADER: &str = "grpc-message";

/// Status codes (gRPC numbering)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Code {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
}

impl Code {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Code::Ok,
            1 => Code::Cancelled,
            3 => Code::InvalidArgument,
            4 => Code::DeadlineExceeded,
            5 => Code::NotFound,
            12 => Code::Unimplemented,
            13 => Code::Internal,
            14 => Code::Unavailable,
            _ => Code::Unknown,
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// Outcome of an RPC call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    code: Code,
    message: String,
}

impl Status {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn ok() -> Self {
        Self::new(Code::Ok, "")
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(Code::Cancelled, message)
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }

    /// Render as status headers
    pub fn to_header_map(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(STATUS_HEADER, HeaderValue::from(u16::from(self.code.as_u8())));
        if !self.message.is_empty() {
            // Header values must be visible ASCII
            let sanitized: String = self
                .message
                .chars()
                .map(|c| if c == ' ' || c.is_ascii_graphic() { c } else { '?' })
                .collect();
            if let Ok(value) = HeaderValue::from_str(&sanitized) {
                headers.insert(MESSAGE_HEADER, value);
            }
        }
        headers
    }

    /// Read a status from headers or trailers, if one is present
    pub fn from_header_map(headers: &HeaderMap) -> Option<Self> {
        let code = headers.get(STATUS_HEADER)?;
        let code = code
            .to_str()
            .ok()
            .and_then(|c| c.parse::<u8>().ok())
            .map(Code::from_u8)
            .unwrap_or(Code::Unknown);
        let message = headers
            .get(MESSAGE_HEADER)
            .and_then(|m| m.to_str().ok())
            .unwrap_or_default()
            .to_string();
        Some(Self { code, message })
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status {:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for Status {}
