//! Error types.
//!
//! Two families live here. [`Error`] surfaces infrastructure failures
//! (binding a port, reading a request body off the socket). [`RpcError`] is
//! the error a caller sees on the wire, inside a reply body.

use serde::{Deserialize, Serialize};

/// The kind carried by every framework-level failure.
pub const FATAL: &str = "Fatal";

/// The error type returned by rpcgate's fallible infrastructure operations.
///
/// RPC-level failures (unknown function, bad arguments, business errors) are
/// expressed as [`RpcError`] values inside a reply, never as `Error`s.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// The request body could not be read off the connection.
    #[error("transport: {0}")]
    Transport(String),
}

/// An error reply: a kind plus a human-readable message.
///
/// The kind is `"Fatal"` for framework failures; function implementations
/// are free to raise any other kind, which is passed through unchanged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RpcError {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

impl RpcError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self { kind: kind.into(), message: message.into() }
    }

    /// A [`FATAL`] error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(FATAL, message)
    }

    pub fn is_fatal(&self) -> bool {
        self.kind == FATAL
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        Self::fatal(e.to_string())
    }
}
