//! Error types for wirelink.
//!
//! Every failure a caller can observe goes through [`LinkError`]. Failures that
//! happen while the receive loop handles a frame never surface here; they are
//! logged or turned into exception responses for the peer.

use std::time::Duration;
use thiserror::Error;

/// Main error type for the wirelink library.
#[derive(Debug, Error)]
pub enum LinkError {
    // Channel errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Failed to connect to {addr}: {message}")]
    Connect { addr: String, message: String },

    // Value codec errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Codec error: {message}")]
    Codec { message: String },

    // Framing errors
    #[error("Frame payload of {len} bytes exceeds maximum {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("Malformed frame: {message}")]
    MalformedFrame { message: String },

    // Call outcomes
    #[error("Link closed: {reason}")]
    Closed { reason: String },

    #[error("Call to {method} timed out after {after:?}")]
    Timeout { method: String, after: Duration },

    #[error("Remote call {method} failed: {message}")]
    Remote { method: String, message: String },

    // Lifecycle errors
    #[error("Link is already open")]
    AlreadyOpen,

    #[error("No local handler bound to link")]
    NoHandler,

    #[error("A local handler is already bound to link")]
    HandlerAlreadyBound,

    #[error("Call id {0} is already pending")]
    DuplicateCallId(i32),

    // Interface errors
    #[error("Remote interface {interface} has no method {name}/{arity}")]
    UnknownMethod {
        interface: String,
        name: String,
        arity: usize,
    },

    #[error("Method {name} returns {declared}, cannot be invoked as {requested}")]
    SignatureMismatch {
        name: String,
        declared: &'static str,
        requested: &'static str,
    },

    #[error("Invalid method name: {message}")]
    InvalidMethodName { message: String },

    #[error("Argument {index}: {message}")]
    Argument { index: usize, message: String },
}

/// Result type alias for wirelink operations.
pub type Result<T> = std::result::Result<T, LinkError>;

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        LinkError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        LinkError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl LinkError {
    /// Create a `Closed` error with the given reason.
    pub fn closed(reason: impl Into<String>) -> Self {
        LinkError::Closed {
            reason: reason.into(),
        }
    }

    /// Check whether this error means the link can no longer carry calls.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            LinkError::Closed { .. }
                | LinkError::Io { .. }
                | LinkError::Connect { .. }
                | LinkError::FrameTooLarge { .. }
        )
    }

    /// Check whether this error is a deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, LinkError::Timeout { .. })
    }

    /// The description string supplied by the peer, if this is a remote failure.
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            LinkError::Remote { message, .. } => Some(message),
            _ => None,
        }
    }
}
