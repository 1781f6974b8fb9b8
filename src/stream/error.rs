// Stream error types and result aliases

use thiserror::Error;

use crate::stream::types::StreamName;

/// Result type for stream operations
pub type StreamResult<T> = Result<T, StreamError>;

/// Error types for the stream lifecycle layer
///
/// Directory and transport failures are contained by the multiplexer where
/// the contract requires it (reconciliation is fail-open); they only reach a
/// consumer from the call that asked for the work.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Upstream catalog query failed or timed out
    #[error("Resolution failed: {0}")]
    Resolution(String),

    /// The catalog does not currently offer a stream with this name
    #[error("Stream not found: {0}")]
    StreamNotFound(StreamName),

    /// The transport collaborator could not establish a connection
    #[error("Transport open failed: {0}")]
    TransportOpen(String),

    /// The session backing a media handle was torn down; holders must re-request
    #[error("Session invalidated: {0}")]
    SessionInvalidated(StreamName),

    /// Settings could not be loaded or persisted
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The multiplexer is shutting down and no longer accepts requests
    #[error("Multiplexer is shut down")]
    Shutdown,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    /// Create a resolution error
    pub fn resolution(msg: impl Into<String>) -> Self {
        Self::Resolution(msg.into())
    }

    /// Create a transport open error
    pub fn transport_open(msg: impl Into<String>) -> Self {
        Self::TransportOpen(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Whether the caller can expect a plain retry to succeed eventually
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Shutdown)
    }
}
