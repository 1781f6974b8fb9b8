// Recovery store error types and result aliases

use thiserror::Error;

/// Result type for recovery operations
pub type RecoveryResult<T> = Result<T, RecoveryError>;

/// Error types for recording persistence and disposition
///
/// Chunk persistence failures surface synchronously to the recorder —
/// suppressing them would risk silent loss of a recording in progress.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// Chunk or catalog I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The on-disk catalog is inconsistent with expectations
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Recording names become directory names and must be plain
    #[error("Invalid recording name: {0}")]
    InvalidName(String),

    /// No catalog entry for this recording name
    #[error("Unknown recording: {0}")]
    UnknownRecording(String),

    /// The export collaborator did not confirm success; all chunks are kept
    #[error("Export failed: {0}")]
    Export(String),
}

impl RecoveryError {
    /// Create a catalog error
    pub fn catalog(msg: impl Into<String>) -> Self {
        Self::Catalog(msg.into())
    }

    /// Create an export error
    pub fn export(msg: impl Into<String>) -> Self {
        Self::Export(msg.into())
    }
}
