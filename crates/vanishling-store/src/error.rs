use std::path::PathBuf;

use vanishling_types::FileId;

/// Errors from content store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Bad file name, traversal-unsafe id, or empty upload.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No object is stored under the requested id.
    #[error("object not found: {0}")]
    NotFound(FileId),

    /// An object with the computed id already exists.
    #[error("object already exists: {0}")]
    AlreadyExists(FileId),

    /// The storage root failed the write probe.
    #[error("storage unavailable at {path}: {source}")]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The capacity guard refused new data.
    #[error("storage capacity exhausted: {usage_percent}% used (threshold {threshold_percent}%)")]
    ResourceExhausted {
        usage_percent: u64,
        threshold_percent: u64,
    },

    /// I/O error from the underlying filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Returns `true` for errors caused by the request rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::NotFound(_))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
