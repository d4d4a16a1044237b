use std::path::PathBuf;

/// Errors from key-value engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The snapshot file failed its integrity check.
    #[error("corrupt snapshot {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// A lock guarding engine state was poisoned by a panicking writer.
    #[error("engine lock poisoned: {0}")]
    Poisoned(String),

    /// Failure reported by a backend-specific layer.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
