use livekv_engine::EngineError;

/// Errors produced by the live-query store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The request was rejected before touching the engine: an empty key,
    /// a record without an `id`, an empty range, or a zero limit.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Stored bytes are not a valid record.
    #[error("cannot decode value stored at {key:?}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Transaction or cursor failure in the underlying engine.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// The registry was opened outside of a tokio runtime.
    #[error("no tokio runtime available to run loads and refills")]
    NoRuntime,

    /// The configuration could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
