use larder_store::StoreError;

/// Errors from cache operations.
///
/// Public read and write paths collapse these into `None` or
/// [`WriteOutcome`](crate::WriteOutcome); the `try_*` methods expose them.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The schema version has not arrived or the store is still opening.
    #[error("cache '{0}' is not open yet")]
    Pending(String),

    /// Opening the store failed; the cache stays unavailable.
    #[error("cache '{collection}' is unavailable: {reason}")]
    Unavailable { collection: String, reason: String },

    /// Error from the underlying store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A record could not be converted to or from its stored form.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration is invalid or unreadable.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
