/// Errors from blob provider operations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The key is absent from the provider.
    #[error("blob not found: {0}")]
    NotFound(String),

    /// The operation is blocked by a retention period or legal hold.
    #[error("retention violation: {0}")]
    RetentionViolation(String),

    /// A collection cycle is already running on this collector.
    #[error("garbage collection already in progress for {0}")]
    GcInProgress(String),

    /// The provider configuration is invalid.
    #[error("invalid provider configuration: {0}")]
    InvalidConfig(String),

    /// The provider was used before `initialize` or after `close`.
    #[error("provider {0} is not available")]
    Unavailable(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Opaque backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result alias for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;
