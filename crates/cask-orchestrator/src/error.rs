use cask_dispatch::DispatchError;
use cask_gc::GcError;
use cask_provider::ProviderError;
use cask_registry::RegistryError;
use cask_types::{CollaboratorError, TypeError};

/// Errors surfaced by the blob orchestration layer.
///
/// Every lower-level error is folded into one of these kinds so callers can
/// tell a retryable condition from a fatal one without inspecting sources.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    /// No provider is registered under this id.
    #[error("unknown blob provider: {0}")]
    UnknownProvider(String),

    /// The key is absent from its provider.
    #[error("blob not found: {0}")]
    NotFound(String),

    /// A garbage collection cycle is already running.
    #[error("binaries garbage collection already in progress")]
    AlreadyRunning,

    /// The operation would bypass a retention period or legal hold.
    #[error("retention violation: {0}")]
    RetentionViolation(String),

    /// Invalid provider or dispatch configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Opaque backend failure.
    #[error("backend error: {0}")]
    Backend(String),

    /// The document repository or transaction manager failed.
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

impl BlobError {
    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AlreadyRunning)
    }
}

impl From<ProviderError> for BlobError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::NotFound(key) => Self::NotFound(key),
            ProviderError::RetentionViolation(msg) => Self::RetentionViolation(msg),
            ProviderError::GcInProgress(_) => Self::AlreadyRunning,
            ProviderError::InvalidConfig(msg) => Self::Configuration(msg),
            ProviderError::Io(e) => Self::Io(e),
            e @ ProviderError::Unavailable(_) => Self::Backend(e.to_string()),
            ProviderError::Backend(msg) => Self::Backend(msg),
        }
    }
}

impl From<RegistryError> for BlobError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::UnknownProvider(id) => Self::UnknownProvider(id),
            RegistryError::Configuration(msg) => Self::Configuration(msg),
            RegistryError::Provider {
                id,
                source: ProviderError::InvalidConfig(msg),
            } => Self::Configuration(format!("provider '{id}': {msg}")),
            RegistryError::Provider { source, .. } => source.into(),
        }
    }
}

impl From<DispatchError> for BlobError {
    fn from(e: DispatchError) -> Self {
        Self::Configuration(e.to_string())
    }
}

impl From<GcError> for BlobError {
    fn from(e: GcError) -> Self {
        match e {
            GcError::AlreadyRunning => Self::AlreadyRunning,
            GcError::Registry(e) => e.into(),
            GcError::Provider(e) => e.into(),
            GcError::Collaborator(e) => Self::Collaborator(e),
        }
    }
}

impl From<TypeError> for BlobError {
    fn from(e: TypeError) -> Self {
        match e {
            TypeError::InvalidKey { key, .. } => Self::NotFound(key),
            other => Self::Backend(other.to_string()),
        }
    }
}

/// Result alias for orchestration operations.
pub type BlobResult<T> = Result<T, BlobError>;
