use cask_provider::ProviderError;
use cask_registry::RegistryError;
use cask_types::CollaboratorError;

/// Errors from a garbage collection cycle.
#[derive(Debug, thiserror::Error)]
pub enum GcError {
    /// Another cycle is running; retry later.
    #[error("binaries garbage collection already in progress")]
    AlreadyRunning,

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// A document repository or the transaction manager failed.
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

/// Result alias for garbage collection operations.
pub type GcResult<T> = Result<T, GcError>;
