use cask_provider::ProviderError;

/// Errors from provider registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No descriptor is registered under this id.
    #[error("unknown blob provider: {0}")]
    UnknownProvider(String),

    /// A descriptor is malformed or names an unknown kind.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The provider failed to initialize.
    #[error("provider {id} failed: {source}")]
    Provider {
        id: String,
        #[source]
        source: ProviderError,
    },
}

/// Result alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;
