//! Provider registry for Cask.
//!
//! The registry owns every live [`BlobProvider`](cask_provider::BlobProvider)
//! instance. Instances are built lazily from [`ProviderDescriptor`]s through
//! a [`ProviderFactories`] map (kind name to constructor), cached per id, and
//! closed before their descriptor is replaced or removed so that at most one
//! live instance exists per id.

pub mod collectors;
pub mod descriptor;
pub mod error;
pub mod factory;
pub mod registry;

pub use collectors::CollectorSet;
pub use descriptor::ProviderDescriptor;
pub use error::{RegistryError, RegistryResult};
pub use factory::{ProviderConstructor, ProviderFactories, MEMORY_KIND};
pub use registry::ProviderRegistry;
