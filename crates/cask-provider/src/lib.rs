//! Blob provider contracts for Cask.
//!
//! A provider is a pluggable storage backend that owns a namespace of
//! provider-local keys. This crate defines what every backend must do
//! ([`BlobProvider`]), the optional mark-and-sweep capability a backend may
//! expose ([`GarbageCollector`]), and an in-memory reference backend.
//!
//! # Storage Backends
//!
//! - [`InMemoryBlobProvider`] -- named shared in-memory storages, used for
//!   tests and embedding
//!
//! # Design Rules
//!
//! 1. Keys returned by `write_blob` are provider-local (never prefixed).
//! 2. Deleting an absent key is a no-op, not an error.
//! 3. Record-mode providers refuse to delete content under retention or hold.
//! 4. All I/O errors are propagated, never silently ignored.

pub mod context;
pub mod error;
pub mod memory;
pub mod stats;
pub mod traits;

pub use context::{BlobContext, BlobUpdateContext};
pub use error::{ProviderError, ProviderResult};
pub use memory::{
    InMemoryBlobProvider, InMemoryGarbageCollector, MemoryStorage, MemoryStorages, PROP_RECORD,
    PROP_STORAGE, PROP_TRANSIENT,
};
pub use stats::GcStats;
pub use traits::{BlobProvider, CollectorPhase, GarbageCollector, ProviderProperties};
