//! Blob orchestration for Cask.
//!
//! [`BlobOrchestrator`] is the entry point for applications embedding Cask.
//! It combines the provider registry, the dispatcher and the garbage
//! collection coordinator behind one API:
//!
//! - `write_blob` / `read_blob` route content through the dispatcher and
//!   keep persisted keys stable,
//! - `notify_*` hooks follow the document lifecycle (property changes,
//!   records, copies, removal, retention),
//! - `garbage_collect_binaries` runs a mark-and-sweep cycle across every
//!   repository.
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use cask_orchestrator::{BlobOrchestrator, CaskConfig};
//! use cask_gc::{InMemoryRepositories, InMemoryTransactionManager};
//! use cask_provider::MemoryStorages;
//! use cask_registry::ProviderFactories;
//! use cask_types::{BlobInfo, InMemoryDocument, NewBlob, MAIN_BLOB_XPATH};
//!
//! let config = CaskConfig::from_toml_str(
//!     r#"
//!     [[providers]]
//!     name = "default"
//!     kind = "memory"
//!     "#,
//! )
//! .unwrap();
//! let cask = BlobOrchestrator::from_config(
//!     &config,
//!     ProviderFactories::with_defaults(Arc::new(MemoryStorages::new())),
//!     Arc::new(InMemoryRepositories::new()),
//!     Arc::new(InMemoryTransactionManager::new()),
//! )
//! .unwrap();
//!
//! let doc = InMemoryDocument::new("doc-1", "default");
//! let blob = NewBlob::new(&b"hello"[..]).into();
//! let key = cask.write_blob(&blob, &doc, MAIN_BLOB_XPATH).unwrap();
//! let content = cask.read_blob(&BlobInfo::from_key(key), &doc, MAIN_BLOB_XPATH).unwrap();
//! assert_eq!(&content[..], b"hello");
//! ```

pub mod config;
pub mod error;
pub mod orchestrator;

pub use config::CaskConfig;
pub use error::{BlobError, BlobResult};
pub use orchestrator::BlobOrchestrator;

// Re-export the types callers need alongside the façade.
pub use cask_dispatch::{BlobDispatcher, DefaultBlobDispatcher, DispatchDescriptor};
pub use cask_gc::{DocumentRepositories, FanOutPolicy, GcConfig, TransactionManager};
pub use cask_provider::GcStats;
pub use cask_registry::{ProviderDescriptor, ProviderFactories};
pub use cask_types::{Blob, BlobInfo, BlobRef, Document, NewBlob, MAIN_BLOB_XPATH};
