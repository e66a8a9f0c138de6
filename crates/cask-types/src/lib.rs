//! Foundation types for Cask, the blob storage orchestration layer.
//!
//! This crate provides the data model shared by every other Cask crate:
//! the blob references that documents hold, the persisted key wire format,
//! content digests, and the [`Document`] contract through which the
//! orchestration layer reads the document that owns a blob.
//!
//! # Key Types
//!
//! - [`BlobRef`]: Immutable reference to managed content, with its owning provider
//! - [`BlobInfo`]: Persisted projection of a [`BlobRef`] (no provider id)
//! - [`BlobKey`]: Parsed `"providerId:opaqueKey"` wire key
//! - [`ContentDigest`]: Domain-separated BLAKE3 content hash
//! - [`Document`]: The document collaborator contract
//! - [`PropertyValue`]: Document property values as seen by dispatch rules

pub mod blob;
pub mod digest;
pub mod document;
pub mod error;
pub mod key;

pub use blob::{Blob, BlobInfo, BlobMetadata, BlobRef, NewBlob, UNKNOWN_LENGTH};
pub use digest::{ContentDigest, ContentHasher};
pub use document::{CollaboratorError, Document, InMemoryDocument, PropertyValue, MAIN_BLOB_XPATH};
pub use error::TypeError;
pub use key::{BlobKey, KEY_SEPARATOR};
