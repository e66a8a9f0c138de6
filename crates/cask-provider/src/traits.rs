use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;

use cask_types::{BlobInfo, BlobRef, Document};

use crate::context::{BlobContext, BlobUpdateContext};
use crate::error::ProviderResult;
use crate::stats::GcStats;

/// Free-form provider configuration, as declared in its descriptor.
pub type ProviderProperties = BTreeMap<String, String>;

/// A pluggable blob storage backend.
///
/// All implementations must satisfy these invariants:
/// - `initialize` runs once, before the provider is shared.
/// - After `close`, no other method is called.
/// - A `write_blob` followed by a `read_blob` of the returned key observes
///   the write (no eventual consistency at this layer).
/// - All I/O errors are propagated, never silently ignored.
///
/// Optional capabilities default to "unsupported".
pub trait BlobProvider: Send + Sync {
    /// One-time setup with the provider id and its configured properties.
    fn initialize(&mut self, id: &str, properties: &ProviderProperties) -> ProviderResult<()>;

    /// Release all resources.
    fn close(&self);

    /// Keys from a transient provider are never reused across a re-dispatch.
    fn is_transient(&self) -> bool {
        false
    }

    /// Content participates in retention and legal-hold protection.
    fn is_record_mode(&self) -> bool {
        false
    }

    /// Read content by provider-local key.
    ///
    /// Returns `Err(ProviderError::NotFound)` if the key is absent.
    fn read_blob(&self, info: &BlobInfo) -> ProviderResult<Bytes>;

    /// Store content and return its provider-local key.
    fn write_blob(&self, ctx: &BlobContext<'_>) -> ProviderResult<String>;

    /// Delete content. A no-op if the key is already absent.
    fn delete_blob(&self, ctx: &BlobUpdateContext) -> ProviderResult<()>;

    /// Apply a retention or legal-hold change to stored content.
    fn update_blob(&self, _ctx: &BlobUpdateContext) -> ProviderResult<()> {
        Ok(())
    }

    /// Thumbnail rendition of the blob.
    fn thumbnail(&self, _blob: &BlobRef) -> ProviderResult<Option<Bytes>> {
        Ok(None)
    }

    /// The blob converted to `mime_type` by the backend.
    fn converted_blob(&self, _blob: &BlobRef, _mime_type: &str) -> ProviderResult<Option<Bytes>> {
        Ok(None)
    }

    /// Conversions the backend can produce, by name to MIME type.
    fn available_conversions(&self, _blob: &BlobRef) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    /// A replacement reference pinned to a document version, or `None`
    /// if the current reference can be kept as-is.
    fn freeze_version(&self, _blob: &BlobRef, _doc: &dyn Document) -> ProviderResult<Option<BlobRef>> {
        Ok(None)
    }

    /// Whether the reference already points at frozen version content.
    fn is_version(&self, _blob: &BlobRef) -> bool {
        false
    }

    /// Whether the backend enforces its own access control.
    fn has_external_access_control(&self) -> bool {
        false
    }

    /// The mark-and-sweep collector for this provider's storage.
    fn garbage_collector(&self) -> Option<Arc<dyn GarbageCollector>> {
        None
    }
}

/// Phase of a collector's current run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollectorPhase {
    Idle,
    Marking,
    Sweeping,
}

/// Mark-and-sweep collector over one physical storage.
///
/// Two collectors reporting the same [`identity`](Self::identity) manage
/// the same storage and must only be driven once per cycle.
pub trait GarbageCollector: Send + Sync {
    /// Opaque identifier of the physical storage.
    fn identity(&self) -> String;

    /// Begin a run: enter `Marking` with an empty mark-set.
    fn start(&self) -> ProviderResult<()>;

    /// Mark a provider-local key as referenced.
    fn mark(&self, key: &str);

    /// Sweep: everything not marked is garbage, physically removed only
    /// when `delete` is true. Returns the run's statistics and returns the
    /// collector to `Idle`.
    fn stop(&self, delete: bool) -> ProviderResult<GcStats>;

    /// Current phase.
    fn phase(&self) -> CollectorPhase;

    /// Abandon the current run, dropping all run state.
    fn reset(&self);

    fn is_in_progress(&self) -> bool {
        self.phase() != CollectorPhase::Idle
    }
}
