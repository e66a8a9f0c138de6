use std::collections::BTreeSet;

use tracing::debug;

use cask_types::{Blob, Document, PropertyValue};

use crate::config::DispatchDescriptor;
use crate::error::Result;
use crate::paths;
use crate::table::DispatchTable;

/// Where a blob should be written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchTarget {
    pub provider_id: String,
    /// Whether the stored key must carry the `provider:` prefix.
    pub add_prefix: bool,
}

/// Decides which provider owns a blob.
///
/// Implementations are pure functions of their configuration and the
/// inputs; the same inputs always yield the same result.
pub trait BlobDispatcher: Send + Sync {
    /// Provider for writing `blob` into property `xpath` of `doc`.
    fn resolve_for_write(&self, doc: &dyn Document, blob: &Blob, xpath: &str) -> DispatchTarget;

    /// Provider for reading an unprefixed key stored in `repository`.
    fn resolve_for_read(&self, repository: &str) -> String;

    /// Every provider this dispatcher may select for `repository`.
    fn provider_ids(&self, repository: &str) -> BTreeSet<String>;

    /// Document property paths read by any rule.
    fn clause_paths(&self) -> BTreeSet<String>;
}

/// The standard [`BlobDispatcher`] over a [`DispatchTable`].
#[derive(Clone, Debug)]
pub struct DefaultBlobDispatcher {
    table: DispatchTable,
}

impl DefaultBlobDispatcher {
    pub fn new(table: DispatchTable) -> Self {
        Self { table }
    }

    /// Validate `descriptor` and build a dispatcher from it.
    pub fn from_descriptor(descriptor: &DispatchDescriptor) -> Result<Self> {
        DispatchTable::from_descriptor(descriptor).map(Self::new)
    }

    /// A dispatcher in repository-name mode.
    pub fn repository_name() -> Self {
        Self::new(DispatchTable::RepositoryName)
    }

    pub fn table(&self) -> &DispatchTable {
        &self.table
    }
}

impl Default for DefaultBlobDispatcher {
    fn default() -> Self {
        Self::repository_name()
    }
}

impl BlobDispatcher for DefaultBlobDispatcher {
    fn resolve_for_write(&self, doc: &dyn Document, blob: &Blob, xpath: &str) -> DispatchTarget {
        match self.table.select(|path| lookup(doc, blob, xpath, path)) {
            Some(provider) => {
                debug!(doc = %doc.id(), xpath = %xpath, provider = %provider, "blob dispatched by rule");
                DispatchTarget {
                    provider_id: provider.to_string(),
                    add_prefix: true,
                }
            }
            None => DispatchTarget {
                provider_id: doc.repository_name().to_string(),
                add_prefix: false,
            },
        }
    }

    fn resolve_for_read(&self, repository: &str) -> String {
        self.table
            .default_provider()
            .unwrap_or(repository)
            .to_string()
    }

    fn provider_ids(&self, repository: &str) -> BTreeSet<String> {
        if self.table.is_rule_mode() {
            self.table.rule_providers()
        } else {
            BTreeSet::from([repository.to_string()])
        }
    }

    fn clause_paths(&self) -> BTreeSet<String> {
        self.table.clause_paths()
    }
}

fn optional(value: Option<&str>) -> PropertyValue {
    value.map_or(PropertyValue::Null, PropertyValue::from)
}

/// Resolve a clause path against the blob being written and its document.
fn lookup(doc: &dyn Document, blob: &Blob, xpath: &str, path: &str) -> Option<PropertyValue> {
    let metadata = blob.metadata();
    let value = match path {
        paths::BLOB_NAME => optional(metadata.filename.as_deref()),
        paths::BLOB_MIME_TYPE => optional(metadata.mime_type.as_deref()),
        paths::BLOB_ENCODING => optional(metadata.encoding.as_deref()),
        paths::BLOB_DIGEST => optional(blob.digest().as_deref()),
        paths::BLOB_LENGTH => PropertyValue::Integer(blob.length()),
        paths::BLOB_XPATH => PropertyValue::from(xpath),
        paths::REPOSITORY_NAME => PropertyValue::from(doc.repository_name()),
        paths::DOCUMENT_PATH => optional(doc.path()),
        paths::IS_RECORD => PropertyValue::Boolean(doc.is_record()),
        other if paths::is_blob_path(other) => return None,
        other => return doc.property_value(other),
    };
    Some(value)
}
