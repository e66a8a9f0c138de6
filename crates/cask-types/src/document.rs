//! The document collaborator contract.
//!
//! Documents, their schemas, and their persistence live outside Cask. The
//! orchestration layer only needs the narrow view defined by [`Document`]:
//! system attributes used by dispatch rules and retention checks, generic
//! property lookup, and access to the blob-bearing properties.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::blob::BlobRef;

/// Property path of a document's main content blob.
pub const MAIN_BLOB_XPATH: &str = "file:content";

/// A document property value as seen by dispatch clauses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// The property exists but holds no value.
    Null,
    Boolean(bool),
    Integer(i64),
    String(String),
    List(Vec<PropertyValue>),
}

impl PropertyValue {
    /// Integer view: integers as-is, strings parsed, booleans as 0/1.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            Self::String(s) => s.trim().parse().ok(),
            Self::Boolean(b) => Some(i64::from(*b)),
            Self::Null | Self::List(_) => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Integer(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
            Self::List(items) => {
                let joined: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", joined.join(","))
            }
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

/// Errors reported by external collaborators (document repositories,
/// transaction managers).
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("repository error: {0}")]
    Repository(String),

    #[error("transaction error: {0}")]
    Transaction(String),
}

/// A document that owns blobs.
///
/// Implementations must be thread-safe; the orchestration layer may be
/// called from many repository transactions at once.
pub trait Document: Send + Sync {
    /// Stable document identifier.
    fn id(&self) -> &str;

    /// Name of the repository holding the document.
    fn repository_name(&self) -> &str;

    /// Hierarchical path, if the document has one.
    fn path(&self) -> Option<&str>;

    /// Whether the document has been turned into a record.
    fn is_record(&self) -> bool;

    /// Whether the document is under a retention period or legal hold.
    fn is_under_retention_or_legal_hold(&self) -> bool;

    /// Generic property lookup. Returns `None` if the path does not resolve.
    fn property_value(&self, path: &str) -> Option<PropertyValue>;

    /// The blob stored at `path`, if any.
    fn blob(&self, path: &str) -> Option<BlobRef>;

    /// Paths of every blob-bearing property, in a stable order.
    fn blob_paths(&self) -> Vec<String>;

    /// Replace the blob stored at `path`.
    fn set_blob(&mut self, path: &str, blob: BlobRef);

    /// The main content blob, if present.
    fn main_blob(&self) -> Option<BlobRef> {
        self.blob(MAIN_BLOB_XPATH)
    }
}

/// Plain in-memory [`Document`] for tests and embedding.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InMemoryDocument {
    id: String,
    repository: String,
    path: Option<String>,
    record: bool,
    under_hold: bool,
    properties: BTreeMap<String, PropertyValue>,
    blobs: BTreeMap<String, BlobRef>,
}

impl InMemoryDocument {
    pub fn new(id: impl Into<String>, repository: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            repository: repository.into(),
            ..Default::default()
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_property(mut self, path: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(path.into(), value.into());
        self
    }

    pub fn with_blob(mut self, path: impl Into<String>, blob: BlobRef) -> Self {
        self.blobs.insert(path.into(), blob);
        self
    }

    pub fn set_property(&mut self, path: impl Into<String>, value: impl Into<PropertyValue>) {
        self.properties.insert(path.into(), value.into());
    }

    pub fn set_record(&mut self, record: bool) {
        self.record = record;
    }

    pub fn set_under_hold(&mut self, under_hold: bool) {
        self.under_hold = under_hold;
    }

    pub fn remove_blob(&mut self, path: &str) -> Option<BlobRef> {
        self.blobs.remove(path)
    }

    /// A copy of this document under a new id, sharing the same blobs.
    pub fn copy_as(&self, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..self.clone()
        }
    }
}

impl Document for InMemoryDocument {
    fn id(&self) -> &str {
        &self.id
    }

    fn repository_name(&self) -> &str {
        &self.repository
    }

    fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    fn is_record(&self) -> bool {
        self.record
    }

    fn is_under_retention_or_legal_hold(&self) -> bool {
        self.under_hold
    }

    fn property_value(&self, path: &str) -> Option<PropertyValue> {
        self.properties.get(path).cloned()
    }

    fn blob(&self, path: &str) -> Option<BlobRef> {
        self.blobs.get(path).cloned()
    }

    fn blob_paths(&self) -> Vec<String> {
        self.blobs.keys().cloned().collect()
    }

    fn set_blob(&mut self, path: &str, blob: BlobRef) {
        self.blobs.insert(path.to_string(), blob);
    }
}
