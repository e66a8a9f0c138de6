use chrono::{DateTime, Utc};

use cask_types::{BlobMetadata, Document};

/// Everything a provider sees when asked to store new content.
pub struct BlobContext<'a> {
    pub content: &'a [u8],
    pub metadata: &'a BlobMetadata,
    pub doc: &'a dyn Document,
    pub xpath: &'a str,
}

impl<'a> BlobContext<'a> {
    pub fn new(
        content: &'a [u8],
        metadata: &'a BlobMetadata,
        doc: &'a dyn Document,
        xpath: &'a str,
    ) -> Self {
        Self {
            content,
            metadata,
            doc,
            xpath,
        }
    }
}

/// A change applied to already-stored content: retention, legal hold, or
/// deletion.
///
/// `key` is always the provider-local key (no provider prefix).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobUpdateContext {
    pub key: String,
    pub repository: String,
    pub doc_id: String,
    /// New retain-until date. `Some(None)` clears the retention.
    pub retain_until: Option<Option<DateTime<Utc>>>,
    /// New legal hold flag, if it changes.
    pub legal_hold: Option<bool>,
}

impl BlobUpdateContext {
    pub fn new(key: impl Into<String>, doc: &dyn Document) -> Self {
        Self {
            key: key.into(),
            repository: doc.repository_name().to_string(),
            doc_id: doc.id().to_string(),
            retain_until: None,
            legal_hold: None,
        }
    }

    pub fn with_retain_until(mut self, retain_until: Option<DateTime<Utc>>) -> Self {
        self.retain_until = Some(retain_until);
        self
    }

    pub fn with_legal_hold(mut self, hold: bool) -> Self {
        self.legal_hold = Some(hold);
        self
    }
}
