use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::digest::ContentDigest;
use crate::key::BlobKey;

/// Length value meaning "size not known".
pub const UNKNOWN_LENGTH: i64 = -1;

/// Descriptive metadata carried alongside blob content.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMetadata {
    pub mime_type: Option<String>,
    pub encoding: Option<String>,
    pub filename: Option<String>,
}

/// Immutable reference to content managed by a blob provider.
///
/// A `BlobRef` is never edited in place: every content-affecting operation
/// produces a new value. The `key` is the persisted wire key, which may or
/// may not carry a provider prefix depending on the dispatch mode.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    key: String,
    provider_id: String,
    metadata: BlobMetadata,
    length: i64,
    digest: Option<String>,
}

impl BlobRef {
    /// Create a reference with unknown length and no metadata.
    pub fn new(key: impl Into<String>, provider_id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            provider_id: provider_id.into(),
            metadata: BlobMetadata::default(),
            length: UNKNOWN_LENGTH,
            digest: None,
        }
    }

    pub fn with_metadata(self, metadata: BlobMetadata) -> Self {
        Self { metadata, ..self }
    }

    pub fn with_length(self, length: i64) -> Self {
        Self { length, ..self }
    }

    pub fn with_digest(self, digest: impl Into<String>) -> Self {
        Self {
            digest: Some(digest.into()),
            ..self
        }
    }

    /// A copy of this reference pointing at a different key and provider.
    pub fn rekeyed(&self, key: impl Into<String>, provider_id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            provider_id: provider_id.into(),
            ..self.clone()
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn metadata(&self) -> &BlobMetadata {
        &self.metadata
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.metadata.mime_type.as_deref()
    }

    pub fn encoding(&self) -> Option<&str> {
        self.metadata.encoding.as_deref()
    }

    pub fn filename(&self) -> Option<&str> {
        self.metadata.filename.as_deref()
    }

    pub fn length(&self) -> i64 {
        self.length
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// The provider-local part of the key (prefix stripped).
    pub fn local_key(&self) -> &str {
        BlobKey::strip_prefix(&self.key)
    }

    /// The persisted projection of this reference.
    pub fn info(&self) -> BlobInfo {
        BlobInfo {
            key: self.key.clone(),
            mime_type: self.metadata.mime_type.clone(),
            encoding: self.metadata.encoding.clone(),
            filename: self.metadata.filename.clone(),
            length: self.length,
            digest: self.digest.clone(),
        }
    }
}

/// What the document store persists for a blob property.
///
/// Same as [`BlobRef`] minus the provider id: the provider is either
/// encoded as a key prefix or implied by dispatch on the repository name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobInfo {
    pub key: String,
    pub mime_type: Option<String>,
    pub encoding: Option<String>,
    pub filename: Option<String>,
    pub length: i64,
    pub digest: Option<String>,
}

impl BlobInfo {
    /// A bare info record holding only a key.
    pub fn from_key(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            mime_type: None,
            encoding: None,
            filename: None,
            length: UNKNOWN_LENGTH,
            digest: None,
        }
    }

    /// Attach the resolved provider id.
    pub fn into_ref(self, provider_id: impl Into<String>) -> BlobRef {
        BlobRef {
            key: self.key,
            provider_id: provider_id.into(),
            metadata: BlobMetadata {
                mime_type: self.mime_type,
                encoding: self.encoding,
                filename: self.filename,
            },
            length: self.length,
            digest: self.digest,
        }
    }

    /// The same record with its key replaced by the provider-local key.
    pub fn with_local_key(&self) -> Self {
        Self {
            key: BlobKey::strip_prefix(&self.key).to_string(),
            ..self.clone()
        }
    }
}

/// Content that has not been stored by any provider yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewBlob {
    pub content: Bytes,
    pub metadata: BlobMetadata,
}

impl NewBlob {
    pub fn new(content: impl Into<Bytes>) -> Self {
        Self {
            content: content.into(),
            metadata: BlobMetadata::default(),
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.metadata.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.metadata.encoding = Some(encoding.into());
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.metadata.filename = Some(filename.into());
        self
    }
}

/// A blob value as handed to the orchestration layer for writing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Blob {
    /// Fresh content coming from outside.
    New(NewBlob),
    /// Content already owned by a provider.
    Managed(BlobRef),
}

impl Blob {
    pub fn metadata(&self) -> &BlobMetadata {
        match self {
            Self::New(blob) => &blob.metadata,
            Self::Managed(blob) => blob.metadata(),
        }
    }

    /// Content length, or [`UNKNOWN_LENGTH`].
    pub fn length(&self) -> i64 {
        match self {
            Self::New(blob) => blob.content.len() as i64,
            Self::Managed(blob) => blob.length(),
        }
    }

    /// Content digest; computed on demand for new content.
    pub fn digest(&self) -> Option<String> {
        match self {
            Self::New(blob) => Some(ContentDigest::compute(&blob.content).to_hex()),
            Self::Managed(blob) => blob.digest().map(str::to_string),
        }
    }

    pub fn as_managed(&self) -> Option<&BlobRef> {
        match self {
            Self::Managed(blob) => Some(blob),
            Self::New(_) => None,
        }
    }
}

impl From<NewBlob> for Blob {
    fn from(blob: NewBlob) -> Self {
        Self::New(blob)
    }
}

impl From<BlobRef> for Blob {
    fn from(blob: BlobRef) -> Self {
        Self::Managed(blob)
    }
}
