//! Reserved clause paths.
//!
//! `blob:` paths read attributes of the blob being dispatched; `ecm:` paths
//! read system attributes of the owning document. Anything else is a
//! document property path.

pub const BLOB_PREFIX: &str = "blob:";

pub const BLOB_NAME: &str = "blob:name";
pub const BLOB_MIME_TYPE: &str = "blob:mime-type";
pub const BLOB_ENCODING: &str = "blob:encoding";
pub const BLOB_DIGEST: &str = "blob:digest";
pub const BLOB_LENGTH: &str = "blob:length";
pub const BLOB_XPATH: &str = "blob:xpath";

pub const REPOSITORY_NAME: &str = "ecm:repositoryName";
pub const DOCUMENT_PATH: &str = "ecm:path";
pub const IS_RECORD: &str = "ecm:isRecord";

/// Whether `path` reads from the blob rather than the document.
pub fn is_blob_path(path: &str) -> bool {
    path.starts_with(BLOB_PREFIX)
}
