//! The persisted blob key wire format.
//!
//! A stored key is either `"<providerId>:<opaqueKey>"` or a bare
//! `<opaqueKey>`. The split happens on the first separator only, so opaque
//! keys may themselves contain `:`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Separator between the provider prefix and the provider-local key.
pub const KEY_SEPARATOR: char = ':';

/// Parsed view of a persisted blob key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobKey {
    provider: Option<String>,
    local: String,
}

impl BlobKey {
    /// Parse a persisted key.
    ///
    /// Fails only for the empty string; everything else is a valid key,
    /// with or without a provider prefix.
    pub fn parse(key: &str) -> Result<Self, TypeError> {
        if key.is_empty() {
            return Err(TypeError::InvalidKey {
                key: key.to_string(),
                reason: "key is empty".into(),
            });
        }
        Ok(match key.split_once(KEY_SEPARATOR) {
            Some((provider, local)) => Self {
                provider: Some(provider.to_string()),
                local: local.to_string(),
            },
            None => Self {
                provider: None,
                local: key.to_string(),
            },
        })
    }

    /// A key that names its provider explicitly.
    pub fn prefixed(provider: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            provider: Some(provider.into()),
            local: local.into(),
        }
    }

    /// A key without a provider prefix.
    pub fn bare(local: impl Into<String>) -> Self {
        Self {
            provider: None,
            local: local.into(),
        }
    }

    /// The provider prefix, if the key carries one.
    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    /// The provider-local part of the key.
    pub fn local(&self) -> &str {
        &self.local
    }

    /// Returns `true` if the key carries a provider prefix.
    pub fn is_prefixed(&self) -> bool {
        self.provider.is_some()
    }

    /// Strip any provider prefix from a raw key string.
    pub fn strip_prefix(key: &str) -> &str {
        key.split_once(KEY_SEPARATOR).map_or(key, |(_, local)| local)
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.provider {
            Some(provider) => write!(f, "{provider}{KEY_SEPARATOR}{}", self.local),
            None => f.write_str(&self.local),
        }
    }
}
