//! Deployment configuration.
//!
//! ```toml
//! [[providers]]
//! name = "videos"
//! kind = "memory"
//! properties = { storage = "media" }
//!
//! [[providers]]
//! name = "other"
//! kind = "memory"
//!
//! [[dispatch.rules]]
//! clauses = "blob:mime-type~video/*"
//! provider = "videos"
//!
//! [[dispatch.rules]]
//! clauses = "default"
//! provider = "other"
//!
//! [gc]
//! fan_out = "when_shared"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use cask_dispatch::{DispatchDescriptor, DispatchTable};
use cask_gc::GcConfig;
use cask_registry::ProviderDescriptor;

use crate::error::{BlobError, BlobResult};

/// Providers, dispatch rules and garbage collection settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaskConfig {
    #[serde(default)]
    pub providers: Vec<ProviderDescriptor>,
    #[serde(default)]
    pub dispatch: DispatchDescriptor,
    #[serde(default)]
    pub gc: GcConfig,
}

impl CaskConfig {
    pub fn from_toml_str(text: &str) -> BlobResult<Self> {
        toml::from_str(text).map_err(|e| BlobError::Configuration(e.to_string()))
    }

    pub fn load(path: &Path) -> BlobResult<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|e| BlobError::Configuration(format!("{}: {e}", path.display())))
    }

    pub fn to_toml_string(&self) -> BlobResult<String> {
        toml::to_string_pretty(self).map_err(|e| BlobError::Configuration(e.to_string()))
    }

    /// Static checks that need no provider instance: unique provider names
    /// and a well-formed dispatch table whose rules only name declared
    /// providers.
    pub fn validate(&self) -> BlobResult<DispatchTable> {
        let mut names = std::collections::BTreeSet::new();
        for provider in &self.providers {
            if !names.insert(provider.name.as_str()) {
                return Err(BlobError::Configuration(format!(
                    "provider '{}' declared twice",
                    provider.name
                )));
            }
        }

        let table = DispatchTable::from_descriptor(&self.dispatch)?;
        for provider in table.rule_providers() {
            if !names.contains(provider.as_str()) {
                return Err(BlobError::Configuration(format!(
                    "dispatch rule targets undeclared provider '{provider}'"
                )));
            }
        }
        Ok(table)
    }
}
