//! Serde form of a dispatch table.
//!
//! ```toml
//! [[dispatch.rules]]
//! clauses = "blob:mime-type~video/*"
//! provider = "videos"
//!
//! [[dispatch.rules]]
//! clauses = "default"
//! provider = "other"
//! ```

use serde::{Deserialize, Serialize};

/// Clause string naming the default provider.
pub const DEFAULT_CLAUSE: &str = "default";

/// One configured rule: comma-joined clauses and the provider they select.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchEntry {
    pub clauses: String,
    pub provider: String,
}

impl DispatchEntry {
    pub fn is_default(&self) -> bool {
        self.clauses.trim() == DEFAULT_CLAUSE
    }
}

/// Ordered dispatch rules. An empty descriptor selects repository-name mode.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchDescriptor {
    #[serde(default)]
    pub rules: Vec<DispatchEntry>,
}

impl DispatchDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule. Pass [`DEFAULT_CLAUSE`] to name the default provider.
    pub fn with_rule(mut self, clauses: impl Into<String>, provider: impl Into<String>) -> Self {
        self.rules.push(DispatchEntry {
            clauses: clauses.into(),
            provider: provider.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
