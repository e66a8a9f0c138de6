use serde::{Deserialize, Serialize};

use cask_provider::ProviderProperties;

/// Declarative configuration of one provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// Provider id.
    pub name: String,
    /// Factory kind used to construct the instance (e.g. `"memory"`).
    pub kind: String,
    #[serde(default)]
    pub properties: ProviderProperties,
}

impl ProviderDescriptor {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            properties: ProviderProperties::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}
