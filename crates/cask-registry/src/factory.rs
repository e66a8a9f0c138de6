use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use cask_provider::{BlobProvider, InMemoryBlobProvider, MemoryStorages};

use crate::error::{RegistryError, RegistryResult};

/// Kind name of the built-in in-memory provider.
pub const MEMORY_KIND: &str = "memory";

/// Constructor for an uninitialized provider instance.
pub type ProviderConstructor = Arc<dyn Fn() -> Box<dyn BlobProvider> + Send + Sync>;

/// Named provider constructors, looked up by descriptor kind.
#[derive(Clone, Default)]
pub struct ProviderFactories {
    constructors: HashMap<String, ProviderConstructor>,
}

impl ProviderFactories {
    /// An empty factory map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Factories for the built-in kinds. In-memory providers draw their
    /// storage from `storages`.
    pub fn with_defaults(storages: Arc<MemoryStorages>) -> Self {
        let mut factories = Self::new();
        factories.register(MEMORY_KIND, move || {
            Box::new(InMemoryBlobProvider::new(Arc::clone(&storages)))
        });
        factories
    }

    /// Register (or replace) the constructor for `kind`.
    pub fn register<F>(&mut self, kind: impl Into<String>, constructor: F)
    where
        F: Fn() -> Box<dyn BlobProvider> + Send + Sync + 'static,
    {
        self.constructors.insert(kind.into(), Arc::new(constructor));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    /// Construct an uninitialized instance of `kind`.
    pub fn create(&self, kind: &str) -> RegistryResult<Box<dyn BlobProvider>> {
        self.constructors
            .get(kind)
            .map(|constructor| constructor())
            .ok_or_else(|| RegistryError::Configuration(format!("unknown provider kind '{kind}'")))
    }

    /// Registered kind names, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.constructors.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

impl fmt::Debug for ProviderFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderFactories")
            .field("kinds", &self.kinds())
            .finish()
    }
}
