use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};

use cask_provider::BlobProvider;

use crate::collectors::CollectorSet;
use crate::descriptor::ProviderDescriptor;
use crate::error::{RegistryError, RegistryResult};
use crate::factory::ProviderFactories;

/// Lifecycle of the instance behind one descriptor.
enum Instance {
    /// Not built yet (or the last build failed).
    Empty,
    Live(Arc<dyn BlobProvider>),
    /// The descriptor was replaced or removed; the instance is closed.
    Retired,
}

/// One registered descriptor and its (lazily built) instance.
///
/// The instance lock doubles as the per-id construction lock: building
/// happens under the write lock, so two callers never build the same id
/// twice, while lookups of a built instance only take the read lock.
struct ProviderSlot {
    descriptor: ProviderDescriptor,
    instance: RwLock<Instance>,
}

impl ProviderSlot {
    fn new(descriptor: ProviderDescriptor) -> Self {
        Self {
            descriptor,
            instance: RwLock::new(Instance::Empty),
        }
    }

    /// Close the live instance (if any) and refuse any later build.
    fn retire(&self) {
        let mut instance = self.instance.write().unwrap_or_else(PoisonError::into_inner);
        if let Instance::Live(provider) = std::mem::replace(&mut *instance, Instance::Retired) {
            provider.close();
            info!(provider = %self.descriptor.name, "blob provider closed");
        }
    }
}

#[derive(Default)]
struct RegistryState {
    slots: HashMap<String, Arc<ProviderSlot>>,
    /// Distinct collectors, recomputed after any registry change.
    collectors: Option<CollectorSet>,
    generation: u64,
}

impl RegistryState {
    fn changed(&mut self) {
        self.collectors = None;
        self.generation += 1;
    }
}

/// Owner of every live provider instance, keyed by provider id.
pub struct ProviderRegistry {
    factories: ProviderFactories,
    state: RwLock<RegistryState>,
}

impl ProviderRegistry {
    /// Create an empty registry constructing providers through `factories`.
    pub fn new(factories: ProviderFactories) -> Self {
        Self {
            factories,
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Create a registry and register every descriptor eagerly.
    pub fn with_descriptors<I>(factories: ProviderFactories, descriptors: I) -> RegistryResult<Self>
    where
        I: IntoIterator<Item = ProviderDescriptor>,
    {
        let registry = Self::new(factories);
        for descriptor in descriptors {
            registry.register_or_replace(descriptor)?;
        }
        Ok(registry)
    }

    pub fn factories(&self) -> &ProviderFactories {
        &self.factories
    }

    /// The live provider for `id`, built on first use.
    ///
    /// A failed build caches nothing; the next call retries from the
    /// descriptor.
    pub fn get(&self, id: &str) -> RegistryResult<Arc<dyn BlobProvider>> {
        loop {
            let slot = self.slot(id)?;

            if let Instance::Live(provider) =
                &*slot.instance.read().unwrap_or_else(PoisonError::into_inner)
            {
                return Ok(Arc::clone(provider));
            }

            let mut instance = slot.instance.write().unwrap_or_else(PoisonError::into_inner);
            match &*instance {
                Instance::Live(provider) => return Ok(Arc::clone(provider)),
                // Replaced while we were waiting: look the id up again.
                Instance::Retired => continue,
                Instance::Empty => {}
            }

            let provider = self.build(&slot.descriptor)?;
            *instance = Instance::Live(Arc::clone(&provider));
            return Ok(provider);
        }
    }

    /// Register a descriptor, replacing any previous one with the same id.
    ///
    /// The previous instance is closed before the new descriptor becomes
    /// visible, so two live instances never coexist under one id.
    pub fn register_or_replace(&self, descriptor: ProviderDescriptor) -> RegistryResult<()> {
        if descriptor.name.trim().is_empty() {
            return Err(RegistryError::Configuration("provider name is empty".into()));
        }
        if !self.factories.contains(&descriptor.kind) {
            return Err(RegistryError::Configuration(format!(
                "provider '{}' has unknown kind '{}'",
                descriptor.name, descriptor.kind
            )));
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = state.slots.remove(&descriptor.name) {
            old.retire();
        }
        debug!(provider = %descriptor.name, kind = %descriptor.kind, "blob provider registered");
        state
            .slots
            .insert(descriptor.name.clone(), Arc::new(ProviderSlot::new(descriptor)));
        state.changed();
        Ok(())
    }

    /// Close and forget the provider `id`. Returns `false` if it was not
    /// registered.
    pub fn unregister(&self, id: &str) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let Some(old) = state.slots.remove(id) else {
            return false;
        };
        old.retire();
        state.changed();
        debug!(provider = %id, "blob provider unregistered");
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read_state().slots.contains_key(id)
    }

    /// The descriptor registered under `id`.
    pub fn descriptor(&self, id: &str) -> Option<ProviderDescriptor> {
        self.read_state().slots.get(id).map(|s| s.descriptor.clone())
    }

    /// Every registered provider id.
    pub fn all_ids(&self) -> BTreeSet<String> {
        self.read_state().slots.keys().cloned().collect()
    }

    /// Every registered provider, built as needed, in id order.
    pub fn all_instances(&self) -> RegistryResult<Vec<Arc<dyn BlobProvider>>> {
        self.all_ids().iter().map(|id| self.get(id)).collect()
    }

    /// The distinct garbage collectors of all registered providers.
    ///
    /// Cached until the next registry change; never patched incrementally.
    pub fn garbage_collectors(&self) -> RegistryResult<CollectorSet> {
        let generation = {
            let state = self.read_state();
            if let Some(collectors) = &state.collectors {
                return Ok(collectors.clone());
            }
            state.generation
        };

        let mut providers = Vec::new();
        for id in self.all_ids() {
            match self.get(&id) {
                Ok(provider) => providers.push((id, provider)),
                // Unregistered concurrently; the generation check below
                // discards this computation anyway.
                Err(RegistryError::UnknownProvider(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        let collectors = CollectorSet::from_providers(providers);

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.generation == generation {
            state.collectors = Some(collectors.clone());
        }
        Ok(collectors)
    }

    /// The distinct garbage collectors of the instances already built.
    ///
    /// Never constructs a provider; meant for status queries.
    pub fn live_garbage_collectors(&self) -> CollectorSet {
        if let Some(collectors) = &self.read_state().collectors {
            return collectors.clone();
        }
        let slots: Vec<(String, Arc<ProviderSlot>)> = self
            .read_state()
            .slots
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect();
        let live = slots.into_iter().filter_map(|(id, slot)| {
            match &*slot.instance.read().unwrap_or_else(PoisonError::into_inner) {
                Instance::Live(provider) => Some((id, Arc::clone(provider))),
                Instance::Empty | Instance::Retired => None,
            }
        });
        CollectorSet::from_providers(live)
    }

    /// Close every live instance and forget all descriptors.
    pub fn close(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        for (_, slot) in state.slots.drain() {
            slot.retire();
        }
        state.changed();
    }

    fn slot(&self, id: &str) -> RegistryResult<Arc<ProviderSlot>> {
        self.read_state()
            .slots
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownProvider(id.to_string()))
    }

    fn build(&self, descriptor: &ProviderDescriptor) -> RegistryResult<Arc<dyn BlobProvider>> {
        let mut provider = self.factories.create(&descriptor.kind)?;
        if let Err(source) = provider.initialize(&descriptor.name, &descriptor.properties) {
            warn!(provider = %descriptor.name, error = %source, "blob provider failed to initialize");
            return Err(RegistryError::Provider {
                id: descriptor.name.clone(),
                source,
            });
        }
        info!(provider = %descriptor.name, kind = %descriptor.kind, "blob provider built");
        Ok(Arc::from(provider))
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ProviderRegistry {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.all_ids())
            .finish()
    }
}
