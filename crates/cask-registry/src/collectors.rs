use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use cask_provider::{BlobProvider, GarbageCollector};

/// The garbage collectors of a set of providers, deduplicated by identity.
///
/// For every identity exactly one collector is retained (the one of the
/// lowest provider id); that is the collector a cycle drives. Providers
/// sharing an identity route their marks to it.
#[derive(Clone, Default)]
pub struct CollectorSet {
    identities: BTreeMap<String, String>,
    distinct: BTreeMap<String, Arc<dyn GarbageCollector>>,
}

impl CollectorSet {
    /// Build from `(provider id, provider)` pairs. Providers without a
    /// collector are skipped.
    pub fn from_providers<I>(providers: I) -> Self
    where
        I: IntoIterator<Item = (String, Arc<dyn BlobProvider>)>,
    {
        let mut sorted: Vec<(String, Arc<dyn BlobProvider>)> = providers.into_iter().collect();
        sorted.sort_by(|(a, _), (b, _)| a.cmp(b));

        let mut set = Self::default();
        for (provider_id, provider) in sorted {
            let Some(collector) = provider.garbage_collector() else {
                continue;
            };
            let identity = collector.identity();
            set.distinct.entry(identity.clone()).or_insert(collector);
            set.identities.insert(provider_id, identity);
        }
        set
    }

    /// One collector per distinct identity, in identity order.
    pub fn distinct(&self) -> impl Iterator<Item = &Arc<dyn GarbageCollector>> {
        self.distinct.values()
    }

    /// Identity of the storage behind `provider_id`.
    pub fn identity_of(&self, provider_id: &str) -> Option<&str> {
        self.identities.get(provider_id).map(String::as_str)
    }

    /// The collector driven for `provider_id`'s storage.
    pub fn collector_for(&self, provider_id: &str) -> Option<&Arc<dyn GarbageCollector>> {
        self.identity_of(provider_id)
            .and_then(|identity| self.distinct.get(identity))
    }

    /// Whether any two providers front the same storage.
    pub fn is_storage_shared(&self) -> bool {
        self.identities.len() > self.distinct.len()
    }

    /// Whether any distinct collector reports a run in progress.
    pub fn any_in_progress(&self) -> bool {
        self.distinct.values().any(|gc| gc.is_in_progress())
    }

    /// Number of distinct collectors.
    pub fn len(&self) -> usize {
        self.distinct.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distinct.is_empty()
    }
}

impl fmt::Debug for CollectorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectorSet")
            .field("providers", &self.identities)
            .field("distinct", &self.distinct.keys().collect::<Vec<_>>())
            .finish()
    }
}
