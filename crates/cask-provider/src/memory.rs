//! In-memory blob storage.
//!
//! [`MemoryStorages`] is a pool of named [`MemoryStorage`]s. Several
//! [`InMemoryBlobProvider`]s configured with the same `storage` property
//! front the same storage, and their collectors report the same identity.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use cask_types::{BlobInfo, ContentDigest};

use crate::context::{BlobContext, BlobUpdateContext};
use crate::error::{ProviderError, ProviderResult};
use crate::stats::GcStats;
use crate::traits::{BlobProvider, CollectorPhase, GarbageCollector, ProviderProperties};

/// Provider property naming the shared storage (defaults to the provider id).
pub const PROP_STORAGE: &str = "storage";
/// Provider property enabling transient (random, never reused) keys.
pub const PROP_TRANSIENT: &str = "transient";
/// Provider property enabling record mode (retention checks, per-write keys).
pub const PROP_RECORD: &str = "record";

fn poisoned<T>(_: PoisonError<T>) -> ProviderError {
    ProviderError::Backend("lock poisoned".into())
}

fn flag(properties: &ProviderProperties, name: &str) -> ProviderResult<bool> {
    match properties.get(name).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) if v == "true" => Ok(true),
        Some(v) if v == "false" || v.is_empty() => Ok(false),
        Some(v) => Err(ProviderError::InvalidConfig(format!(
            "property '{name}' must be true or false, got '{v}'"
        ))),
    }
}

#[derive(Clone, Debug)]
struct StoredBlob {
    content: Bytes,
    /// Write sequence; collectors never sweep content written after their
    /// run started.
    sequence: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Retention {
    retain_until: Option<DateTime<Utc>>,
    legal_hold: bool,
}

impl Retention {
    fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.legal_hold || self.retain_until.is_some_and(|until| until > now)
    }
}

/// One named in-memory storage area.
#[derive(Debug)]
pub struct MemoryStorage {
    name: String,
    blobs: RwLock<HashMap<String, StoredBlob>>,
    retention: RwLock<HashMap<String, Retention>>,
    sequence: AtomicU64,
}

impl MemoryStorage {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blobs: RwLock::new(HashMap::new()),
            retention: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if the storage is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` is stored.
    pub fn contains(&self, key: &str) -> bool {
        self.blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Total bytes across all stored blobs.
    pub fn total_bytes(&self) -> u64 {
        self.blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|b| b.content.len() as u64)
            .sum()
    }

    /// Sorted list of all stored keys.
    pub fn keys(&self) -> Vec<String> {
        let map = self.blobs.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = map.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    fn put(&self, key: &str, content: &[u8]) -> ProviderResult<()> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let mut map = self.blobs.write().map_err(poisoned)?;
        // Re-storing identical content refreshes the sequence so a sweep that
        // is already running will not reclaim it.
        map.entry(key.to_string())
            .and_modify(|b| b.sequence = sequence)
            .or_insert_with(|| StoredBlob {
                content: Bytes::copy_from_slice(content),
                sequence,
            });
        Ok(())
    }

    fn get(&self, key: &str) -> ProviderResult<Option<Bytes>> {
        let map = self.blobs.read().map_err(poisoned)?;
        Ok(map.get(key).map(|b| b.content.clone()))
    }

    fn remove(&self, key: &str) -> ProviderResult<Option<u64>> {
        let mut map = self.blobs.write().map_err(poisoned)?;
        let removed = map.remove(key).map(|b| b.content.len() as u64);
        drop(map);
        self.retention.write().map_err(poisoned)?.remove(key);
        Ok(removed)
    }

    fn is_protected(&self, key: &str, now: DateTime<Utc>) -> ProviderResult<bool> {
        let retention = self.retention.read().map_err(poisoned)?;
        Ok(retention.get(key).is_some_and(|r| r.is_active(now)))
    }

    fn update_retention(&self, ctx: &BlobUpdateContext) -> ProviderResult<()> {
        let mut retention = self.retention.write().map_err(poisoned)?;
        let entry = retention.entry(ctx.key.clone()).or_default();
        if let Some(until) = ctx.retain_until {
            entry.retain_until = until;
        }
        if let Some(hold) = ctx.legal_hold {
            entry.legal_hold = hold;
        }
        if *entry == Retention::default() {
            retention.remove(&ctx.key);
        }
        Ok(())
    }

    fn snapshot(&self) -> ProviderResult<Vec<(String, u64, u64)>> {
        let map = self.blobs.read().map_err(poisoned)?;
        Ok(map
            .iter()
            .map(|(k, b)| (k.clone(), b.content.len() as u64, b.sequence))
            .collect())
    }
}

/// A pool of named storages shared by in-memory providers.
#[derive(Debug, Default)]
pub struct MemoryStorages {
    storages: Mutex<HashMap<String, Arc<MemoryStorage>>>,
}

impl MemoryStorages {
    pub fn new() -> Self {
        Self::default()
    }

    /// The storage named `name`, created on first use.
    pub fn storage(&self, name: &str) -> Arc<MemoryStorage> {
        let mut storages = self.storages.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            storages
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(MemoryStorage::new(name))),
        )
    }
}

struct Initialized {
    id: String,
    storage: Arc<MemoryStorage>,
    transient: bool,
    record: bool,
    collector: Arc<InMemoryGarbageCollector>,
}

/// [`BlobProvider`] over a [`MemoryStorage`].
///
/// Plain keys are the hex content digest, so identical content is stored
/// once. Transient and record-mode keys are random UUIDs: record content is
/// deleted with its document and must never be shared with another one.
pub struct InMemoryBlobProvider {
    storages: Arc<MemoryStorages>,
    state: Option<Initialized>,
    closed: AtomicBool,
}

impl InMemoryBlobProvider {
    /// Create an uninitialized provider drawing storage from `storages`.
    pub fn new(storages: Arc<MemoryStorages>) -> Self {
        Self {
            storages,
            state: None,
            closed: AtomicBool::new(false),
        }
    }

    /// The storage backing this provider.
    pub fn storage(&self) -> ProviderResult<&Arc<MemoryStorage>> {
        self.state().map(|s| &s.storage)
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn state(&self) -> ProviderResult<&Initialized> {
        match &self.state {
            Some(state) if !self.is_closed() => Ok(state),
            Some(state) => Err(ProviderError::Unavailable(state.id.clone())),
            None => Err(ProviderError::Unavailable("<uninitialized memory provider>".into())),
        }
    }
}

impl BlobProvider for InMemoryBlobProvider {
    fn initialize(&mut self, id: &str, properties: &ProviderProperties) -> ProviderResult<()> {
        if let Some(state) = &self.state {
            if state.id == id {
                return Ok(());
            }
            return Err(ProviderError::InvalidConfig(format!(
                "provider already initialized as '{}'",
                state.id
            )));
        }
        let storage_name = properties
            .get(PROP_STORAGE)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .unwrap_or(id);
        let storage = self.storages.storage(storage_name);
        let transient = flag(properties, PROP_TRANSIENT)?;
        let record = flag(properties, PROP_RECORD)?;
        info!(provider = %id, storage = %storage_name, transient, record, "memory provider initialized");
        self.state = Some(Initialized {
            id: id.to_string(),
            collector: Arc::new(InMemoryGarbageCollector::new(Arc::clone(&storage))),
            storage,
            transient,
            record,
        });
        Ok(())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            if let Some(state) = &self.state {
                debug!(provider = %state.id, "memory provider closed");
            }
        }
    }

    fn is_transient(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.transient)
    }

    fn is_record_mode(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.record)
    }

    fn read_blob(&self, info: &BlobInfo) -> ProviderResult<Bytes> {
        let state = self.state()?;
        state
            .storage
            .get(&info.key)?
            .ok_or_else(|| ProviderError::NotFound(info.key.clone()))
    }

    fn write_blob(&self, ctx: &BlobContext<'_>) -> ProviderResult<String> {
        let state = self.state()?;
        let key = if state.transient || state.record {
            uuid::Uuid::now_v7().simple().to_string()
        } else {
            ContentDigest::compute(ctx.content).to_hex()
        };
        state.storage.put(&key, ctx.content)?;
        debug!(provider = %state.id, key = %key, bytes = ctx.content.len(), "blob written");
        Ok(key)
    }

    fn delete_blob(&self, ctx: &BlobUpdateContext) -> ProviderResult<()> {
        let state = self.state()?;
        if state.record && state.storage.is_protected(&ctx.key, Utc::now())? {
            return Err(ProviderError::RetentionViolation(format!(
                "blob {} in provider {} is under retention or legal hold",
                ctx.key, state.id
            )));
        }
        if state.storage.remove(&ctx.key)?.is_some() {
            debug!(provider = %state.id, key = %ctx.key, "blob deleted");
        }
        Ok(())
    }

    fn update_blob(&self, ctx: &BlobUpdateContext) -> ProviderResult<()> {
        let state = self.state()?;
        if !state.record {
            debug!(provider = %state.id, key = %ctx.key, "retention update ignored outside record mode");
            return Ok(());
        }
        state.storage.update_retention(ctx)
    }

    fn garbage_collector(&self) -> Option<Arc<dyn GarbageCollector>> {
        let state = self.state.as_ref()?;
        Some(Arc::clone(&state.collector) as Arc<dyn GarbageCollector>)
    }
}

struct RunState {
    phase: CollectorPhase,
    marked: HashSet<String>,
    start_sequence: u64,
    started: Option<Instant>,
}

impl RunState {
    fn idle() -> Self {
        Self {
            phase: CollectorPhase::Idle,
            marked: HashSet::new(),
            start_sequence: 0,
            started: None,
        }
    }
}

/// Mark-and-sweep collector over a [`MemoryStorage`].
///
/// Sweeping never removes content written after the run started, nor
/// content under retention or legal hold.
pub struct InMemoryGarbageCollector {
    storage: Arc<MemoryStorage>,
    run: Mutex<RunState>,
}

impl InMemoryGarbageCollector {
    pub fn new(storage: Arc<MemoryStorage>) -> Self {
        Self {
            storage,
            run: Mutex::new(RunState::idle()),
        }
    }

    /// Number of keys marked in the current run.
    pub fn marked_count(&self) -> usize {
        self.run.lock().unwrap_or_else(PoisonError::into_inner).marked.len()
    }
}

impl GarbageCollector for InMemoryGarbageCollector {
    fn identity(&self) -> String {
        format!("memory:{}", self.storage.name())
    }

    fn start(&self) -> ProviderResult<()> {
        let mut run = self.run.lock().map_err(poisoned)?;
        if run.phase != CollectorPhase::Idle {
            return Err(ProviderError::GcInProgress(self.identity()));
        }
        *run = RunState {
            phase: CollectorPhase::Marking,
            marked: HashSet::new(),
            start_sequence: self.storage.current_sequence(),
            started: Some(Instant::now()),
        };
        debug!(collector = %self.identity(), "collector started");
        Ok(())
    }

    fn mark(&self, key: &str) {
        let mut run = self.run.lock().unwrap_or_else(PoisonError::into_inner);
        if run.phase == CollectorPhase::Marking {
            run.marked.insert(key.to_string());
        } else {
            debug!(collector = %self.identity(), key = %key, "mark ignored outside marking phase");
        }
    }

    fn stop(&self, delete: bool) -> ProviderResult<GcStats> {
        let (marked, start_sequence, started) = {
            let mut run = self.run.lock().map_err(poisoned)?;
            if run.phase != CollectorPhase::Marking {
                return Err(ProviderError::Backend(format!(
                    "collector {} stopped while {:?}",
                    self.identity(),
                    run.phase
                )));
            }
            run.phase = CollectorPhase::Sweeping;
            (
                std::mem::take(&mut run.marked),
                run.start_sequence,
                run.started,
            )
        };

        let now = Utc::now();
        let mut stats = GcStats::default();
        for (key, size, sequence) in self.storage.snapshot()? {
            let keep = marked.contains(&key)
                || sequence > start_sequence
                || self.storage.is_protected(&key, now)?;
            if keep {
                stats.count += 1;
                stats.total_bytes += size;
                continue;
            }
            stats.count_deleted += 1;
            stats.bytes_deleted += size;
            if delete {
                self.storage.remove(&key)?;
            }
        }

        let elapsed = started.map(|s| s.elapsed()).unwrap_or_default();
        *self.run.lock().map_err(poisoned)? = RunState::idle();
        info!(
            collector = %self.identity(),
            kept = stats.count,
            garbage = stats.count_deleted,
            deleted = delete,
            "collector sweep finished"
        );
        Ok(stats.with_duration(elapsed))
    }

    fn phase(&self) -> CollectorPhase {
        self.run.lock().unwrap_or_else(PoisonError::into_inner).phase
    }

    fn reset(&self) {
        *self.run.lock().unwrap_or_else(PoisonError::into_inner) = RunState::idle();
        debug!(collector = %self.identity(), "collector reset");
    }
}
