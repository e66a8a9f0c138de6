use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use tracing::{debug, info, warn};

use cask_dispatch::{BlobDispatcher, SharedDispatcher};
use cask_provider::GcStats;
use cask_registry::{CollectorSet, ProviderRegistry};
use cask_types::{BlobInfo, BlobKey};

use crate::config::{FanOutPolicy, GcConfig};
use crate::error::{GcError, GcResult};
use crate::repository::{DocumentRepositories, TransactionManager};
use crate::transaction::{LongTransaction, GC_TRANSACTION_TIMEOUT};

/// Observable state of the coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GcState {
    Idle,
    Marking,
    Sweeping,
    /// The last cycle failed; its collectors have been reset.
    Aborted,
}

/// Everything fixed for the duration of one cycle.
struct Cycle {
    collectors: CollectorSet,
    dispatcher: Arc<dyn BlobDispatcher>,
    fan_out: bool,
}

/// Holds the process-wide cycle flag; releases it on drop.
struct CycleFlag<'a>(&'a AtomicBool);

impl<'a> CycleFlag<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for CycleFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs mark-and-sweep cycles across every repository and every distinct
/// collector.
///
/// At most one cycle runs at a time; a concurrent [`run_cycle`] fails with
/// [`GcError::AlreadyRunning`] instead of waiting.
///
/// [`run_cycle`]: GcCoordinator::run_cycle
pub struct GcCoordinator {
    registry: Arc<ProviderRegistry>,
    dispatcher: SharedDispatcher,
    repositories: Arc<dyn DocumentRepositories>,
    transactions: Arc<dyn TransactionManager>,
    config: GcConfig,
    running: AtomicBool,
    state: Mutex<GcState>,
    cycle: RwLock<Option<Arc<Cycle>>>,
}

impl GcCoordinator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        dispatcher: SharedDispatcher,
        repositories: Arc<dyn DocumentRepositories>,
        transactions: Arc<dyn TransactionManager>,
        config: GcConfig,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            repositories,
            transactions,
            config,
            running: AtomicBool::new(false),
            state: Mutex::new(GcState::Idle),
            cycle: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    pub fn state(&self) -> GcState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a cycle is running here or any already built collector
    /// reports a run in progress. Never builds a provider.
    pub fn is_cycle_in_progress(&self) -> bool {
        self.running.load(Ordering::Acquire) || self.registry.live_garbage_collectors().any_in_progress()
    }

    /// Run one full cycle. With `delete == false` nothing is removed but the
    /// statistics still report what would have been.
    pub fn run_cycle(&self, delete: bool) -> GcResult<GcStats> {
        let _flag = CycleFlag::acquire(&self.running).ok_or(GcError::AlreadyRunning)?;
        let collectors = self.registry.garbage_collectors()?;
        if collectors.any_in_progress() {
            return Err(GcError::AlreadyRunning);
        }

        let started = Instant::now();
        info!(collectors = collectors.len(), delete, "binaries garbage collection started");
        let transaction = LongTransaction::begin(self.transactions.as_ref(), GC_TRANSACTION_TIMEOUT)?;

        let stats = self.drive(collectors, delete)?;
        transaction.commit()?;

        let stats = stats.with_duration(started.elapsed());
        info!(
            kept = stats.count,
            garbage = stats.count_deleted,
            garbage_bytes = stats.bytes_deleted,
            duration_ms = stats.duration_ms,
            "binaries garbage collection finished"
        );
        Ok(stats)
    }

    /// Mark `key`, as persisted in `repository`, as referenced by the
    /// running cycle. Outside a cycle this does nothing.
    pub fn mark_referenced_binary(&self, key: &str, repository: &str) {
        let cycle = self
            .cycle
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match cycle {
            Some(cycle) => self.mark(&cycle, key, repository),
            None => debug!(key = %key, "mark ignored outside a garbage collection cycle"),
        }
    }

    /// Reset every collector left in progress and return to `Idle`.
    pub fn reset(&self) -> GcResult<()> {
        let _flag = CycleFlag::acquire(&self.running).ok_or(GcError::AlreadyRunning)?;
        reset_in_progress(&self.registry.garbage_collectors()?);
        self.set_state(GcState::Idle);
        Ok(())
    }

    fn drive(&self, collectors: CollectorSet, delete: bool) -> GcResult<GcStats> {
        let fan_out = match self.config.fan_out {
            FanOutPolicy::Always => true,
            FanOutPolicy::WhenShared => collectors.is_storage_shared(),
        };
        let cycle = Arc::new(Cycle {
            collectors,
            dispatcher: self.dispatcher.current(),
            fan_out,
        });

        let result = self.mark_and_sweep(&cycle, delete);
        *self.cycle.write().unwrap_or_else(PoisonError::into_inner) = None;

        match result {
            Ok(stats) => {
                self.set_state(GcState::Idle);
                Ok(stats)
            }
            Err(e) => {
                warn!(error = %e, "binaries garbage collection failed, resetting collectors");
                self.set_state(GcState::Aborted);
                reset_in_progress(&cycle.collectors);
                Err(e)
            }
        }
    }

    fn mark_and_sweep(&self, cycle: &Arc<Cycle>, delete: bool) -> GcResult<GcStats> {
        self.set_state(GcState::Marking);
        for collector in cycle.collectors.distinct() {
            collector.start()?;
        }
        *self.cycle.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(cycle));

        for repository in self.repositories.repository_names()? {
            let mut visited = 0u64;
            self.repositories.visit_blobs(&repository, &mut |info: &BlobInfo| {
                self.mark(cycle, &info.key, &repository);
                visited += 1;
            })?;
            debug!(repository = %repository, blobs = visited, "repository marked");
        }

        self.set_state(GcState::Sweeping);
        let mut stats = GcStats::default();
        for collector in cycle.collectors.distinct() {
            stats.merge(&collector.stop(delete)?);
        }
        Ok(stats)
    }

    fn mark(&self, cycle: &Cycle, key: &str, repository: &str) {
        let key = match BlobKey::parse(key) {
            Ok(key) => key,
            Err(e) => {
                warn!(repository = %repository, error = %e, "unparsable blob key not marked");
                return;
            }
        };

        if cycle.fan_out {
            for collector in cycle.collectors.distinct() {
                collector.mark(key.local());
            }
            return;
        }

        let provider = match key.provider() {
            Some(provider) => provider.to_string(),
            None => cycle.dispatcher.resolve_for_read(repository),
        };
        match cycle.collectors.collector_for(&provider) {
            Some(collector) => collector.mark(key.local()),
            None => warn!(
                provider = %provider,
                key = %key,
                "no garbage collector for provider, key not marked"
            ),
        }
    }

    fn set_state(&self, state: GcState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

fn reset_in_progress(collectors: &CollectorSet) {
    for collector in collectors.distinct() {
        if collector.is_in_progress() {
            collector.reset();
        }
    }
}

impl std::fmt::Debug for GcCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcCoordinator")
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}
