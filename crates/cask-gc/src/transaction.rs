use std::time::Duration;

use tracing::{debug, warn};

use crate::error::GcResult;
use crate::repository::TransactionManager;

/// Timeout of the transaction wrapping a whole collection cycle.
pub const GC_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// The long transaction a cycle runs in.
///
/// An ordinary transaction active on entry is committed first. Whatever
/// happens afterwards, dropping the guard ends the long transaction (rolled
/// back unless [`commit`](Self::commit) was called) and, if there was one,
/// starts a fresh default-timeout transaction for the caller.
pub(crate) struct LongTransaction<'a> {
    manager: &'a dyn TransactionManager,
    resume: bool,
    open: bool,
}

impl<'a> LongTransaction<'a> {
    pub(crate) fn begin(manager: &'a dyn TransactionManager, timeout: Duration) -> GcResult<Self> {
        let resume = manager.is_active();
        if resume {
            debug!("committing caller transaction before garbage collection");
            manager.commit()?;
        }
        let mut guard = Self {
            manager,
            resume,
            open: false,
        };
        manager.begin(Some(timeout))?;
        guard.open = true;
        Ok(guard)
    }

    pub(crate) fn commit(mut self) -> GcResult<()> {
        self.open = false;
        self.manager.commit()?;
        Ok(())
    }
}

impl Drop for LongTransaction<'_> {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.manager.rollback() {
                warn!(error = %e, "failed to roll back garbage collection transaction");
            }
        }
        if self.resume {
            if let Err(e) = self.manager.begin(None) {
                warn!(error = %e, "failed to resume caller transaction");
            }
        }
    }
}
