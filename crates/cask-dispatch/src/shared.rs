use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::dispatcher::{BlobDispatcher, DefaultBlobDispatcher};

/// A swappable, shared dispatcher.
///
/// Readers take a snapshot with [`current`](Self::current) and keep using
/// it for the whole operation; [`replace`](Self::replace) installs a new
/// dispatcher without disturbing snapshots already handed out.
#[derive(Clone)]
pub struct SharedDispatcher {
    inner: Arc<RwLock<Arc<dyn BlobDispatcher>>>,
}

impl SharedDispatcher {
    pub fn new(dispatcher: Arc<dyn BlobDispatcher>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(dispatcher)),
        }
    }

    /// The dispatcher in effect right now.
    pub fn current(&self) -> Arc<dyn BlobDispatcher> {
        Arc::clone(&self.inner.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Install `dispatcher`, returning the one it replaces.
    pub fn replace(&self, dispatcher: Arc<dyn BlobDispatcher>) -> Arc<dyn BlobDispatcher> {
        let mut current = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, dispatcher)
    }
}

impl Default for SharedDispatcher {
    fn default() -> Self {
        Self::new(Arc::new(DefaultBlobDispatcher::repository_name()))
    }
}

impl fmt::Debug for SharedDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedDispatcher")
            .field("clause_paths", &self.current().clause_paths())
            .finish()
    }
}
