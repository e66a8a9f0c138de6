//! In-memory collaborators for tests and embedding.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use cask_types::{BlobInfo, CollaboratorError, Document, InMemoryDocument};

use crate::repository::{DocumentRepositories, TransactionManager};

/// A document shared between a repository and its callers.
pub type SharedDocument = Arc<RwLock<InMemoryDocument>>;

/// Named repositories of [`InMemoryDocument`]s.
#[derive(Debug, Default)]
pub struct InMemoryRepositories {
    repositories: RwLock<BTreeMap<String, Vec<SharedDocument>>>,
    failure: Mutex<Option<String>>,
}

impl InMemoryRepositories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure an (initially empty) repository exists.
    pub fn add_repository(&self, name: impl Into<String>) {
        self.write().entry(name.into()).or_default();
    }

    /// Store `doc` in the repository it names, creating the repository if
    /// needed.
    pub fn add_document(&self, doc: InMemoryDocument) -> SharedDocument {
        let repository = doc.repository_name().to_string();
        let shared = Arc::new(RwLock::new(doc));
        self.write()
            .entry(repository)
            .or_default()
            .push(Arc::clone(&shared));
        shared
    }

    /// Remove a document. Returns `false` if it was not present.
    pub fn remove_document(&self, repository: &str, id: &str) -> bool {
        let mut repositories = self.write();
        let Some(docs) = repositories.get_mut(repository) else {
            return false;
        };
        let before = docs.len();
        docs.retain(|doc| read(doc).id() != id);
        docs.len() != before
    }

    pub fn document(&self, repository: &str, id: &str) -> Option<SharedDocument> {
        self.repositories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(repository)?
            .iter()
            .find(|doc| read(doc).id() == id)
            .cloned()
    }

    /// Make every later visit fail with `message` (or succeed again with
    /// `None`).
    pub fn fail_visits(&self, message: Option<String>) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = message;
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Vec<SharedDocument>>> {
        self.repositories.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn read(doc: &SharedDocument) -> std::sync::RwLockReadGuard<'_, InMemoryDocument> {
    doc.read().unwrap_or_else(PoisonError::into_inner)
}

impl DocumentRepositories for InMemoryRepositories {
    fn repository_names(&self) -> Result<Vec<String>, CollaboratorError> {
        Ok(self
            .repositories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect())
    }

    fn visit_blobs(
        &self,
        repository: &str,
        visitor: &mut dyn FnMut(&BlobInfo),
    ) -> Result<(), CollaboratorError> {
        if let Some(message) = self.failure.lock().unwrap_or_else(PoisonError::into_inner).clone() {
            return Err(CollaboratorError::Repository(message));
        }
        let docs = self
            .repositories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(repository)
            .cloned()
            .ok_or_else(|| CollaboratorError::Repository(format!("unknown repository '{repository}'")))?;

        for doc in &docs {
            let doc = read(doc);
            for path in doc.blob_paths() {
                if let Some(blob) = doc.blob(&path) {
                    visitor(&blob.info());
                }
            }
        }
        Ok(())
    }
}

/// A call recorded by [`InMemoryTransactionManager`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionEvent {
    Begin(Option<Duration>),
    Commit,
    Rollback,
}

#[derive(Debug, Default)]
struct TransactionLog {
    active: bool,
    events: Vec<TransactionEvent>,
    fail_long: bool,
}

/// Single-threaded transaction bookkeeping that records every call.
#[derive(Debug, Default)]
pub struct InMemoryTransactionManager {
    log: Mutex<TransactionLog>,
}

impl InMemoryTransactionManager {
    /// A manager with no active transaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// A manager whose caller already holds a transaction.
    pub fn active() -> Self {
        let manager = Self::default();
        manager.lock().active = true;
        manager
    }

    /// Every call made so far, in order.
    pub fn events(&self) -> Vec<TransactionEvent> {
        self.lock().events.clone()
    }

    /// Refuse transactions that ask for an explicit timeout.
    pub fn fail_long_transactions(&self, fail: bool) {
        self.lock().fail_long = fail;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TransactionLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, event: TransactionEvent) -> Result<(), CollaboratorError> {
        let mut log = self.lock();
        if !log.active {
            return Err(CollaboratorError::Transaction("no active transaction".into()));
        }
        log.active = false;
        log.events.push(event);
        Ok(())
    }
}

impl TransactionManager for InMemoryTransactionManager {
    fn is_active(&self) -> bool {
        self.lock().active
    }

    fn begin(&self, timeout: Option<Duration>) -> Result<(), CollaboratorError> {
        let mut log = self.lock();
        if log.fail_long && timeout.is_some() {
            return Err(CollaboratorError::Transaction("transaction timeout refused".into()));
        }
        if log.active {
            return Err(CollaboratorError::Transaction("transaction already active".into()));
        }
        log.active = true;
        log.events.push(TransactionEvent::Begin(timeout));
        Ok(())
    }

    fn commit(&self) -> Result<(), CollaboratorError> {
        self.finish(TransactionEvent::Commit)
    }

    fn rollback(&self) -> Result<(), CollaboratorError> {
        self.finish(TransactionEvent::Rollback)
    }
}
