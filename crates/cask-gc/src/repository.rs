//! Collaborator contracts consumed by the coordinator.
//!
//! Document persistence and transactions belong to the surrounding
//! repository service. The coordinator calls back into it through these
//! two traits.

use std::time::Duration;

use cask_types::{BlobInfo, CollaboratorError};

/// Enumerates repositories and the blobs their documents reference.
pub trait DocumentRepositories: Send + Sync {
    /// Names of every repository, in a stable order.
    fn repository_names(&self) -> Result<Vec<String>, CollaboratorError>;

    /// Call `visitor` once for every blob referenced by any live document of
    /// `repository`. Keys are reported as persisted, prefix included.
    fn visit_blobs(
        &self,
        repository: &str,
        visitor: &mut dyn FnMut(&BlobInfo),
    ) -> Result<(), CollaboratorError>;
}

/// The ambient transaction of the calling thread.
pub trait TransactionManager: Send + Sync {
    fn is_active(&self) -> bool;

    /// Begin a transaction; `None` uses the manager's default timeout.
    fn begin(&self, timeout: Option<Duration>) -> Result<(), CollaboratorError>;

    fn commit(&self) -> Result<(), CollaboratorError>;

    fn rollback(&self) -> Result<(), CollaboratorError>;
}
