//! Cross-repository garbage collection for Cask.
//!
//! The [`GcCoordinator`] drives one mark-and-sweep cycle over every
//! distinct collector known to the provider registry:
//!
//! 1. refuse to start while any collector is already running,
//! 2. `start` each distinct collector,
//! 3. visit every blob referenced by every repository and mark it,
//! 4. `stop` each collector, sweeping what was not marked,
//! 5. aggregate the statistics.
//!
//! The whole cycle runs inside one long transaction obtained from the
//! [`TransactionManager`]. Any failure resets every collector still in
//! progress so the next cycle can run.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod memory;
pub mod repository;
mod transaction;

pub use config::{FanOutPolicy, GcConfig};
pub use coordinator::{GcCoordinator, GcState};
pub use error::{GcError, GcResult};
pub use memory::{InMemoryRepositories, InMemoryTransactionManager, TransactionEvent};
pub use repository::{DocumentRepositories, TransactionManager};
pub use transaction::GC_TRANSACTION_TIMEOUT;
