//! Declarative blob dispatch for Cask.
//!
//! A dispatcher decides which provider owns a blob. The default dispatcher
//! runs in one of two modes:
//!
//! - **Repository-name mode** (no rules configured): every blob goes to the
//!   provider named after its repository, and keys are stored bare.
//! - **Rule mode**: an ordered list of [`Rule`]s, each an AND of
//!   [`Clause`]s, evaluated first-match-wins with a mandatory default.
//!   Keys are stored prefixed with the provider id so they survive later
//!   rule changes.
//!
//! # Clause syntax
//!
//! A rule's clauses are comma-joined `path<op>value` tokens with operators
//! `=`, `!=`, `<`, `>`, `~` (glob) and `^` (regex). The literal `default`
//! names the fallback provider.
//!
//! ```rust
//! use cask_dispatch::{DispatchDescriptor, DefaultBlobDispatcher};
//!
//! let descriptor = DispatchDescriptor::new()
//!     .with_rule("blob:mime-type~video/*", "videos")
//!     .with_rule("default", "other");
//! let dispatcher = DefaultBlobDispatcher::from_descriptor(&descriptor).unwrap();
//! assert!(dispatcher.table().is_rule_mode());
//! ```

pub mod clause;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod paths;
pub mod shared;
pub mod table;

pub use clause::{Clause, Operand, Operator};
pub use config::{DispatchDescriptor, DispatchEntry, DEFAULT_CLAUSE};
pub use dispatcher::{BlobDispatcher, DefaultBlobDispatcher, DispatchTarget};
pub use error::{DispatchError, Result};
pub use shared::SharedDispatcher;
pub use table::{DispatchTable, Rule};
