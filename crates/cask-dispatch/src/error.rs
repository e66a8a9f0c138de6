//! Error types for dispatch configuration.

use thiserror::Error;

/// Errors raised while building a dispatch table.
///
/// Evaluation itself never fails: a clause that cannot be evaluated simply
/// does not match.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// A clause token could not be parsed.
    #[error("malformed clause {clause:?}: {reason}")]
    MalformedClause { clause: String, reason: String },

    /// The table as a whole is inconsistent.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl DispatchError {
    pub(crate) fn malformed(clause: &str, reason: impl Into<String>) -> Self {
        Self::MalformedClause {
            clause: clause.to_string(),
            reason: reason.into(),
        }
    }
}

/// Convenience type alias for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;
