//! Error taxonomy for the memory engine
//!
//! Failure handling follows a fixed policy per category:
//! - `Provider` errors propagate to the immediate caller; retry policy
//!   belongs to the caller or an outer job layer.
//! - `Parse` errors from malformed provider output are swallowed at the
//!   adapter: the condition is logged and an empty result returned.
//! - `NotFound` converts to `None`/empty at component boundaries.
//! - `Validation` filters the offending entry; the rest of the batch
//!   still succeeds.
//! - `Conflict` signals a revision mismatch on a checked write; callers
//!   re-read and retry within a bounded budget.

use thiserror::Error;

/// Core error type shared by all engines
#[derive(Debug, Error)]
pub enum CoreError {
    /// Embedding or completion provider call failed
    #[error("provider error: {0}")]
    Provider(String),

    /// Structured provider output could not be parsed
    #[error("unparseable provider output: {0}")]
    Parse(String),

    /// A referenced memory or entity does not exist
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// An entry in a batch failed validation
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    /// Revision mismatch on an optimistically versioned write
    #[error("revision conflict on memory {id}: expected {expected}, found {found}")]
    Conflict {
        id: String,
        expected: u64,
        found: u64,
    },

    /// Fact store failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Key-value cache failure
    #[error("cache error: {0}")]
    Cache(String),

    /// An operation exceeded its deadline; all in-flight branches were
    /// aborted together
    #[error("operation timed out after {0} ms")]
    Timeout(u64),
}

impl CoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Type alias for Results using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_predicate() {
        let err = CoreError::Conflict {
            id: "m1".to_string(),
            expected: 3,
            found: 4,
        };
        assert!(err.is_conflict());
        assert!(!CoreError::Storage("down".to_string()).is_conflict());
    }

    #[test]
    fn test_not_found_display() {
        let err = CoreError::not_found("entity", "john");
        assert_eq!(err.to_string(), "entity not found: john");
        assert!(err.is_not_found());
    }
}
