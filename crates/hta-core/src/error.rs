//! Error taxonomy for the persistence and vector boundaries.
//!
//! Hierarchy queries never return these: malformed trees degrade to empty
//! or permissive results and are reported through
//! [`Finding`](crate::hierarchy::Finding)s instead. Absence of a document
//! or vector is `Ok(None)`, not an error.

use crate::hierarchy::Finding;

/// Errors surfaced by stores, vector backends, and the adapters above them.
#[derive(Debug, thiserror::Error)]
pub enum HtaError {
    /// A vector value could not be converted to the backend's plain array shape.
    #[error("vector format mismatch for {id}: {reason}")]
    FormatMismatch { id: String, reason: String },

    #[error("vector dimension mismatch for {id}: expected {expected}, got {actual}")]
    DimensionMismatch {
        id: String,
        expected: usize,
        actual: usize,
    },

    /// The stored revision moved underneath a serialized write.
    #[error("write conflict on {key}: expected revision {expected}, found {found}")]
    WriteConflict {
        key: String,
        expected: i64,
        found: i64,
    },

    #[error("{operation} on {key} timed out after {timeout_ms}ms")]
    Timeout {
        operation: String,
        key: String,
        timeout_ms: u64,
    },

    #[error("stored document {key} is corrupted: {details}")]
    Corrupted { key: String, details: String },

    #[error("hierarchy for {key} rejected with {} finding(s)", .findings.len())]
    InvalidHierarchy { key: String, findings: Vec<Finding> },

    #[error("{operation} on {key} failed: {reason}")]
    Storage {
        operation: String,
        key: String,
        reason: String,
    },

    #[error("embedding with {model} failed: {reason}")]
    Embedding { model: String, reason: String },

    #[error("serialization failed for {key}: {reason}")]
    Serialization { key: String, reason: String },
}

impl HtaError {
    /// Wrap a backend failure with the operation and key it happened on.
    pub fn storage(operation: &str, key: impl ToString, err: impl std::fmt::Display) -> Self {
        HtaError::Storage {
            operation: operation.to_string(),
            key: key.to_string(),
            reason: err.to_string(),
        }
    }

    pub fn is_format_mismatch(&self) -> bool {
        matches!(self, HtaError::FormatMismatch { .. })
    }
}

/// Result alias for store and vector operations.
pub type Result<T> = std::result::Result<T, HtaError>;
