//! Typed error taxonomy for record operations.
//!
//! Interactive callers need to distinguish "bad input" ([`MemoryError::Validation`])
//! from "stale reference" ([`MemoryError::NotFound`]). Policy boundaries
//! (restore outside the undo window, already-distilled candidate sets) are
//! deliberately *not* errors — they come back as result values with a
//! machine-readable reason.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    /// A required field is missing or malformed.
    #[error("validation: {0}")]
    Validation(String),

    /// The record does not exist, or is owned by a different user.
    #[error("not found: {0}")]
    NotFound(String),

    /// The durable record store failed.
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// A stored blob failed to (de)serialize.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type MemoryResult<T> = Result<T, MemoryError>;
