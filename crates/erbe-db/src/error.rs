//! Error types for the world store.
//!
//! Only saving can fail. Loading always produces a record and reports what
//! it had to do through [`LoadReport`](crate::LoadReport) instead.

use std::path::PathBuf;

/// Errors that can occur while saving a world record.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Every write attempt failed.
    #[error("could not write {path} after {attempts} attempts: {source}")]
    WriteExhausted {
        /// The document that could not be written.
        path: PathBuf,
        /// How many attempts were made.
        attempts: u32,
        /// The error from the last attempt.
        #[source]
        source: std::io::Error,
    },

    /// The record holds a NaN or infinite number, which JSON cannot carry.
    #[error("refusing to save non-finite number at {path}")]
    NonFiniteNumber {
        /// Pointer to the offending number.
        path: erbe_types::Path,
    },

    /// The record could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
