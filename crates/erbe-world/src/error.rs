//! Error types for the `erbe-world` crate.
//!
//! [`ResonanceError`] signals caller misuse of the overlay. [`MigrationError`]
//! is produced by migration steps and is always recovered by the registry.
//! [`WorldError`] covers record construction and zone intake.

use std::path::PathBuf;

use erbe_types::ValueKind;

use crate::migration::SchemaVersion;

/// Invalid input to a [`ResonanceOverlay`](crate::ResonanceOverlay) operation.
#[derive(Debug, thiserror::Error)]
pub enum ResonanceError {
    /// A weight or density increment was NaN or infinite.
    #[error("non-finite {field} increment: {value}")]
    NonFinite {
        /// Which increment was rejected.
        field: &'static str,
        /// The rejected value.
        value: f64,
    },

    /// The decay factor was outside the open interval `(0, 1)`.
    #[error("decay lambda must be in (0, 1), got {lambda}")]
    InvalidDecay {
        /// The rejected factor.
        lambda: f64,
    },

    /// A persisted overlay could not be read back.
    #[error("malformed resonance overlay: {source}")]
    Malformed {
        /// The underlying decode error.
        #[from]
        source: serde_json::Error,
    },
}

/// A schema migration step failed.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// The step for `version` could not complete.
    #[error("migration to {version} failed: {message}")]
    Step {
        /// Version the step was upgrading to.
        version: SchemaVersion,
        /// Description of the failure.
        message: String,
    },
}

/// Errors from record construction and zone intake.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    /// A world record root must be a map.
    #[error("world record root must be a map, got {found}")]
    NotAMap {
        /// Kind of the rejected root.
        found: ValueKind,
    },

    /// The zone directory could not be listed.
    #[error("cannot read zone directory {path}: {source}")]
    ZoneDir {
        /// The directory being read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// An overlay operation failed.
    #[error("resonance error: {source}")]
    Resonance {
        /// The underlying overlay error.
        #[from]
        source: ResonanceError,
    },
}
