//! Error types for patch application.
//!
//! Every [`PatchError`] belongs to an [`ErrorClass`]. Validation errors mean
//! the op itself is malformed and retrying it can never succeed. Structural
//! errors mean the op does not fit the tree it was applied to.

use erbe_types::{Path, ValueKind};

/// Broad category of a [`PatchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The op is malformed regardless of the target tree.
    Validation,
    /// The op does not match the shape of the target tree.
    Structural,
}

/// A single patch op could not be applied.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PatchError {
    /// The path cannot be used for this op (e.g. add/remove at the root, or a
    /// non-numeric token addressing a list).
    #[error("invalid path {path}: {reason}")]
    InvalidPath {
        /// The offending path.
        path: Path,
        /// Why the path was rejected.
        reason: String,
    },

    /// A whole-root replace supplied something other than a map.
    #[error("root replacement must be a map, got {found}")]
    InvalidRoot {
        /// Kind of the rejected value.
        found: ValueKind,
    },

    /// Navigation hit a missing node or a scalar.
    #[error("path not found: {path}")]
    PathNotFound {
        /// The path being resolved.
        path: Path,
    },

    /// A remove targeted a map key that does not exist.
    #[error("key {key:?} not found at {path}")]
    KeyNotFound {
        /// The full target path.
        path: Path,
        /// The missing key.
        key: String,
    },

    /// A list index was outside the valid range for the op.
    #[error("index {index} out of range at {path} (len {len})")]
    IndexOutOfRange {
        /// The full target path.
        path: Path,
        /// The requested index.
        index: usize,
        /// Length of the list at the time of the op.
        len: usize,
    },
}

impl PatchError {
    /// Classify this error.
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidPath { .. } | Self::InvalidRoot { .. } => ErrorClass::Validation,
            Self::PathNotFound { .. } | Self::KeyNotFound { .. } | Self::IndexOutOfRange { .. } => {
                ErrorClass::Structural
            }
        }
    }
}

/// A patch batch stopped at the op with position `index`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("patch op #{index} failed: {error}")]
pub struct PatchFailure {
    /// Zero-based position of the failing op in the batch.
    pub index: usize,
    /// What went wrong.
    #[source]
    pub error: PatchError,
}

impl PatchFailure {
    /// Class of the underlying error.
    pub const fn class(&self) -> ErrorClass {
        self.error.class()
    }
}
