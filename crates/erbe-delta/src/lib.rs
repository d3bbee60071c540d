//! Structural change tracking for Erbe world records.
//!
//! This crate compares two versions of a [`Value`] tree and replays the
//! difference. [`compute_diff`] produces the ordered [`PatchOp`] list that
//! turns one tree into the other, [`apply_patch`] replays such a list, and
//! [`compute_numeric_deltas`] reports how much each shared numeric leaf
//! moved.
//!
//! # Modules
//!
//! - [`diff`] -- Deterministic structural diff with an epsilon for numbers
//!   and an ignore list for noisy keys.
//! - [`apply`] -- Ordered patch application, partial or all-or-nothing.
//! - [`numeric`] -- Signed numeric deltas between shared leaves, with
//!   rollups by top-level field and by zone.
//! - [`error`] -- Patch failures and their error classes.
//!
//! [`Value`]: erbe_types::Value
//! [`PatchOp`]: erbe_types::PatchOp

pub mod apply;
pub mod diff;
pub mod error;
pub mod numeric;

pub use apply::{apply_patch, apply_patch_atomic};
pub use diff::{DEFAULT_DIFF_EPSILON, DiffOptions, DiffSummary, compute_diff, diff_summary};
pub use error::{ErrorClass, PatchError, PatchFailure};
pub use numeric::{DEFAULT_NUMERIC_EPSILON, DeltaMap, NumericDeltaOptions, compute_numeric_deltas};
