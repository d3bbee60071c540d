//! Shared type definitions for the Erbe world state engine.
//!
//! Every crate in the workspace speaks in terms of the types defined here:
//! the recursive [`Value`] tree that holds a world record, the [`Path`] used
//! to address nodes inside it, and the [`PatchOp`] instructions exchanged
//! between the diff engine, the patch applier, and audit consumers.
//!
//! # Modules
//!
//! - [`value`] -- The closed [`Value`] variant type and its serde mapping
//! - [`path`] -- Token-sequence paths with pointer, dotted, and bracketed
//!   text encodings
//! - [`patch`] -- Add/Remove/Replace patch operations

pub mod patch;
pub mod path;
pub mod value;

// Re-export all public types at crate root for convenience.
pub use patch::{PatchKind, PatchOp};
pub use path::{Path, PathParseError, PathStyle, PathToken};
pub use value::{Value, ValueKind, ValueMap};
