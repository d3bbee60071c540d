//! Patch operations exchanged between the diff engine and the applier.
//!
//! The serialized shape is the audit format written into tick summaries:
//!
//! ```json
//! {"op": "replace", "path": "/zones/dream_gate/energy", "old": 0.4, "new": 0.45}
//! ```
//!
//! `old` values are informational only. The applier never checks them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::path::Path;
use crate::value::Value;

/// One instruction addressing a node by [`Path`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    /// Insert a map key (or overwrite it), or insert into a list.
    Add {
        /// Target location.
        path: Path,
        /// Value to insert.
        new: Value,
    },
    /// Delete a map key or list element.
    Remove {
        /// Target location.
        path: Path,
        /// Value that was removed, for audit.
        #[serde(default)]
        old: Value,
    },
    /// Overwrite an existing node.
    Replace {
        /// Target location.
        path: Path,
        /// Value being replaced, for audit.
        #[serde(default)]
        old: Value,
        /// Replacement value.
        new: Value,
    },
}

/// Discriminant of a [`PatchOp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchKind {
    /// [`PatchOp::Add`].
    Add,
    /// [`PatchOp::Remove`].
    Remove,
    /// [`PatchOp::Replace`].
    Replace,
}

impl fmt::Display for PatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Replace => "replace",
        })
    }
}

impl PatchOp {
    /// Build an add op.
    pub const fn add(path: Path, new: Value) -> Self {
        Self::Add { path, new }
    }

    /// Build a remove op.
    pub const fn remove(path: Path, old: Value) -> Self {
        Self::Remove { path, old }
    }

    /// Build a replace op.
    pub const fn replace(path: Path, old: Value, new: Value) -> Self {
        Self::Replace { path, old, new }
    }

    /// The operation kind.
    pub const fn kind(&self) -> PatchKind {
        match self {
            Self::Add { .. } => PatchKind::Add,
            Self::Remove { .. } => PatchKind::Remove,
            Self::Replace { .. } => PatchKind::Replace,
        }
    }

    /// The target path.
    pub const fn path(&self) -> &Path {
        match self {
            Self::Add { path, .. } | Self::Remove { path, .. } | Self::Replace { path, .. } => {
                path
            }
        }
    }
}

impl fmt::Display for PatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.path())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn replace_serializes_with_tag_and_pointer() {
        let op = PatchOp::replace(
            Path::root().key("zones").key("dream_gate").key("energy"),
            Value::from(0.4),
            Value::from(0.45),
        );
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(
            json,
            json!({"op": "replace", "path": "/zones/dream_gate/energy", "old": 0.4, "new": 0.45})
        );
    }

    #[test]
    fn remove_without_old_defaults_to_null() {
        let op: PatchOp = serde_json::from_value(json!({"op": "remove", "path": "/a/0"})).unwrap();
        assert_eq!(op.kind(), PatchKind::Remove);
        assert_eq!(op.path().to_string(), "/a/0");
        assert!(matches!(op, PatchOp::Remove { old: Value::Null, .. }));
    }

    #[test]
    fn display_shows_kind_and_path() {
        let op = PatchOp::add(Path::root().key("events").index(3), Value::from("x"));
        assert_eq!(op.to_string(), "add /events/3");
    }
}
