//! Ordered patch application.
//!
//! Ops apply strictly in list order. [`apply_patch`] stops at the first
//! failing op and leaves the earlier ops applied; [`apply_patch_atomic`]
//! works on a copy and only commits when every op succeeds.
//!
//! Navigation rules:
//!
//! - `add` creates missing intermediate maps on the way to its parent;
//! - `remove` and `replace` require every node on the path to exist;
//! - a key token addressing a list is read as a decimal index, an index
//!   token addressing a map is read as its decimal key;
//! - stepping into a scalar is always `PathNotFound`.

use erbe_types::{Path, PatchOp, PathToken, Value};
use tracing::{debug, warn};

use crate::error::{PatchError, PatchFailure};

/// Apply `ops` to `tree` in order, stopping at the first failure.
///
/// On failure the ops before the failing one remain applied and the
/// returned [`PatchFailure`] names the failing position.
pub fn apply_patch(tree: &mut Value, ops: &[PatchOp]) -> Result<(), PatchFailure> {
    for (index, op) in ops.iter().enumerate() {
        if let Err(error) = apply_op(tree, op) {
            warn!(index, op = %op, class = ?error.class(), error = %error, "patch op failed");
            return Err(PatchFailure { index, error });
        }
    }
    debug!(ops = ops.len(), "patch applied");
    Ok(())
}

/// Apply `ops` all-or-nothing.
///
/// The ops run against a working copy; `tree` is replaced only if every op
/// succeeds, so on failure it is left exactly as it was.
pub fn apply_patch_atomic(tree: &mut Value, ops: &[PatchOp]) -> Result<(), PatchFailure> {
    let mut working = tree.clone();
    apply_patch(&mut working, ops)?;
    *tree = working;
    Ok(())
}

fn apply_op(tree: &mut Value, op: &PatchOp) -> Result<(), PatchError> {
    match op {
        PatchOp::Add { path, new } => {
            let (last, parents) = split_target(path, "cannot add at the root")?;
            let parent = navigate(tree, parents, path, true)?;
            add_into(parent, last, new.clone(), path)
        }
        PatchOp::Remove { path, .. } => {
            let (last, parents) = split_target(path, "cannot remove the root")?;
            let parent = navigate(tree, parents, path, false)?;
            remove_from(parent, last, path)
        }
        PatchOp::Replace { path, new, .. } => {
            let Some((last, parents)) = path.split_last() else {
                if !new.is_map() {
                    return Err(PatchError::InvalidRoot { found: new.kind() });
                }
                tree.clone_from(new);
                return Ok(());
            };
            let parent = navigate(tree, parents, path, false)?;
            replace_in(parent, last, new.clone(), path)
        }
    }
}

fn split_target<'p>(path: &'p Path, reason: &str) -> Result<(&'p PathToken, &'p [PathToken]), PatchError> {
    path.split_last().ok_or_else(|| PatchError::InvalidPath {
        path: path.clone(),
        reason: reason.to_owned(),
    })
}

fn not_found(path: &Path) -> PatchError {
    PatchError::PathNotFound { path: path.clone() }
}

fn list_index(token: &PathToken, path: &Path) -> Result<usize, PatchError> {
    token.as_index().ok_or_else(|| PatchError::InvalidPath {
        path: path.clone(),
        reason: format!("list index {:?} is not a non-negative integer", token.as_key()),
    })
}

/// Walk `tokens` from `root`, optionally creating missing map entries.
fn navigate<'a>(
    root: &'a mut Value,
    tokens: &[PathToken],
    full: &Path,
    create: bool,
) -> Result<&'a mut Value, PatchError> {
    let mut current = root;
    for token in tokens {
        current = match current {
            Value::Map(map) => {
                let key = token.as_key().into_owned();
                if create {
                    map.entry(key).or_insert_with(Value::empty_map)
                } else {
                    map.get_mut(&key).ok_or_else(|| not_found(full))?
                }
            }
            Value::List(items) => {
                let index = token.as_index().ok_or_else(|| not_found(full))?;
                items.get_mut(index).ok_or_else(|| not_found(full))?
            }
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {
                return Err(not_found(full));
            }
        };
    }
    Ok(current)
}

fn add_into(parent: &mut Value, last: &PathToken, new: Value, path: &Path) -> Result<(), PatchError> {
    match parent {
        Value::Map(map) => {
            map.insert(last.as_key().into_owned(), new);
            Ok(())
        }
        Value::List(items) => {
            let index = list_index(last, path)?;
            let len = items.len();
            if index > len {
                return Err(PatchError::IndexOutOfRange {
                    path: path.clone(),
                    index,
                    len,
                });
            }
            items.insert(index, new);
            Ok(())
        }
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => Err(not_found(path)),
    }
}

fn remove_from(parent: &mut Value, last: &PathToken, path: &Path) -> Result<(), PatchError> {
    match parent {
        Value::Map(map) => {
            let key = last.as_key();
            if map.remove(&*key).is_none() {
                return Err(PatchError::KeyNotFound {
                    path: path.clone(),
                    key: key.into_owned(),
                });
            }
            Ok(())
        }
        Value::List(items) => {
            let index = list_index(last, path)?;
            let len = items.len();
            if index >= len {
                return Err(PatchError::IndexOutOfRange {
                    path: path.clone(),
                    index,
                    len,
                });
            }
            items.remove(index);
            Ok(())
        }
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => Err(not_found(path)),
    }
}

fn replace_in(parent: &mut Value, last: &PathToken, new: Value, path: &Path) -> Result<(), PatchError> {
    let slot = match parent {
        Value::Map(map) => map.get_mut(&*last.as_key()),
        Value::List(items) => items.get_mut(list_index(last, path)?),
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => None,
    };
    let slot = slot.ok_or_else(|| not_found(path))?;
    *slot = new;
    Ok(())
}
