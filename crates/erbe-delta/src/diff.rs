//! Structural diff between two value trees.
//!
//! The output order is fully deterministic:
//!
//! - map children are visited in one ascending pass over the union of both
//!   key sets, so removes, adds, and nested changes interleave by key;
//! - list elements are compared index by index over the shorter length,
//!   then extra elements of the new list are added at ascending indices and
//!   extra elements of the old list are removed at descending indices.
//!
//! Removing in descending order keeps every emitted index valid when the ops
//! are replayed front to back.

use std::collections::BTreeSet;

use erbe_types::{Path, PatchKind, PatchOp, PathToken, Value, ValueMap};
use tracing::debug;

/// Default tolerance for numeric comparisons in [`compute_diff`].
pub const DEFAULT_DIFF_EPSILON: f64 = 1e-6;

/// Tuning for [`compute_diff`].
#[derive(Debug, Clone, PartialEq)]
pub struct DiffOptions {
    /// Two numbers within this distance are treated as equal.
    pub epsilon: f64,
    /// Map keys skipped at every depth, on both sides.
    pub ignore_keys: BTreeSet<String>,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_DIFF_EPSILON,
            ignore_keys: BTreeSet::new(),
        }
    }
}

impl DiffOptions {
    /// Options with a custom epsilon and no ignored keys.
    pub const fn with_epsilon(epsilon: f64) -> Self {
        Self {
            epsilon,
            ignore_keys: BTreeSet::new(),
        }
    }

    /// Add keys to the ignore list.
    #[must_use]
    pub fn ignoring<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_keys.extend(keys.into_iter().map(Into::into));
        self
    }
}

/// Compute the ops that turn `old` into `new`.
///
/// `compute_diff(v, v, ..)` is always empty, and applying the result of
/// `compute_diff(a, b, ..)` to `a` yields `b` (up to `epsilon`).
pub fn compute_diff(old: &Value, new: &Value, options: &DiffOptions) -> Vec<PatchOp> {
    let mut ops = Vec::new();
    let mut path = Path::root();
    diff_node(old, new, options, &mut path, &mut ops);
    debug!(ops = ops.len(), "computed structural diff");
    ops
}

fn diff_node(old: &Value, new: &Value, options: &DiffOptions, path: &mut Path, ops: &mut Vec<PatchOp>) {
    let unchanged = match (old, new) {
        (Value::Map(a), Value::Map(b)) => {
            diff_maps(a, b, options, path, ops);
            return;
        }
        (Value::List(a), Value::List(b)) => {
            diff_lists(a, b, options, path, ops);
            return;
        }
        (Value::Number(a), Value::Number(b)) => (a - b).abs() <= options.epsilon,
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::String(a), Value::String(b)) => a == b,
        _ => false,
    };
    if !unchanged {
        ops.push(PatchOp::replace(path.clone(), old.clone(), new.clone()));
    }
}

fn diff_maps(old: &ValueMap, new: &ValueMap, options: &DiffOptions, path: &mut Path, ops: &mut Vec<PatchOp>) {
    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    for key in keys {
        if options.ignore_keys.contains(key) {
            continue;
        }
        path.push(PathToken::Key(key.clone()));
        match (old.get(key), new.get(key)) {
            (Some(a), Some(b)) => diff_node(a, b, options, path, ops),
            (Some(a), None) => ops.push(PatchOp::remove(path.clone(), a.clone())),
            (None, Some(b)) => ops.push(PatchOp::add(path.clone(), b.clone())),
            (None, None) => {}
        }
        path.pop();
    }
}

fn diff_lists(old: &[Value], new: &[Value], options: &DiffOptions, path: &mut Path, ops: &mut Vec<PatchOp>) {
    let shared = old.len().min(new.len());
    for (index, (a, b)) in old.iter().zip(new).enumerate() {
        path.push(PathToken::Index(index));
        diff_node(a, b, options, path, ops);
        path.pop();
    }
    for (index, item) in new.iter().enumerate().skip(shared) {
        ops.push(PatchOp::add(path.index(index), item.clone()));
    }
    for (index, item) in old.iter().enumerate().skip(shared).rev() {
        ops.push(PatchOp::remove(path.index(index), item.clone()));
    }
}

/// Per-kind op counts, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffSummary {
    /// Number of add ops.
    pub added: usize,
    /// Number of remove ops.
    pub removed: usize,
    /// Number of replace ops.
    pub replaced: usize,
}

impl DiffSummary {
    /// Total op count.
    pub const fn total(&self) -> usize {
        self.added.saturating_add(self.removed).saturating_add(self.replaced)
    }
}

/// Count ops by kind.
pub fn diff_summary(ops: &[PatchOp]) -> DiffSummary {
    ops.iter().fold(DiffSummary::default(), |mut summary, op| {
        let slot = match op.kind() {
            PatchKind::Add => &mut summary.added,
            PatchKind::Remove => &mut summary.removed,
            PatchKind::Replace => &mut summary.replaced,
        };
        *slot = slot.saturating_add(1);
        summary
    })
}
