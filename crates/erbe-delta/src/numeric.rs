//! Signed numeric deltas between two versions of a value tree.
//!
//! Only nodes present in both trees are visited. Maps recurse over their
//! shared keys, lists over their shared prefix, and an entry is recorded
//! wherever both sides hold a number that moved by more than `epsilon`.
//! Added and removed nodes never produce entries; pair this with
//! [`compute_diff`](crate::diff::compute_diff) for structural changes.

use std::collections::BTreeMap;

use erbe_types::{Path, PathStyle, PathToken, Value};
use serde::{Deserialize, Serialize};

/// Default minimum change recorded by [`compute_numeric_deltas`].
pub const DEFAULT_NUMERIC_EPSILON: f64 = 1e-3;

/// Tuning for [`compute_numeric_deltas`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumericDeltaOptions {
    /// Changes with magnitude at or below this are dropped.
    pub epsilon: f64,
    /// Encoding used for the entry keys.
    pub style: PathStyle,
    /// Only compare numeric fields directly under the root.
    pub top_level_only: bool,
}

impl Default for NumericDeltaOptions {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_NUMERIC_EPSILON,
            style: PathStyle::Pointer,
            top_level_only: false,
        }
    }
}

/// Rendered path to signed delta (`new - old`), sorted by path text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaMap {
    /// Encoding the keys were rendered with.
    pub style: PathStyle,
    /// Path text to delta.
    pub entries: BTreeMap<String, f64>,
}

impl DeltaMap {
    /// An empty map for the given style.
    pub const fn new(style: PathStyle) -> Self {
        Self {
            style,
            entries: BTreeMap::new(),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Delta recorded for the given path text.
    pub fn get(&self, path: &str) -> Option<f64> {
        self.entries.get(path).copied()
    }

    /// Entries whose magnitude is at least `min_abs`.
    #[must_use]
    pub fn filter_min_abs(&self, min_abs: f64) -> Self {
        Self {
            style: self.style,
            entries: self
                .entries
                .iter()
                .filter(|(_, delta)| delta.abs() >= min_abs)
                .map(|(path, delta)| (path.clone(), *delta))
                .collect(),
        }
    }

    /// Sum deltas by top-level field (`/zones/a/energy` rolls into `zones`).
    pub fn sum_by_top_level(&self) -> BTreeMap<String, f64> {
        let mut totals = BTreeMap::new();
        for (path, delta) in &self.entries {
            *totals.entry(top_level_key(path, self.style)).or_insert(0.0) += delta;
        }
        totals
    }

    /// Sum deltas per zone id for entries under `/zones/<id>/...`.
    ///
    /// Only pointer-style keys are understood; maps rendered in another
    /// style always produce an empty rollup.
    pub fn sum_by_zone(&self) -> BTreeMap<String, f64> {
        let mut totals = BTreeMap::new();
        if self.style != PathStyle::Pointer {
            return totals;
        }
        for (path, delta) in &self.entries {
            let Some(rest) = path.strip_prefix("/zones/") else {
                continue;
            };
            let Some((zone, _)) = rest.split_once('/') else {
                continue;
            };
            *totals.entry(unescape_pointer(zone)).or_insert(0.0) += delta;
        }
        totals
    }

    /// One human-readable line per entry, e.g. `/symbolic_density: +0.0520`.
    pub fn summary_lines(&self, precision: usize) -> Vec<String> {
        self.entries
            .iter()
            .map(|(path, delta)| {
                let sign = if *delta >= 0.0 { "+" } else { "" };
                format!("{path}: {sign}{delta:.precision$}")
            })
            .collect()
    }
}

fn unescape_pointer(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

fn top_level_key(path: &str, style: PathStyle) -> String {
    match style {
        PathStyle::Pointer => path
            .strip_prefix('/')
            .map(|rest| unescape_pointer(rest.split('/').next().unwrap_or_default()))
            .unwrap_or_default(),
        PathStyle::Dotted => path
            .split(['.', '['])
            .next()
            .unwrap_or_default()
            .to_owned(),
        PathStyle::Brackets => path
            .strip_prefix("[\"")
            .and_then(|rest| rest.split_once("\"]"))
            .map(|(key, _)| key.replace("\\\"", "\""))
            .unwrap_or_default(),
    }
}

/// Compute `new - old` for every numeric leaf shared by both trees.
pub fn compute_numeric_deltas(old: &Value, new: &Value, options: &NumericDeltaOptions) -> DeltaMap {
    let mut out = DeltaMap::new(options.style);
    if options.top_level_only {
        if let (Some(old_map), Some(new_map)) = (old.as_map(), new.as_map()) {
            for (key, new_value) in new_map {
                if let (Some(a), Some(b)) = (old_map.get(key).and_then(Value::as_f64), new_value.as_f64()) {
                    record(&mut out, &Path::root().key(key), b - a, options);
                }
            }
        }
        return out;
    }
    let mut path = Path::root();
    walk(old, new, &mut path, &mut out, options);
    out
}

fn record(out: &mut DeltaMap, path: &Path, delta: f64, options: &NumericDeltaOptions) {
    if delta.abs() > options.epsilon {
        out.entries.insert(path.render(options.style), delta);
    }
}

fn walk(old: &Value, new: &Value, path: &mut Path, out: &mut DeltaMap, options: &NumericDeltaOptions) {
    match (old, new) {
        (Value::Number(a), Value::Number(b)) => record(out, path, b - a, options),
        (Value::Map(a), Value::Map(b)) => {
            for (key, old_child) in a {
                if let Some(new_child) = b.get(key) {
                    path.push(PathToken::Key(key.clone()));
                    walk(old_child, new_child, path, out, options);
                    path.pop();
                }
            }
        }
        (Value::List(a), Value::List(b)) => {
            for (index, (old_child, new_child)) in a.iter().zip(b).enumerate() {
                path.push(PathToken::Index(index));
                walk(old_child, new_child, path, out, options);
                path.pop();
            }
        }
        _ => {}
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn sample() -> (Value, Value) {
        let old = json!({
            "symbolic_density": 0.30,
            "spiritual_noise": 0.10,
            "media_signal": 0.20,
            "zones": {
                "dream_gate": {"energy": 0.20, "symbolic_density": 0.20},
                "signal_vault": {"energy": 0.30}
            },
            "density_log": [0.28, 0.30, 0.33],
            "removed": 5
        });
        let new = json!({
            "symbolic_density": 0.35,
            "spiritual_noise": 0.12,
            "media_signal": 0.10,
            "zones": {
                "dream_gate": {"energy": 0.25, "symbolic_density": 0.22},
                "signal_vault": {"energy": 0.30}
            },
            "density_log": [0.28, 0.31, 0.34, 0.50],
            "added": 7
        });
        (Value::from(old), Value::from(new))
    }

    #[test]
    fn shared_numeric_leaves_only() {
        let (old, new) = sample();
        let deltas = compute_numeric_deltas(&old, &new, &NumericDeltaOptions::default());
        let keys: Vec<&str> = deltas.entries.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "/density_log/1",
                "/density_log/2",
                "/media_signal",
                "/spiritual_noise",
                "/symbolic_density",
                "/zones/dream_gate/energy",
                "/zones/dream_gate/symbolic_density",
            ]
        );
        assert!(close(deltas.get("/media_signal").unwrap(), -0.10));
    }

    #[test]
    fn epsilon_is_exclusive() {
        let old = Value::from(json!({"x": 1.0}));
        let new = Value::from(json!({"x": 1.5}));
        let options = NumericDeltaOptions {
            epsilon: 0.5,
            ..NumericDeltaOptions::default()
        };
        assert!(compute_numeric_deltas(&old, &new, &options).is_empty());
    }

    #[test]
    fn top_level_only_skips_nested() {
        let (old, new) = sample();
        let options = NumericDeltaOptions {
            top_level_only: true,
            ..NumericDeltaOptions::default()
        };
        let deltas = compute_numeric_deltas(&old, &new, &options);
        assert_eq!(deltas.len(), 3);
        assert!(deltas.get("/zones/dream_gate/energy").is_none());
    }

    #[test]
    fn dotted_style_keys() {
        let (old, new) = sample();
        let options = NumericDeltaOptions {
            style: PathStyle::Dotted,
            ..NumericDeltaOptions::default()
        };
        let deltas = compute_numeric_deltas(&old, &new, &options);
        assert!(deltas.get("zones.dream_gate.energy").is_some());
        assert!(deltas.get("density_log[2]").is_some());
        assert!(close(*deltas.sum_by_top_level().get("density_log").unwrap(), 0.02));
        assert!(deltas.sum_by_zone().is_empty());
    }

    #[test]
    fn rollups_by_top_level_and_zone() {
        let (old, new) = sample();
        let deltas = compute_numeric_deltas(&old, &new, &NumericDeltaOptions::default());
        let top = deltas.sum_by_top_level();
        assert!(close(*top.get("zones").unwrap(), 0.07));
        let zones = deltas.sum_by_zone();
        assert_eq!(zones.len(), 1);
        assert!(close(*zones.get("dream_gate").unwrap(), 0.07));
    }

    #[test]
    fn brackets_style_rolls_up_by_quoted_key() {
        let (old, new) = sample();
        let options = NumericDeltaOptions {
            style: PathStyle::Brackets,
            ..NumericDeltaOptions::default()
        };
        let deltas = compute_numeric_deltas(&old, &new, &options);
        assert!(deltas.get(r#"["zones"]["dream_gate"]["energy"]"#).is_some());
        assert!(close(*deltas.sum_by_top_level().get("zones").unwrap(), 0.07));
    }

    #[test]
    fn filter_and_summary_lines() {
        let (old, new) = sample();
        let deltas = compute_numeric_deltas(&old, &new, &NumericDeltaOptions::default());
        let big = deltas.filter_min_abs(0.045);
        assert_eq!(
            big.summary_lines(4),
            vec!["/media_signal: -0.1000", "/symbolic_density: +0.0500", "/zones/dream_gate/energy: +0.0500"]
        );
    }
}
