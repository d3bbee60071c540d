//! Zone intake: defaults, standalone zone files, merging, and auto-linking.
//!
//! Zones live under the record's `zones` map, keyed by zone id. Generated or
//! hand-authored zones arrive as standalone sub-trees; [`zone_defaults`]
//! gives each one the minimal shape the rest of the world expects, and
//! [`merge_zones`] adds them without touching existing zones unless asked.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use erbe_types::{Value, ValueMap};
use tracing::{debug, warn};

use crate::error::WorldError;

/// Zone schema version stamped on zones that carry none.
pub const ZONE_VERSION: &str = "1.0.0";

/// Fill a zone's required fields in place.
///
/// The zone name comes from `name`, then `id`, then `fallback_name`.
/// `energy` falls back to `symbolic_density` and vice versa.
pub fn zone_defaults(zone: &mut ValueMap, fallback_name: &str) {
    let name = ["name", "id"]
        .iter()
        .find_map(|key| zone.get(*key).and_then(Value::as_str).filter(|s| !s.is_empty()))
        .unwrap_or(fallback_name)
        .to_owned();
    zone.insert("name".to_owned(), Value::from(name.as_str()));
    zone.entry("label".to_owned())
        .or_insert_with(|| Value::from(title_case(&name)));
    zone.entry("type".to_owned()).or_insert_with(|| Value::from("wild"));

    let density = zone.get("symbolic_density").and_then(Value::as_f64);
    let energy = zone.get("energy").and_then(Value::as_f64).or(density).unwrap_or(0.0);
    zone.insert("energy".to_owned(), Value::Number(energy));
    zone.insert("symbolic_density".to_owned(), Value::Number(density.unwrap_or(energy)));

    for key in ["spiritual_noise", "media_signal"] {
        zone.entry(key.to_owned()).or_insert(Value::Number(0.0));
    }
    for key in ["items", "traits", "markers", "links", "history"] {
        zone.entry(key.to_owned()).or_insert_with(Value::empty_list);
    }
    for key in ["rules", "weather", "timers"] {
        zone.entry(key.to_owned()).or_insert_with(Value::empty_map);
    }
    zone.entry("version".to_owned())
        .or_insert_with(|| Value::from(ZONE_VERSION));
}

/// `dream_gate` -> `Dream Gate`.
fn title_case(name: &str) -> String {
    name.replace('_', " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Read every `*.json` file in `dir` as a zone, keyed by zone id.
///
/// Files are read in name order. A file that cannot be read or does not hold
/// a JSON object is skipped with a warning. A missing directory yields no
/// zones.
pub fn load_zone_dir(dir: &Path) -> Result<BTreeMap<String, ValueMap>, WorldError> {
    let mut zones = BTreeMap::new();
    if !dir.is_dir() {
        return Ok(zones);
    }
    let listing = fs::read_dir(dir).map_err(|source| WorldError::ZoneDir {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut files: Vec<_> = listing
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();

    for path in files {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let parsed = fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str::<serde_json::Value>(&text).map_err(|e| e.to_string()));
        match parsed.map(Value::from) {
            Ok(Value::Map(mut zone)) => {
                zone_defaults(&mut zone, &stem);
                let id = zone
                    .get("name")
                    .and_then(Value::as_str)
                    .map_or_else(|| stem.clone(), str::to_owned);
                zones.insert(id, zone);
            }
            Ok(other) => {
                warn!(path = %path.display(), found = %other.kind(), "zone file is not an object; skipping");
            }
            Err(error) => {
                warn!(path = %path.display(), error = %error, "could not load zone file; skipping");
            }
        }
    }
    debug!(dir = %dir.display(), count = zones.len(), "loaded standalone zones");
    Ok(zones)
}

/// What [`merge_zones`] did with each incoming zone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Zones that were new.
    pub added: Vec<String>,
    /// Existing zones that were overwritten.
    pub replaced: Vec<String>,
    /// Existing zones that were kept.
    pub skipped: Vec<String>,
}

/// Merge `incoming` into the record's `zones` map.
///
/// Existing zones are kept unless `overwrite` is set. A non-map `zones`
/// field is replaced by a map first.
pub fn merge_zones(fields: &mut ValueMap, incoming: BTreeMap<String, ValueMap>, overwrite: bool) -> MergeReport {
    let zones = zones_mut(fields);
    let mut report = MergeReport::default();
    for (id, zone) in incoming {
        match zones.get_mut(&id) {
            Some(_) if !overwrite => report.skipped.push(id),
            Some(existing) => {
                *existing = Value::Map(zone);
                report.replaced.push(id);
            }
            None => {
                zones.insert(id.clone(), Value::Map(zone));
                report.added.push(id);
            }
        }
    }
    report
}

/// The record's `zones` map, created or coerced if needed.
pub fn zones_mut(fields: &mut ValueMap) -> &mut ValueMap {
    fields
        .entry("zones".to_owned())
        .or_insert_with(Value::empty_map)
        .ensure_map()
}

/// Link every zone that has no links to its neighbours in id order,
/// wrapping around into a ring. Zones that already have links are left as
/// they are.
///
/// Returns how many zones gained links.
pub fn autolink_ring(zones: &mut ValueMap) -> usize {
    let ids: Vec<String> = zones.keys().cloned().collect();
    let Some(last) = ids.len().checked_sub(1) else {
        return 0;
    };
    if last == 0 {
        return 0;
    }
    let mut linked = 0_usize;
    for (index, id) in ids.iter().enumerate() {
        let Some(Value::Map(zone)) = zones.get_mut(id) else {
            continue;
        };
        let links = zone
            .entry("links".to_owned())
            .or_insert_with(Value::empty_list)
            .ensure_list();
        if !links.is_empty() {
            continue;
        }
        let prev = index.checked_sub(1).unwrap_or(last);
        let next = if index == last { 0 } else { index.saturating_add(1) };
        for neighbour in [prev, next].into_iter().filter_map(|i| ids.get(i)) {
            let target = Value::from(neighbour.as_str());
            if neighbour != id && !links.contains(&target) {
                links.push(target);
            }
        }
        linked = linked.saturating_add(1);
    }
    linked
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(json: serde_json::Value) -> ValueMap {
        match Value::from(json) {
            Value::Map(map) => map,
            _ => ValueMap::new(),
        }
    }

    fn links(zones: &ValueMap, id: &str) -> Vec<String> {
        zones
            .get(id)
            .and_then(|z| z.get("links"))
            .and_then(Value::as_list)
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect()
    }

    #[test]
    fn defaults_fill_shape() {
        let mut zone = map(json!({"id": "dream_gate", "symbolic_density": 0.4}));
        zone_defaults(&mut zone, "fallback");
        assert_eq!(zone.get("name").and_then(Value::as_str), Some("dream_gate"));
        assert_eq!(zone.get("label").and_then(Value::as_str), Some("Dream Gate"));
        assert_eq!(zone.get("type").and_then(Value::as_str), Some("wild"));
        assert_eq!(zone.get("energy").and_then(Value::as_f64), Some(0.4));
        assert_eq!(zone.get("symbolic_density").and_then(Value::as_f64), Some(0.4));
        assert_eq!(zone.get("rules"), Some(&Value::empty_map()));
        assert_eq!(zone.get("version").and_then(Value::as_str), Some(ZONE_VERSION));
    }

    #[test]
    fn defaults_keep_existing_values() {
        let mut zone = map(json!({"name": "vault", "label": "The Vault", "energy": 2, "links": ["a"]}));
        zone_defaults(&mut zone, "fallback");
        assert_eq!(zone.get("label").and_then(Value::as_str), Some("The Vault"));
        assert_eq!(zone.get("symbolic_density").and_then(Value::as_f64), Some(2.0));
        assert_eq!(zone.get("links").and_then(Value::as_list).map(<[Value]>::len), Some(1));
    }

    #[test]
    fn merge_keeps_existing_unless_overwrite() {
        let mut fields = map(json!({"zones": {"a": {"energy": 1}}}));
        let incoming = BTreeMap::from([
            ("a".to_owned(), map(json!({"energy": 9}))),
            ("b".to_owned(), map(json!({"energy": 2}))),
        ]);
        let report = merge_zones(&mut fields, incoming.clone(), false);
        assert_eq!(report.added, vec!["b".to_owned()]);
        assert_eq!(report.skipped, vec!["a".to_owned()]);
        let energy = |fields: &ValueMap| {
            fields
                .get("zones")
                .and_then(|z| z.get("a"))
                .and_then(|a| a.get("energy"))
                .and_then(Value::as_f64)
        };
        assert_eq!(energy(&fields), Some(1.0));

        let report = merge_zones(&mut fields, incoming, true);
        assert_eq!(report.replaced, vec!["a".to_owned(), "b".to_owned()]);
        assert_eq!(energy(&fields), Some(9.0));
    }

    #[test]
    fn ring_links_only_unlinked_zones() {
        let mut zones = map(json!({
            "a": {},
            "b": {"links": ["x"]},
            "c": {"links": []},
            "d": {}
        }));
        assert_eq!(autolink_ring(&mut zones), 3);
        assert_eq!(links(&zones, "a"), vec!["d", "b"]);
        assert_eq!(links(&zones, "b"), vec!["x"]);
        assert_eq!(links(&zones, "c"), vec!["b", "d"]);
        assert_eq!(links(&zones, "d"), vec!["c", "a"]);
    }

    #[test]
    fn two_zones_link_each_other_once() {
        let mut zones = map(json!({"a": {}, "b": {}}));
        autolink_ring(&mut zones);
        assert_eq!(links(&zones, "a"), vec!["b"]);
        assert_eq!(links(&zones, "b"), vec!["a"]);
    }

    #[test]
    fn single_zone_is_not_linked() {
        let mut zones = map(json!({"solo": {}}));
        assert_eq!(autolink_ring(&mut zones), 0);
        assert!(zones.get("solo").and_then(|z| z.get("links")).is_none());
    }

    #[test]
    fn zone_dir_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("dream_gate.json"), r#"{"type": "gate", "energy": 0.5}"#).unwrap();
        fs::write(dir.path().join("named.json"), r#"{"name": "signal_vault"}"#).unwrap();
        fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        fs::write(dir.path().join("list.json"), "[1, 2]").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let zones = load_zone_dir(dir.path()).unwrap();
        let ids: Vec<&str> = zones.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["dream_gate", "signal_vault"]);
        assert_eq!(
            zones.get("dream_gate").and_then(|z| z.get("type")).and_then(Value::as_str),
            Some("gate")
        );
    }

    #[test]
    fn missing_zone_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_zone_dir(&dir.path().join("absent")).unwrap().is_empty());
    }
}
