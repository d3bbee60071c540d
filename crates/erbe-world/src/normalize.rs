//! Load-time shape repair and size control for record fields.
//!
//! Three passes run on the raw fields of a loaded document, in this order:
//!
//! 1. [`normalize_legacy`] rewrites older shapes into the current one
//!    (zones as a list, weather as a string, features as a scalar).
//! 2. [`hydrate`] fills required fields that are missing. Present values are
//!    never overwritten.
//! 3. [`compact`] trims every growing log to its cap, oldest entries first.
//!
//! [`compact`] also runs at the end of every tick.

use erbe_types::{Value, ValueMap};
use tracing::debug;

use crate::record::{
    AGENCY_LOG_CAP, DEFAULT_MAX_HISTORY, DENSITY_LOG_CAP, ENERGY_HISTORY_CAP, EVENTS_CAP, QUEST_EVENTS_CAP,
    SCHEMA_VERSION_KEY, WORLD_EVENTS_CAP, default_fields, trim_front,
};

/// Nested maps whose sub-fields are hydrated individually.
const NESTED_DEFAULTS: [&str; 2] = ["memory", "metrics"];

/// Rewrite legacy field shapes in place.
///
/// - `zones` as a list becomes a map keyed by each entry's `name`
///   (`zone_<i>` when unnamed); non-map entries are dropped.
/// - `weather` as a string becomes `{dominant, avg_intensity, fronts}`.
/// - `features` that is not a map becomes a map, carrying over a numeric
///   top-level `individualism`.
///
/// Returns the names of the fields that were rewritten.
pub fn normalize_legacy(fields: &mut ValueMap) -> Vec<String> {
    let mut changed = Vec::new();

    match fields.get_mut("zones") {
        Some(Value::Map(_)) => {}
        Some(Value::List(entries)) => {
            let zones = zones_from_list(std::mem::take(entries));
            fields.insert("zones".to_owned(), Value::Map(zones));
            changed.push("zones".to_owned());
        }
        Some(other) => {
            *other = Value::empty_map();
            changed.push("zones".to_owned());
        }
        None => {}
    }

    match fields.get_mut("weather") {
        Some(Value::Map(_)) | None => {}
        Some(other) => {
            let dominant = other.as_str().unwrap_or("clear").to_owned();
            *other = weather_summary(&dominant);
            changed.push("weather".to_owned());
        }
    }

    let individualism = fields.get("individualism").and_then(Value::as_f64);
    let features_ok = fields.get("features").is_some_and(Value::is_map);
    if !features_ok && (fields.contains_key("features") || individualism.is_some()) {
        fields.insert("features".to_owned(), Value::empty_map());
        changed.push("features".to_owned());
    }
    if let (Some(value), Some(Value::Map(features))) = (individualism, fields.get_mut("features"))
        && !features.contains_key("individualism")
    {
        features.insert("individualism".to_owned(), Value::Number(value));
        changed.push("features.individualism".to_owned());
    }

    if !changed.is_empty() {
        debug!(fields = ?changed, "normalized legacy shapes");
    }
    changed
}

fn zones_from_list(entries: Vec<Value>) -> ValueMap {
    let mut zones = ValueMap::new();
    for (index, entry) in entries.into_iter().enumerate() {
        let Value::Map(mut zone) = entry else {
            continue;
        };
        let name = zone
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map_or_else(|| format!("zone_{index}"), str::to_owned);
        zone.insert("name".to_owned(), Value::from(name.as_str()));
        zones.insert(name, Value::Map(zone));
    }
    zones
}

fn weather_summary(dominant: &str) -> Value {
    Value::Map(ValueMap::from([
        ("dominant".to_owned(), Value::from(dominant)),
        ("avg_intensity".to_owned(), Value::Number(0.0)),
        ("fronts".to_owned(), Value::empty_list()),
    ]))
}

/// Fill missing required fields from the default field set.
///
/// `memory` and `metrics` are filled per sub-field when present as maps.
/// A missing `_schema_version` is left for migration to set.
/// Returns the dotted names of every field that was filled.
pub fn hydrate(fields: &mut ValueMap) -> Vec<String> {
    let mut filled = Vec::new();
    for (key, default) in default_fields() {
        if key == SCHEMA_VERSION_KEY {
            continue;
        }
        match fields.get_mut(&key) {
            None => {
                fields.insert(key.clone(), default);
                filled.push(key);
            }
            Some(Value::Map(present)) if NESTED_DEFAULTS.contains(&key.as_str()) => {
                let Value::Map(defaults) = default else {
                    continue;
                };
                for (sub_key, sub_default) in defaults {
                    if !present.contains_key(&sub_key) {
                        filled.push(format!("{key}.{sub_key}"));
                        present.insert(sub_key, sub_default);
                    }
                }
            }
            Some(_) => {}
        }
    }
    if !filled.is_empty() {
        debug!(fields = ?filled, "hydrated missing fields");
    }
    filled
}

/// Trim every capped list to its limit, keeping the newest entries.
pub fn compact(fields: &mut ValueMap) {
    for (key, cap) in [
        ("events", EVENTS_CAP),
        ("world_events", WORLD_EVENTS_CAP),
        ("quest_events", QUEST_EVENTS_CAP),
        ("density_log", DENSITY_LOG_CAP),
        ("symbolic_energy_history", ENERGY_HISTORY_CAP),
        ("agency_log", AGENCY_LOG_CAP),
    ] {
        if let Some(Value::List(list)) = fields.get_mut(key) {
            trim_front(list, cap);
        }
    }

    if let Some(Value::Map(metrics)) = fields.get_mut("metrics") {
        let max_history = metrics
            .get("max_history")
            .and_then(Value::as_usize)
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_HISTORY);
        for key in ["symbolic_density_history", "agi_index_history"] {
            if let Some(Value::List(list)) = metrics.get_mut(key) {
                trim_front(list, max_history);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(json: serde_json::Value) -> ValueMap {
        match Value::from(json) {
            Value::Map(map) => map,
            _ => ValueMap::new(),
        }
    }

    #[test]
    fn zones_list_becomes_map() {
        let mut record = fields(json!({
            "zones": [{"name": "gate", "energy": 1}, {"energy": 2}, "junk"]
        }));
        let changed = normalize_legacy(&mut record);
        assert_eq!(changed, vec!["zones".to_owned()]);
        let zones = record.get("zones").and_then(Value::as_map).unwrap();
        let keys: Vec<&str> = zones.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["gate", "zone_1"]);
        assert_eq!(
            zones.get("zone_1").and_then(|z| z.get("name")).and_then(Value::as_str),
            Some("zone_1")
        );
    }

    #[test]
    fn weather_string_becomes_summary() {
        let mut record = fields(json!({"weather": "storm"}));
        normalize_legacy(&mut record);
        assert_eq!(
            record.get("weather").cloned(),
            Some(Value::from(json!({"dominant": "storm", "avg_intensity": 0.0, "fronts": []})))
        );
    }

    #[test]
    fn scalar_features_carry_individualism() {
        let mut record = fields(json!({"features": 3, "individualism": 0.4}));
        let changed = normalize_legacy(&mut record);
        assert!(changed.contains(&"features".to_owned()));
        assert_eq!(
            record.get("features").cloned(),
            Some(Value::from(json!({"individualism": 0.4})))
        );
    }

    #[test]
    fn current_shapes_are_untouched() {
        let mut record = fields(json!({
            "zones": {"a": {}},
            "weather": {"dominant": "rain"},
            "features": {"individualism": 0.1}
        }));
        let before = record.clone();
        assert!(normalize_legacy(&mut record).is_empty());
        assert_eq!(record, before);
    }

    #[test]
    fn hydrate_fills_without_overwriting() {
        let mut record = fields(json!({
            "world_age": 42,
            "metrics": {"tick_index": 7},
            "last_update": "2024-01-01T00:00:00+00:00"
        }));
        let filled = hydrate(&mut record);
        assert!(filled.contains(&"zones".to_owned()));
        assert!(filled.contains(&"metrics.max_history".to_owned()));
        assert!(!filled.contains(&"world_age".to_owned()));
        assert!(!filled.contains(&"last_update".to_owned()));
        assert!(!record.contains_key(SCHEMA_VERSION_KEY));
        assert_eq!(record.get("world_age").and_then(Value::as_f64), Some(42.0));
        assert_eq!(
            record.get("metrics").and_then(|m| m.get("tick_index")).and_then(Value::as_f64),
            Some(7.0)
        );
        assert!(hydrate(&mut record).is_empty());
    }

    #[test]
    fn compact_trims_oldest() {
        let long: Vec<u32> = (0..1000).collect();
        let mut record = fields(json!({
            "events": long,
            "density_log": long,
            "metrics": {"max_history": 10, "symbolic_density_history": long}
        }));
        compact(&mut record);
        let events = record.get("events").and_then(Value::as_list).unwrap();
        assert_eq!(events.len(), EVENTS_CAP);
        assert_eq!(events.first().and_then(Value::as_f64), Some(600.0));
        assert_eq!(record.get("density_log").and_then(Value::as_list).unwrap().len(), DENSITY_LOG_CAP);
        let history = record
            .get("metrics")
            .and_then(|m| m.get("symbolic_density_history"))
            .and_then(Value::as_list)
            .unwrap();
        assert_eq!(history.len(), 10);
    }
}
