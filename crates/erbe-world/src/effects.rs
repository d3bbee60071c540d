//! Merging upstream effects into a world record.
//!
//! Upstream producers describe what should change as a map of effects
//! rather than as patch ops. Each top-level key is handled by kind:
//!
//! | Key | Effect |
//! |-----|--------|
//! | `features` | Each entry is added to the feature's value (numeric or `{value}`) |
//! | `zones` | Each zone is merged key by key; `markers`/`markers_added` also bump zone resonance |
//! | `spiritual_noise`, `media_signal`, `world_age`, `symbolic_density` | Replaced |
//! | `resonance` | `global` and `zones.<id>` hints bump the overlay |
//! | `world_effects` | Appended to `agency_log` |
//! | anything else numeric | Added to `symbolic_energy.<key>` |
//!
//! After merging, a compact snapshot of zone energies and features is
//! appended to `symbolic_energy_history`.

use erbe_types::{Value, ValueMap};
use tracing::debug;

use crate::error::WorldError;
use crate::normalize::compact;
use crate::record::{AGENCY_LOG_CAP, ENERGY_HISTORY_CAP, WorldRecord, append_capped, timestamp_now};
use crate::resonance::{DEFAULT_DENSITY_BUMP, DEFAULT_WEIGHT_BUMP, Scope};
use crate::zones::zones_mut;

/// Top-level scalars that effects replace outright.
const REPLACED_SCALARS: [&str; 4] = ["spiritual_noise", "media_signal", "world_age", "symbolic_density"];

/// Merge `effects` into `record`.
///
/// Fails only if a resonance hint carries a non-finite weight or density;
/// effects before the failing key stay applied.
pub fn apply_effects(record: &mut WorldRecord, effects: &ValueMap) -> Result<(), WorldError> {
    for (key, change) in effects {
        match (key.as_str(), change) {
            ("features", Value::Map(features)) => add_features(record.fields_mut(), features),
            ("zones", Value::Map(zones)) => merge_zone_effects(record, zones)?,
            ("resonance", Value::Map(hints)) => apply_resonance_hints(record, hints)?,
            ("world_effects", value) => record_agency(record.fields_mut(), value),
            ("features" | "zones" | "resonance", value) => {
                debug!(key = key.as_str(), kind = %value.kind(), "ignoring malformed effect");
            }
            (scalar, value) if REPLACED_SCALARS.contains(&scalar) => {
                record.set(scalar, value.as_f64().unwrap_or(0.0));
            }
            (other, value) => match value.as_f64() {
                Some(amount) => bump_energy(record.fields_mut(), other, amount),
                None => debug!(key = other, kind = %value.kind(), "ignoring non-numeric effect"),
            },
        }
    }

    let snapshot = energy_snapshot(record.fields());
    append_capped(record.fields_mut(), "symbolic_energy_history", snapshot, ENERGY_HISTORY_CAP);
    record.set("last_update", timestamp_now());
    compact(record.fields_mut());
    Ok(())
}

fn add_features(fields: &mut ValueMap, changes: &ValueMap) {
    let features = fields
        .entry("features".to_owned())
        .or_insert_with(Value::empty_map)
        .ensure_map();
    for (name, amount) in changes {
        let amount = amount.as_f64().unwrap_or(0.0);
        match features.get_mut(name) {
            Some(Value::Map(feature)) if feature.contains_key("value") => {
                let current = feature.get("value").and_then(Value::as_f64).unwrap_or(0.0);
                feature.insert("value".to_owned(), Value::Number(current + amount));
            }
            Some(existing) => {
                let current = existing.as_f64().unwrap_or(0.0);
                *existing = Value::Number(current + amount);
            }
            None => {
                features.insert(name.clone(), Value::Number(amount));
            }
        }
    }
}

fn merge_zone_effects(record: &mut WorldRecord, changes: &ValueMap) -> Result<(), WorldError> {
    for (zone_id, change) in changes {
        let Value::Map(change) = change else {
            zones_mut(record.fields_mut()).insert(zone_id.clone(), change.clone());
            continue;
        };
        let zone = zones_mut(record.fields_mut())
            .entry(zone_id.clone())
            .or_insert_with(Value::empty_map)
            .ensure_map();
        for (field, value) in change {
            zone.insert(field.clone(), value.clone());
        }

        let markers: Vec<String> = ["markers", "markers_added"]
            .iter()
            .filter_map(|key| change.get(*key).and_then(Value::as_list))
            .flatten()
            .map(marker_name)
            .collect();
        if !markers.is_empty() {
            record.resonance_mut().add_weight(
                &Scope::Zone(zone_id.clone()),
                &markers,
                DEFAULT_WEIGHT_BUMP,
                DEFAULT_DENSITY_BUMP,
                None,
            )?;
        }
    }
    Ok(())
}

fn apply_resonance_hints(record: &mut WorldRecord, hints: &ValueMap) -> Result<(), WorldError> {
    if let Some(Value::Map(hint)) = hints.get("global") {
        bump_from_hint(record, &Scope::Global, hint)?;
    }
    if let Some(Value::Map(zones)) = hints.get("zones") {
        for (zone_id, hint) in zones {
            if let Value::Map(hint) = hint {
                bump_from_hint(record, &Scope::Zone(zone_id.clone()), hint)?;
            }
        }
    }
    Ok(())
}

fn bump_from_hint(record: &mut WorldRecord, scope: &Scope, hint: &ValueMap) -> Result<(), WorldError> {
    let markers: Vec<String> = hint
        .get("markers")
        .and_then(Value::as_list)
        .unwrap_or_default()
        .iter()
        .map(marker_name)
        .collect();
    let weight = hint.get("w").and_then(Value::as_f64).unwrap_or(DEFAULT_WEIGHT_BUMP);
    let density = hint.get("d").and_then(Value::as_f64).unwrap_or(DEFAULT_DENSITY_BUMP);
    let provenance = hint.get("provenance").and_then(Value::as_map);
    record
        .resonance_mut()
        .add_weight(scope, &markers, weight, density, provenance)?;
    Ok(())
}

fn marker_name(value: &Value) -> String {
    match value {
        Value::String(name) => name.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn bump_energy(fields: &mut ValueMap, key: &str, amount: f64) {
    let energy = fields
        .entry("symbolic_energy".to_owned())
        .or_insert_with(Value::empty_map)
        .ensure_map();
    let current = energy.get(key).and_then(Value::as_f64).unwrap_or(0.0);
    energy.insert(key.to_owned(), Value::Number(current + amount));
}

fn record_agency(fields: &mut ValueMap, effects: &Value) {
    let empty = match effects {
        Value::Null | Value::Bool(false) => true,
        Value::String(s) => s.is_empty(),
        Value::List(items) => items.is_empty(),
        Value::Map(map) => map.is_empty(),
        Value::Bool(true) | Value::Number(_) => false,
    };
    if empty {
        return;
    }
    let entry = ValueMap::from([
        ("t".to_owned(), Value::from(timestamp_now())),
        ("effects".to_owned(), effects.clone()),
    ]);
    append_capped(fields, "agency_log", Value::Map(entry), AGENCY_LOG_CAP);
}

fn energy_snapshot(fields: &ValueMap) -> Value {
    let zones: ValueMap = fields
        .get("zones")
        .and_then(Value::as_map)
        .into_iter()
        .flatten()
        .filter_map(|(id, zone)| {
            let zone = zone.as_map()?;
            let energy = zone.get("energy").and_then(Value::as_f64).unwrap_or(0.0);
            let entry = ValueMap::from([("energy".to_owned(), Value::Number(energy))]);
            Some((id.clone(), Value::Map(entry)))
        })
        .collect();
    Value::Map(ValueMap::from([
        ("timestamp".to_owned(), Value::from(timestamp_now())),
        ("zones".to_owned(), Value::Map(zones)),
        (
            "features".to_owned(),
            fields.get("features").cloned().unwrap_or_else(Value::empty_map),
        ),
    ]))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::record::default_record;
    use serde_json::json;

    fn effects(json: serde_json::Value) -> ValueMap {
        match Value::from(json) {
            Value::Map(map) => map,
            _ => ValueMap::new(),
        }
    }

    fn num(record: &WorldRecord, path: &str) -> Option<f64> {
        record.to_document().pointer(&path.parse().unwrap()).and_then(Value::as_f64)
    }

    #[test]
    fn features_are_additive() {
        let mut record = default_record();
        record
            .fields_mut()
            .insert("features".to_owned(), Value::from(json!({"individualism": 0.5, "lore": {"value": 1.0}})));
        apply_effects(&mut record, &effects(json!({"features": {"individualism": 0.25, "lore": 2, "new": 1}}))).unwrap();
        assert_eq!(num(&record, "/features/individualism"), Some(0.75));
        assert_eq!(num(&record, "/features/lore/value"), Some(3.0));
        assert_eq!(num(&record, "/features/new"), Some(1.0));
    }

    #[test]
    fn zones_merge_and_feed_resonance() {
        let mut record = default_record();
        apply_effects(
            &mut record,
            &effects(json!({"zones": {"gate": {"energy": 0.7, "markers": ["omen", 3]}}})),
        )
        .unwrap();
        assert_eq!(num(&record, "/zones/gate/energy"), Some(0.7));
        let bucket = record.resonance().zone("gate").unwrap();
        assert_eq!(bucket.weight("omen"), Some(DEFAULT_WEIGHT_BUMP));
        assert_eq!(bucket.weight("3"), Some(DEFAULT_WEIGHT_BUMP));
    }

    #[test]
    fn scalars_replace_and_unknown_numbers_bump_energy() {
        let mut record = default_record();
        apply_effects(
            &mut record,
            &effects(json!({"spiritual_noise": 0.3, "dream_pressure": 0.5, "label": "x"})),
        )
        .unwrap();
        apply_effects(&mut record, &effects(json!({"dream_pressure": 0.25}))).unwrap();
        assert_eq!(record.number("spiritual_noise"), Some(0.3));
        assert_eq!(num(&record, "/symbolic_energy/dream_pressure"), Some(0.75));
        assert!(record.get("label").is_none());
    }

    #[test]
    fn resonance_hints_use_weights() {
        let mut record = default_record();
        apply_effects(
            &mut record,
            &effects(json!({"resonance": {
                "global": {"markers": ["broadcast_signal"], "w": 0.7},
                "zones": {"gate": {"markers": ["omen"], "d": 0.1}}
            }})),
        )
        .unwrap();
        assert_eq!(record.resonance().global().weight("broadcast_signal"), Some(0.7));
        assert!((record.resonance().zone("gate").unwrap().density() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn world_effects_go_to_agency_log() {
        let mut record = default_record();
        apply_effects(&mut record, &effects(json!({"world_effects": [{"kind": "rift"}]}))).unwrap();
        apply_effects(&mut record, &effects(json!({"world_effects": []}))).unwrap();
        let log = record.get("agency_log").and_then(Value::as_list).unwrap();
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn snapshot_is_appended() {
        let mut record = default_record();
        apply_effects(&mut record, &effects(json!({"zones": {"gate": {"energy": 1.5}}}))).unwrap();
        let history = record.get("symbolic_energy_history").and_then(Value::as_list).unwrap();
        assert_eq!(history.len(), 1);
        let snapshot = history.first().unwrap();
        assert_eq!(
            snapshot.get("zones").and_then(|z| z.get("gate")).and_then(|g| g.get("energy")).and_then(Value::as_f64),
            Some(1.5)
        );
    }
}
