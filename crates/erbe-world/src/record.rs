//! The world record and its default field set.
//!
//! A [`WorldRecord`] keeps the record fields as a [`ValueMap`] so the root is
//! a map by construction, and keeps the resonance overlay in typed form. The
//! overlay is folded back into the document under [`RESONANCE_KEY`] whenever
//! the record is written out or handed to code that works on raw documents.

use erbe_types::{Value, ValueMap};
use serde_json::json;
use tracing::warn;

use crate::error::WorldError;
use crate::migration::CURRENT_SCHEMA_VERSION;
use crate::resonance::ResonanceOverlay;

/// Document key holding the persisted resonance overlay.
pub const RESONANCE_KEY: &str = "resonance";
/// Document key holding the schema version string.
pub const SCHEMA_VERSION_KEY: &str = "_schema_version";
/// Document key of the in-record audit log.
pub const WORLD_EVENTS_KEY: &str = "world_events";

/// Cap for `events`.
pub const EVENTS_CAP: usize = 400;
/// Cap for `world_events`.
pub const WORLD_EVENTS_CAP: usize = 800;
/// Cap for `quest_events`.
pub const QUEST_EVENTS_CAP: usize = 400;
/// Cap for `density_log`.
pub const DENSITY_LOG_CAP: usize = 300;
/// Cap for `symbolic_energy_history`.
pub const ENERGY_HISTORY_CAP: usize = 300;
/// Cap for `agency_log`.
pub const AGENCY_LOG_CAP: usize = 300;
/// Default `metrics.max_history`.
pub const DEFAULT_MAX_HISTORY: usize = 800;

/// Current UTC time as an RFC 3339 string.
pub fn timestamp_now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// The canonical default fields of a fresh world, without the overlay.
pub fn default_fields() -> ValueMap {
    let fields = json!({
        "session_seed": rand::random::<u32>(),
        "time": 0,
        "zones": {},
        "symbolic_density": 0.0,
        "symbolic_flux": {"rising": [], "falling": []},
        "symbolic_energy": {},
        "features": {"individualism": 0.0},
        "events": [],
        "world_events": [],
        "quest_events": [],
        "symbolic_energy_history": [],
        "world_age": 0,
        "spiritual_noise": 0.0,
        "media_signal": 0.0,
        "density_log": [],
        "active_markers": {},
        "clusters": {},
        "weather": {"dominant": "clear", "avg_intensity": 0.0, "fronts": []},
        "economy": {"zones": {}, "global_index": 0.0, "history": []},
        "factions": {},
        "faction_presence": {},
        "faction_affinity": {},
        "memory": {"events": [], "max_len": 200},
        "metrics": {
            "symbolic_density_history": [],
            "agi_index_history": [],
            "tick_index": 0,
            "max_history": DEFAULT_MAX_HISTORY,
        },
        "last_update": timestamp_now(),
        "_schema_version": CURRENT_SCHEMA_VERSION,
    });
    match Value::from(fields) {
        Value::Map(map) => map,
        _ => ValueMap::new(),
    }
}

/// A fresh world record with default fields and an empty overlay.
pub fn default_record() -> WorldRecord {
    WorldRecord::from_fields(default_fields())
}

/// Append `entry` to the list under `key`, keeping at most `cap` items.
///
/// A missing or non-list field is replaced by a new list.
pub fn append_capped(fields: &mut ValueMap, key: &str, entry: Value, cap: usize) {
    let list = fields.entry(key.to_owned()).or_insert_with(Value::empty_list).ensure_list();
    list.push(entry);
    trim_front(list, cap);
}

/// Drop the oldest items so that at most `cap` remain.
pub fn trim_front(list: &mut Vec<Value>, cap: usize) {
    let excess = list.len().saturating_sub(cap);
    if excess > 0 {
        list.drain(..excess);
    }
}

/// Append a timestamped entry to the `world_events` audit log.
///
/// `event` names what happened; `details` are merged into the entry.
pub fn append_world_event(fields: &mut ValueMap, event: &str, details: ValueMap) {
    let mut entry = details;
    entry.insert("timestamp".to_owned(), Value::from(timestamp_now()));
    entry.insert("event".to_owned(), Value::from(event));
    append_capped(fields, WORLD_EVENTS_KEY, Value::Map(entry), WORLD_EVENTS_CAP);
}

/// One world's state: record fields plus the typed resonance overlay.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorldRecord {
    fields: ValueMap,
    resonance: ResonanceOverlay,
}

impl WorldRecord {
    /// Build a record from document fields, lifting the overlay out of
    /// [`RESONANCE_KEY`].
    ///
    /// An unreadable overlay is logged and replaced by an empty one.
    pub fn from_fields(mut fields: ValueMap) -> Self {
        let resonance = fields
            .remove(RESONANCE_KEY)
            .map(|value| decode_overlay(&value))
            .unwrap_or_default();
        Self { fields, resonance }
    }

    /// Build a record from a document root.
    pub fn from_document(document: Value) -> Result<Self, WorldError> {
        match document {
            Value::Map(fields) => Ok(Self::from_fields(fields)),
            other => Err(WorldError::NotAMap { found: other.kind() }),
        }
    }

    /// The full document, with the overlay folded in.
    pub fn to_document(&self) -> Value {
        let mut fields = self.fields.clone();
        fields.insert(RESONANCE_KEY.to_owned(), self.resonance.to_value());
        Value::Map(fields)
    }

    /// Consume the record into its full document.
    pub fn into_document(self) -> Value {
        let mut fields = self.fields;
        fields.insert(RESONANCE_KEY.to_owned(), self.resonance.to_value());
        Value::Map(fields)
    }

    /// Record fields, excluding the overlay.
    pub const fn fields(&self) -> &ValueMap {
        &self.fields
    }

    /// Mutable record fields, excluding the overlay.
    pub const fn fields_mut(&mut self) -> &mut ValueMap {
        &mut self.fields
    }

    /// The resonance overlay.
    pub const fn resonance(&self) -> &ResonanceOverlay {
        &self.resonance
    }

    /// The resonance overlay, mutably.
    pub const fn resonance_mut(&mut self) -> &mut ResonanceOverlay {
        &mut self.resonance
    }

    /// A top-level field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// A top-level field read as a number.
    pub fn number(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(Value::as_f64)
    }

    /// Set a top-level field, returning the previous value.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.to_owned(), value.into())
    }

    /// Run `f` against the full document, then re-split it.
    ///
    /// Changes `f` makes under [`RESONANCE_KEY`] are lifted back into the
    /// overlay; removing the key resets the overlay. If `f` leaves a
    /// non-map root, the record is reset to empty fields.
    pub fn with_document<R>(&mut self, f: impl FnOnce(&mut Value) -> R) -> R {
        let mut fields = std::mem::take(&mut self.fields);
        fields.insert(RESONANCE_KEY.to_owned(), self.resonance.to_value());
        let mut document = Value::Map(fields);
        let out = f(&mut document);

        let limits = self.resonance.limits();
        let mut fields = match document {
            Value::Map(fields) => fields,
            other => {
                warn!(found = %other.kind(), "record root replaced by a non-map; resetting fields");
                ValueMap::new()
            }
        };
        self.resonance = fields
            .remove(RESONANCE_KEY)
            .map(|value| decode_overlay(&value))
            .unwrap_or_default();
        self.resonance.set_limits(limits);
        self.fields = fields;
        out
    }
}

fn decode_overlay(value: &Value) -> ResonanceOverlay {
    ResonanceOverlay::from_value(value).unwrap_or_else(|error| {
        warn!(error = %error, "discarding unreadable resonance overlay");
        ResonanceOverlay::default()
    })
}
