//! Ordered schema-version migration.
//!
//! A record carries its schema version under `_schema_version`. The
//! [`MigrationRegistry`] holds one step per version and advances a record
//! through every registered version above its own, in ascending order, up to
//! a target. A failing step stops migration at the last version that
//! succeeded; the failure is noted and appended to the audit log rather than
//! returned.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use erbe_types::{Value, ValueMap};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::MigrationError;
use crate::record::{SCHEMA_VERSION_KEY, append_world_event};

/// Schema version written by this build.
pub const CURRENT_SCHEMA_VERSION: &str = "1.0.0";

/// A `major.minor.patch` schema version, ordered numerically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaVersion {
    /// Major component.
    pub major: u32,
    /// Minor component.
    pub minor: u32,
    /// Patch component.
    pub patch: u32,
}

impl SchemaVersion {
    /// `0.0.0`, the version of a record that carries none.
    pub const ZERO: Self = Self::new(0, 0, 0);

    /// Build a version from its components.
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// Parse `text`, treating anything malformed as `0.0.0`.
    pub fn parse_lenient(text: &str) -> Self {
        text.parse().unwrap_or(Self::ZERO)
    }

    /// The version stored in `fields`, or `0.0.0`.
    ///
    /// A numeric version is read through its string form, so `1` is `1.0.0`
    /// only if written as `"1.0.0"`; a bare number is treated as malformed.
    pub fn of_fields(fields: &ValueMap) -> Self {
        fields
            .get(SCHEMA_VERSION_KEY)
            .and_then(Value::as_str)
            .map_or(Self::ZERO, Self::parse_lenient)
    }

    /// The version this build writes.
    pub fn current() -> Self {
        Self::parse_lenient(CURRENT_SCHEMA_VERSION)
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// A schema version string was not `major.minor.patch`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid schema version {0:?}")]
pub struct ParseVersionError(String);

impl FromStr for SchemaVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseVersionError(s.to_owned());
        let mut parts = s.trim().split('.').map(str::parse::<u32>);
        let mut next = || parts.next().ok_or_else(invalid)?.map_err(|_| invalid());
        let version = Self::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

impl TryFrom<String> for SchemaVersion {
    type Error = ParseVersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SchemaVersion> for String {
    fn from(version: SchemaVersion) -> Self {
        version.to_string()
    }
}

/// A migration step. Returns a note describing what it changed.
pub type MigrationStep = Box<dyn Fn(&mut ValueMap) -> Result<String, MigrationError> + Send + Sync>;

/// Outcome of [`MigrationRegistry::migrate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    /// Version the record carried before migration.
    pub from: SchemaVersion,
    /// Version the record carries now.
    pub reached: SchemaVersion,
    /// Human-readable notes, one per step plus a closing summary.
    pub notes: Vec<String>,
    /// Version whose step failed, if any.
    pub failed: Option<SchemaVersion>,
}

impl MigrationReport {
    /// Whether any step ran.
    pub fn changed(&self) -> bool {
        self.reached != self.from
    }
}

/// Registered migration steps, keyed by the version they upgrade to.
pub struct MigrationRegistry {
    steps: BTreeMap<SchemaVersion, MigrationStep>,
}

impl fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationRegistry")
            .field("versions", &self.steps.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for MigrationRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl MigrationRegistry {
    /// An empty registry.
    pub const fn new() -> Self {
        Self {
            steps: BTreeMap::new(),
        }
    }

    /// A registry holding the steps shipped with this build.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            SchemaVersion::new(1, 0, 0),
            Box::new(|fields: &mut ValueMap| Ok(ensure_presence_and_rules(fields))),
        );
        registry
    }

    /// Register `step` as the upgrade to `version`, replacing any existing
    /// step for that version.
    pub fn register(&mut self, version: SchemaVersion, step: MigrationStep) {
        self.steps.insert(version, step);
    }

    /// The highest registered version.
    pub fn latest(&self) -> Option<SchemaVersion> {
        self.steps.keys().next_back().copied()
    }

    /// Advance `fields` towards `target`.
    ///
    /// Every step above the record's version and at or below `target` runs
    /// in ascending order; `_schema_version` is bumped after each success.
    pub fn migrate(&self, fields: &mut ValueMap, target: SchemaVersion) -> MigrationReport {
        let from = SchemaVersion::of_fields(fields);
        let mut current = from;
        let mut notes = Vec::new();
        let mut failed = None;

        if current == target {
            notes.push(format!("World already at target version {target}"));
            return MigrationReport {
                from,
                reached: current,
                notes,
                failed,
            };
        }

        for (version, step) in self.steps.range(..=target) {
            if *version <= current {
                continue;
            }
            match step(fields) {
                Ok(message) => {
                    if !message.is_empty() {
                        notes.push(format!("[{version}] {message}"));
                    }
                    fields.insert(SCHEMA_VERSION_KEY.to_owned(), Value::from(version.to_string()));
                    current = *version;
                }
                Err(error) => {
                    warn!(version = %version, error = %error, "schema migration step failed");
                    notes.push(format!("[{version}] Migration failed: {error}"));
                    append_world_event(
                        fields,
                        "migration_failed",
                        ValueMap::from([
                            ("version".to_owned(), Value::from(version.to_string())),
                            ("error".to_owned(), Value::from(error.to_string())),
                        ]),
                    );
                    failed = Some(*version);
                    break;
                }
            }
        }

        if current == target {
            notes.push(format!("Migration complete to {target}"));
            info!(from = %from, to = %target, "migrated world schema");
        } else {
            notes.push(format!("Reached version {current}, not target {target}"));
        }
        MigrationReport {
            from,
            reached: current,
            notes,
            failed,
        }
    }
}

fn ensure_presence_and_rules(fields: &mut ValueMap) -> String {
    fields
        .entry("faction_presence".to_owned())
        .or_insert_with(Value::empty_map);
    if let Some(Value::Map(zones)) = fields.get_mut("zones") {
        for zone in zones.values_mut() {
            if let Value::Map(zone) = zone {
                zone.entry("rules".to_owned()).or_insert_with(Value::empty_map);
            }
        }
    }
    "Initialized faction_presence and ensured zone.rules.".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::record::WORLD_EVENTS_KEY;
    use serde_json::json;

    fn fields(json: serde_json::Value) -> ValueMap {
        match Value::from(json) {
            Value::Map(map) => map,
            _ => ValueMap::new(),
        }
    }

    fn v(text: &str) -> SchemaVersion {
        text.parse().unwrap()
    }

    #[test]
    fn versions_order_numerically() {
        assert!(v("0.10.0") > v("0.9.3"));
        assert!(v("1.0.0") > v("0.99.99"));
        assert_eq!(v(" 2.1.0 ").to_string(), "2.1.0");
    }

    #[test]
    fn malformed_versions_are_zero() {
        assert!("1.0".parse::<SchemaVersion>().is_err());
        assert!("1.0.0.1".parse::<SchemaVersion>().is_err());
        assert_eq!(SchemaVersion::parse_lenient("banana"), SchemaVersion::ZERO);
    }

    #[test]
    fn builtin_step_upgrades_unversioned_world() {
        let mut world = fields(json!({"zones": {"gate": {}, "vault": {"rules": {"x": 1}}}}));
        let report = MigrationRegistry::with_builtin().migrate(&mut world, SchemaVersion::current());
        assert_eq!(report.from, SchemaVersion::ZERO);
        assert_eq!(report.reached, SchemaVersion::current());
        assert!(report.failed.is_none());
        assert_eq!(report.notes.last().map(String::as_str), Some("Migration complete to 1.0.0"));
        assert!(world.contains_key("faction_presence"));
        let zones = world.get("zones").unwrap();
        assert_eq!(zones.get("gate").and_then(|z| z.get("rules")), Some(&Value::empty_map()));
        assert!(zones.get("vault").and_then(|z| z.get("rules")).and_then(|r| r.get("x")).is_some());
        assert_eq!(world.get(SCHEMA_VERSION_KEY).and_then(Value::as_str), Some("1.0.0"));
    }

    #[test]
    fn current_world_is_left_alone() {
        let mut world = fields(json!({"_schema_version": "1.0.0"}));
        let report = MigrationRegistry::with_builtin().migrate(&mut world, v("1.0.0"));
        assert!(!report.changed());
        assert_eq!(report.notes, vec!["World already at target version 1.0.0".to_owned()]);
        assert!(!world.contains_key("faction_presence"));
    }

    #[test]
    fn steps_run_in_ascending_order() {
        let mut registry = MigrationRegistry::new();
        for version in ["2.0.0", "1.0.0", "1.5.0", "3.0.0"] {
            let tag = version.to_owned();
            registry.register(
                v(version),
                Box::new(move |fields: &mut ValueMap| {
                    crate::record::append_capped(fields, "order", Value::from(tag.as_str()), 10);
                    Ok(String::new())
                }),
            );
        }
        let mut world = fields(json!({"_schema_version": "1.0.0"}));
        let report = registry.migrate(&mut world, v("2.0.0"));
        let order: Vec<&str> = world
            .get("order")
            .and_then(Value::as_list)
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(order, vec!["1.5.0", "2.0.0"]);
        assert_eq!(report.reached, v("2.0.0"));
        assert_eq!(registry.latest(), Some(v("3.0.0")));
    }

    #[test]
    fn failing_step_stops_at_last_success() {
        let mut registry = MigrationRegistry::with_builtin();
        registry.register(
            v("1.1.0"),
            Box::new(|_: &mut ValueMap| {
                Err(MigrationError::Step {
                    version: SchemaVersion::new(1, 1, 0),
                    message: "zones unreadable".to_owned(),
                })
            }),
        );
        let mut world = ValueMap::new();
        let report = registry.migrate(&mut world, v("1.1.0"));
        assert_eq!(report.reached, v("1.0.0"));
        assert_eq!(report.failed, Some(v("1.1.0")));
        assert_eq!(
            report.notes.last().map(String::as_str),
            Some("Reached version 1.0.0, not target 1.1.0")
        );
        assert!(report.notes.iter().any(|n| n.starts_with("[1.1.0] Migration failed")));
        let events = world.get(WORLD_EVENTS_KEY).and_then(Value::as_list).unwrap();
        assert_eq!(events.len(), 1);
    }
}
