//! The world store: locked, atomic, self-healing persistence of one record.
//!
//! All access goes through a [`StoreSession`], which holds the store's
//! lock for as long as it lives. [`WorldStore::save`] and
//! [`WorldStore::load`] open a session for a single call; the tick keeps one
//! open from its load to its final save so no other writer can interleave.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use erbe_types::{PatchOp, Value};
use erbe_world::record::timestamp_now;
use erbe_world::{
    MigrationRegistry, MigrationReport, OverlayLimits, SchemaVersion, WorldRecord, default_fields, hydrate,
    normalize_legacy,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::layout::StoreLayout;
use crate::salvage::{Parsed, parse_document};

/// Default data directory.
const DEFAULT_DATA_DIR: &str = "world_state";

/// Default world name.
const DEFAULT_WORLD_NAME: &str = "erbe_world";

/// Default number of retries after a failed write.
const DEFAULT_WRITE_RETRIES: u32 = 2;

/// Default pause between write attempts in milliseconds.
const DEFAULT_RETRY_DELAY_MS: u64 = 10;

/// Configuration for a [`WorldStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the world's files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Base name of the world's files.
    #[serde(default = "default_world_name")]
    pub world_name: String,
    /// Retries after a failed write before giving up.
    #[serde(default = "default_write_retries")]
    pub write_retries: u32,
    /// Pause between write attempts in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Refresh `<name>_backup.json` on every save.
    #[serde(default = "default_true")]
    pub backup_on_save: bool,
    /// Write a timestamped archive on every save.
    #[serde(default = "default_true")]
    pub archive_on_save: bool,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

fn default_world_name() -> String {
    DEFAULT_WORLD_NAME.to_owned()
}

const fn default_write_retries() -> u32 {
    DEFAULT_WRITE_RETRIES
}

const fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

const fn default_true() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            world_name: default_world_name(),
            write_retries: DEFAULT_WRITE_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            backup_on_save: true,
            archive_on_save: true,
        }
    }
}

impl StoreConfig {
    /// Configuration for world `name` in `data_dir`, other settings default.
    pub fn new(data_dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            world_name: name.into(),
            ..Self::default()
        }
    }

    /// Set the retry count and delay.
    #[must_use]
    pub const fn with_retries(mut self, retries: u32, delay_ms: u64) -> Self {
        self.write_retries = retries;
        self.retry_delay_ms = delay_ms;
        self
    }

    /// Turn backup and archive copies on or off.
    #[must_use]
    pub const fn with_copies(mut self, backup: bool, archive: bool) -> Self {
        self.backup_on_save = backup;
        self.archive_on_save = archive;
        self
    }
}

/// Where a loaded record came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadSource {
    /// No document existed; a default record was created.
    Created,
    /// The document parsed cleanly.
    Parsed,
    /// The document was damaged but began with a usable object.
    Salvaged,
    /// The document was unusable and replaced by a default record.
    Recovered {
        /// Where the damaged document was moved. `None` if it could not be
        /// moved, in which case the default was not persisted over it.
        corrupt_path: Option<PathBuf>,
    },
    /// The document could not be read and was replaced by a default record.
    Unreadable {
        /// Where the unreadable document was moved, if it could be.
        corrupt_path: Option<PathBuf>,
    },
}

impl LoadSource {
    /// Whether the record is a substituted default.
    pub const fn is_default(&self) -> bool {
        matches!(self, Self::Created | Self::Recovered { .. } | Self::Unreadable { .. })
    }
}

/// What [`StoreSession::load_detailed`] did to produce a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    /// Where the record came from.
    pub source: LoadSource,
    /// Fields rewritten from legacy shapes.
    pub normalized_fields: Vec<String>,
    /// Required fields that were missing and filled with defaults.
    pub hydrated_fields: Vec<String>,
    /// Schema migration outcome.
    pub migration: MigrationReport,
}

/// Durable storage for one world record.
pub struct WorldStore {
    config: StoreConfig,
    layout: StoreLayout,
    migrations: MigrationRegistry,
    target_version: SchemaVersion,
    limits: OverlayLimits,
    cache: Mutex<Option<WorldRecord>>,
}

impl std::fmt::Debug for WorldStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldStore")
            .field("layout", &self.layout)
            .field("target_version", &self.target_version)
            .finish_non_exhaustive()
    }
}

impl WorldStore {
    /// A store using the built-in migrations and default overlay limits.
    pub fn new(config: StoreConfig) -> Self {
        let layout = StoreLayout::new(config.data_dir.clone(), config.world_name.clone());
        Self {
            config,
            layout,
            migrations: MigrationRegistry::with_builtin(),
            target_version: SchemaVersion::current(),
            limits: OverlayLimits::default(),
            cache: Mutex::new(None),
        }
    }

    /// Replace the migration registry and the version loads migrate to.
    #[must_use]
    pub fn with_migrations(mut self, registry: MigrationRegistry, target: SchemaVersion) -> Self {
        self.migrations = registry;
        self.target_version = target;
        self
    }

    /// Overlay limits applied to every loaded record.
    #[must_use]
    pub const fn with_overlay_limits(mut self, limits: OverlayLimits) -> Self {
        self.limits = limits;
        self
    }

    /// The store's configuration.
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The store's file layout.
    pub const fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Take the store lock. Blocks while another session is open.
    ///
    /// A lock poisoned by a panicking holder is recovered.
    pub fn session(&self) -> StoreSession<'_> {
        let cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("world store lock was poisoned; recovering");
                self.cache.clear_poison();
                poisoned.into_inner()
            }
        };
        StoreSession { store: self, cache }
    }

    /// Load the record. See [`StoreSession::load`].
    pub fn load(&self) -> WorldRecord {
        self.session().load()
    }

    /// Load the record with a report. See [`StoreSession::load_detailed`].
    pub fn load_detailed(&self) -> (WorldRecord, LoadReport) {
        self.session().load_detailed()
    }

    /// Save the record. See [`StoreSession::save`].
    pub fn save(&self, record: &WorldRecord) -> Result<(), StoreError> {
        self.session().save(record)
    }

    /// A copy of the last record loaded or saved.
    pub fn cached(&self) -> Option<WorldRecord> {
        self.session().cached()
    }

    fn write_with_retries(&self, target: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let attempts = self.config.write_retries.saturating_add(1);
        let delay = Duration::from_millis(self.config.retry_delay_ms);
        let mut attempt = 0_u32;
        loop {
            attempt = attempt.saturating_add(1);
            match write_atomic(target, bytes) {
                Ok(()) => return Ok(()),
                Err(source) if attempt >= attempts => {
                    return Err(StoreError::WriteExhausted {
                        path: target.to_path_buf(),
                        attempts,
                        source,
                    });
                }
                Err(error) => {
                    warn!(
                        path = %target.display(),
                        attempt,
                        error = %error,
                        "write failed; retrying"
                    );
                    thread::sleep(delay);
                }
            }
        }
    }
}

/// On-disk shape of the delta document.
#[derive(Serialize)]
struct DeltaDocument<'a> {
    saved_at: String,
    ops: &'a [PatchOp],
}

/// Exclusive access to a [`WorldStore`], held until dropped.
pub struct StoreSession<'a> {
    store: &'a WorldStore,
    cache: MutexGuard<'a, Option<WorldRecord>>,
}

impl StoreSession<'_> {
    /// Load the record, never failing.
    pub fn load(&mut self) -> WorldRecord {
        self.load_detailed().0
    }

    /// Load the record and report how it was obtained.
    ///
    /// A missing document yields a persisted default. A damaged one is
    /// salvaged if it starts with a complete object, and otherwise moved
    /// aside and replaced by a persisted default. The result is then
    /// normalized, hydrated, and migrated.
    pub fn load_detailed(&mut self) -> (WorldRecord, LoadReport) {
        let layout = &self.store.layout;
        let canonical = layout.canonical();

        let (mut fields, source) = match fs::read(&canonical) {
            Ok(bytes) => match parse_document(&bytes) {
                Parsed::Clean(Value::Map(fields)) => (fields, LoadSource::Parsed),
                Parsed::Salvaged(Value::Map(fields)) => (fields, LoadSource::Salvaged),
                Parsed::Clean(_) | Parsed::Salvaged(_) => (default_fields(), self.recover("root is not a map")),
                Parsed::Corrupt { reason } => (default_fields(), self.recover(&reason)),
            },
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                info!(path = %canonical.display(), "no world document; creating a default");
                (default_fields(), LoadSource::Created)
            }
            Err(error) => {
                warn!(path = %canonical.display(), error = %error, "world document unreadable");
                let corrupt_path = self.move_aside();
                (default_fields(), LoadSource::Unreadable { corrupt_path })
            }
        };

        let normalized_fields = normalize_legacy(&mut fields);
        let hydrated_fields = hydrate(&mut fields);
        let migration = self.store.migrations.migrate(&mut fields, self.store.target_version);
        let mut record = WorldRecord::from_fields(fields);
        record.resonance_mut().set_limits(self.store.limits);

        let persist_default = match &source {
            LoadSource::Created => true,
            LoadSource::Recovered { corrupt_path } | LoadSource::Unreadable { corrupt_path } => {
                corrupt_path.is_some()
            }
            LoadSource::Parsed | LoadSource::Salvaged => false,
        };
        if persist_default {
            if let Err(error) = self.save(&record) {
                warn!(error = %error, "could not persist default world; continuing in memory");
            }
        } else {
            *self.cache = Some(record.clone());
        }

        debug!(
            source = ?source,
            normalized = normalized_fields.len(),
            hydrated = hydrated_fields.len(),
            schema = %migration.reached,
            "world loaded"
        );
        let report = LoadReport {
            source,
            normalized_fields,
            hydrated_fields,
            migration,
        };
        (record, report)
    }

    /// Write `record` durably.
    ///
    /// The canonical document is replaced atomically. Backup and archive
    /// copies follow; their failure is logged only. On error neither the
    /// files nor the cache change.
    pub fn save(&mut self, record: &WorldRecord) -> Result<(), StoreError> {
        let document = record.to_document();
        if let Some(path) = document.first_non_finite() {
            return Err(StoreError::NonFiniteNumber { path });
        }
        let mut body = serde_json::to_string_pretty(&document)?;
        body.push('\n');

        let layout = &self.store.layout;
        let canonical = layout.canonical();
        self.store.write_with_retries(&canonical, body.as_bytes())?;

        let mut copies = Vec::new();
        if self.store.config.backup_on_save {
            copies.push(layout.backup());
        }
        if self.store.config.archive_on_save {
            copies.push(layout.archive(Utc::now()));
        }
        for copy in copies {
            if let Err(error) = self.store.write_with_retries(&copy, body.as_bytes()) {
                warn!(path = %copy.display(), error = %error, "could not write world copy");
            }
        }

        *self.cache = Some(record.clone());
        debug!(path = %canonical.display(), bytes = body.len(), "world saved");
        Ok(())
    }

    /// A copy of the last record loaded or saved.
    pub fn cached(&self) -> Option<WorldRecord> {
        (*self.cache).clone()
    }

    /// Write the ops of the latest change to the delta document.
    ///
    /// The delta document is replaced on every call and holds `saved_at`
    /// and `ops`. The canonical document and the cache are not touched.
    pub fn save_delta(&mut self, ops: &[PatchOp]) -> Result<(), StoreError> {
        let document = DeltaDocument {
            saved_at: timestamp_now(),
            ops,
        };
        let mut body = serde_json::to_string_pretty(&document)?;
        body.push('\n');

        let target = self.store.layout.delta();
        self.store.write_with_retries(&target, body.as_bytes())?;
        debug!(path = %target.display(), ops = ops.len(), "delta saved");
        Ok(())
    }

    fn recover(&self, reason: &str) -> LoadSource {
        warn!(
            path = %self.store.layout.canonical().display(),
            reason,
            "world document is corrupt; replacing with a default"
        );
        LoadSource::Recovered {
            corrupt_path: self.move_aside(),
        }
    }

    fn move_aside(&self) -> Option<PathBuf> {
        let layout = &self.store.layout;
        let target = layout.corrupt_target(Utc::now());
        match fs::rename(layout.canonical(), &target) {
            Ok(()) => {
                warn!(path = %target.display(), "moved corrupt world document aside");
                Some(target)
            }
            Err(error) => {
                warn!(path = %target.display(), error = %error, "could not move corrupt world document aside");
                None
            }
        }
    }
}

/// Write `bytes` to a temp file beside `target`, sync it, and rename it
/// over `target`. The temp file is removed on failure.
fn write_atomic(target: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = target.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let temp = StoreLayout::temp_for(target);
    let result = write_temp(&temp, bytes).and_then(|()| fs::rename(&temp, target));
    match &result {
        Ok(()) => fsync_directory(dir),
        Err(_) => {
            if let Err(error) = fs::remove_file(&temp)
                && error.kind() != io::ErrorKind::NotFound
            {
                debug!(path = %temp.display(), error = %error, "could not remove temp file");
            }
        }
    }
    result
}

fn write_temp(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.flush()?;
    file.sync_all()
}

fn fsync_directory(dir: &Path) {
    if let Ok(handle) = File::open(dir)
        && let Err(error) = handle.sync_all()
    {
        debug!(path = %dir.display(), error = %error, "directory fsync failed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> WorldStore {
        WorldStore::new(StoreConfig::new(dir, "erbe").with_copies(false, false))
    }

    #[test]
    fn config_defaults() {
        let config: StoreConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.write_retries, 2);
        assert_eq!(config.retry_delay_ms, 10);
        assert!(config.backup_on_save && config.archive_on_save);
    }

    #[test]
    fn first_load_creates_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let (record, report) = store.load_detailed();
        assert_eq!(report.source, LoadSource::Created);
        assert!(store.layout().canonical().exists());
        assert_eq!(store.cached(), Some(record));
    }

    #[test]
    fn save_writes_pretty_json_with_newline() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let mut record = store.load();
        record.set("world_age", 12.0);
        store.save(&record).unwrap();
        let text = fs::read_to_string(store.layout().canonical()).unwrap();
        assert!(text.ends_with("}\n"));
        assert!(text.contains("\n  \"world_age\": 12"));
    }

    #[test]
    fn non_finite_numbers_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let mut record = store.load();
        let before = store.cached();
        record.set("symbolic_density", f64::NAN);
        let err = store.save(&record).unwrap_err();
        assert!(matches!(err, StoreError::NonFiniteNumber { ref path } if path.to_string() == "/symbolic_density"));
        assert_eq!(store.cached(), before);
    }

    #[test]
    fn no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let record = store.load();
        store.save(&record).unwrap();
        let stray = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(stray, 0);
    }

    #[test]
    fn delta_document_holds_the_ops() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let before = store.cached();
        let ops = [PatchOp::add(erbe_types::Path::root().key("banner"), Value::from("raised"))];
        store.session().save_delta(&ops).unwrap();

        let text = fs::read_to_string(store.layout().delta()).unwrap();
        let document: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert!(document.get("saved_at").and_then(serde_json::Value::as_str).is_some());
        let saved = document.get("ops").and_then(serde_json::Value::as_array).unwrap();
        assert_eq!(saved.len(), 1);
        assert!(!store.layout().canonical().exists());
        assert_eq!(store.cached(), before);
    }
}
