//! File naming inside the data directory.
//!
//! Archive and corrupt artifacts are never overwritten: when the
//! timestamped name is taken, a `_1`, `_2`, ... counter is appended.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Paths of every file belonging to one world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    dir: PathBuf,
    name: String,
}

impl StoreLayout {
    /// Layout for world `name` inside `dir`.
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
        }
    }

    /// The data directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The world name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `<name>.json`
    pub fn canonical(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.name))
    }

    /// `<name>_backup.json`
    pub fn backup(&self) -> PathBuf {
        self.dir.join(format!("{}_backup.json", self.name))
    }

    /// `<name>_delta.json`
    pub fn delta(&self) -> PathBuf {
        self.dir.join(format!("{}_delta.json", self.name))
    }

    /// A free `<name>_YYYYMMDD_HHMMSS.json` for a save made at `now`.
    pub fn archive(&self, now: DateTime<Utc>) -> PathBuf {
        let stem = format!("{}_{}", self.name, now.format("%Y%m%d_%H%M%S"));
        self.first_free(&stem, "json")
    }

    /// Where to move a corrupt canonical document found at `now`.
    ///
    /// `<name>.corrupt` while it is free, then
    /// `<name>.YYYYMMDD-HHMMSS.corrupt`.
    pub fn corrupt_target(&self, now: DateTime<Utc>) -> PathBuf {
        let plain = self.dir.join(format!("{}.corrupt", self.name));
        if !plain.exists() {
            return plain;
        }
        let stem = format!("{}.{}", self.name, now.format("%Y%m%d-%H%M%S"));
        self.first_free(&stem, "corrupt")
    }

    /// A unique temp file beside `target`.
    pub fn temp_for(target: &Path) -> PathBuf {
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        target.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()))
    }

    fn first_free(&self, stem: &str, extension: &str) -> PathBuf {
        let candidate = self.dir.join(format!("{stem}.{extension}"));
        if !candidate.exists() {
            return candidate;
        }
        let mut counter = 1_u32;
        loop {
            let candidate = self.dir.join(format!("{stem}_{counter}.{extension}"));
            if !candidate.exists() {
                return candidate;
            }
            counter = counter.saturating_add(1);
        }
    }
}
