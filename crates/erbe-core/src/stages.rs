//! Built-in stages.
//!
//! | Stage | Effect |
//! |-------|--------|
//! | [`ClockStage`] | Advances `time` and `world_age`, stamps `last_update` |
//! | [`ZoneIntakeStage`] | Merges standalone zone files into `zones` |
//! | [`PatchQueueStage`] | Applies patch batches queued by upstream producers |
//! | [`EffectQueueStage`] | Merges effect maps queued by upstream producers |
//! | [`DensityStage`] | Smooths global `symbolic_density` toward the zone mean |
//!
//! The queues are cheap cloneable handles; producers keep one and push,
//! the stage drains it once per tick.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use erbe_delta::apply_patch_atomic;
use erbe_types::{PatchOp, Value, ValueMap};
use erbe_world::record::timestamp_now;
use erbe_world::zones::zones_mut;
use erbe_world::{WorldRecord, apply_effects, autolink_ring, load_zone_dir, merge_zones};
use tracing::{debug, info, warn};

use crate::stage::{Stage, StageError};

/// Advances the world clock by one step.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClockStage;

impl Stage for ClockStage {
    fn name(&self) -> &'static str {
        "clock"
    }

    fn run(&mut self, record: &mut WorldRecord, _prompt: Option<&str>) -> Result<(), StageError> {
        for key in ["time", "world_age"] {
            let current = record.number(key).unwrap_or(0.0);
            record.set(key, current + 1.0);
        }
        record.set("last_update", timestamp_now());
        Ok(())
    }
}

/// Merges standalone zone files from a directory into the record.
#[derive(Debug, Clone)]
pub struct ZoneIntakeStage {
    dir: PathBuf,
    overwrite: bool,
    autolink: bool,
}

impl ZoneIntakeStage {
    /// Intake from `dir`, keeping existing zones and auto-linking.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            overwrite: false,
            autolink: true,
        }
    }

    /// Replace existing zones with incoming ones of the same id.
    #[must_use]
    pub const fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Link zones lacking links into a ring after merging.
    #[must_use]
    pub const fn autolink(mut self, autolink: bool) -> Self {
        self.autolink = autolink;
        self
    }
}

impl Stage for ZoneIntakeStage {
    fn name(&self) -> &'static str {
        "zone_intake"
    }

    fn run(&mut self, record: &mut WorldRecord, _prompt: Option<&str>) -> Result<(), StageError> {
        let incoming = load_zone_dir(&self.dir)?;
        let report = merge_zones(record.fields_mut(), incoming, self.overwrite);
        let linked = if self.autolink {
            autolink_ring(zones_mut(record.fields_mut()))
        } else {
            0
        };
        if !report.added.is_empty() || !report.replaced.is_empty() {
            info!(
                added = ?report.added,
                replaced = ?report.replaced,
                linked,
                "zones merged"
            );
        }
        Ok(())
    }
}

/// Lock a queue, recovering from poisoning.
fn lock_queue<T>(queue: &Mutex<VecDeque<T>>) -> MutexGuard<'_, VecDeque<T>> {
    queue.lock().unwrap_or_else(|poisoned| {
        warn!("queue lock was poisoned; recovering");
        poisoned.into_inner()
    })
}

/// Producer handle for patch batches.
#[derive(Debug, Clone, Default)]
pub struct PatchQueue {
    batches: Arc<Mutex<VecDeque<Vec<PatchOp>>>>,
}

impl PatchQueue {
    /// An empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a batch for the next tick.
    pub fn push(&self, batch: Vec<PatchOp>) {
        lock_queue(&self.batches).push_back(batch);
    }

    /// Batches waiting.
    pub fn len(&self) -> usize {
        lock_queue(&self.batches).len()
    }

    /// Whether no batches are waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn drain(&self) -> Vec<Vec<PatchOp>> {
        lock_queue(&self.batches).drain(..).collect()
    }
}

/// Applies queued patch batches, each all-or-nothing.
///
/// Patches address the full document, so they may touch the persisted
/// `resonance` sub-tree as well as the record fields. Rejected batches do
/// not stop later ones; they are reported together as the stage error.
#[derive(Debug, Clone)]
pub struct PatchQueueStage {
    queue: PatchQueue,
}

impl PatchQueueStage {
    /// A stage draining `queue`.
    pub const fn new(queue: PatchQueue) -> Self {
        Self { queue }
    }
}

impl Stage for PatchQueueStage {
    fn name(&self) -> &'static str {
        "patch_queue"
    }

    fn run(&mut self, record: &mut WorldRecord, _prompt: Option<&str>) -> Result<(), StageError> {
        let batches = self.queue.drain();
        if batches.is_empty() {
            return Ok(());
        }
        let total = batches.len();
        let mut failures = Vec::new();
        record.with_document(|document| {
            for (index, batch) in batches.iter().enumerate() {
                if let Err(failure) = apply_patch_atomic(document, batch) {
                    failures.push((index, failure));
                }
            }
        });
        debug!(batches = total, rejected = failures.len(), "patch queue drained");
        if failures.is_empty() {
            Ok(())
        } else {
            Err(StageError::PatchBatches { failures })
        }
    }
}

/// Producer handle for effect maps.
#[derive(Debug, Clone, Default)]
pub struct EffectQueue {
    effects: Arc<Mutex<VecDeque<ValueMap>>>,
}

impl EffectQueue {
    /// An empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an effect map for the next tick.
    pub fn push(&self, effects: ValueMap) {
        lock_queue(&self.effects).push_back(effects);
    }

    /// Effect maps waiting.
    pub fn len(&self) -> usize {
        lock_queue(&self.effects).len()
    }

    /// Whether no effects are waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn drain(&self) -> Vec<ValueMap> {
        lock_queue(&self.effects).drain(..).collect()
    }
}

/// Merges queued effect maps into the record, in queue order.
#[derive(Debug, Clone)]
pub struct EffectQueueStage {
    queue: EffectQueue,
}

impl EffectQueueStage {
    /// A stage draining `queue`.
    pub const fn new(queue: EffectQueue) -> Self {
        Self { queue }
    }
}

impl Stage for EffectQueueStage {
    fn name(&self) -> &'static str {
        "effect_queue"
    }

    fn run(&mut self, record: &mut WorldRecord, _prompt: Option<&str>) -> Result<(), StageError> {
        let mut first_error = None;
        for effects in self.queue.drain() {
            if let Err(error) = apply_effects(record, &effects) {
                warn!(error = %error, "effect map rejected");
                if first_error.is_none() {
                    first_error = Some(error);
                }
            }
        }
        first_error.map_or(Ok(()), |error| Err(error.into()))
    }
}

/// Smooths global `symbolic_density` toward the mean zone density.
///
/// Each zone contributes its `symbolic_density`, or its `energy` when that
/// is missing. With no zones the value is left alone.
#[derive(Debug, Clone, Copy)]
pub struct DensityStage {
    alpha: f64,
}

/// Default smoothing factor.
pub const DEFAULT_DENSITY_ALPHA: f64 = 0.33;

impl Default for DensityStage {
    fn default() -> Self {
        Self::new(DEFAULT_DENSITY_ALPHA)
    }
}

impl DensityStage {
    /// A stage with smoothing factor `alpha` in `[0, 1]`.
    pub const fn new(alpha: f64) -> Self {
        Self { alpha }
    }
}

impl Stage for DensityStage {
    fn name(&self) -> &'static str {
        "density"
    }

    fn run(&mut self, record: &mut WorldRecord, _prompt: Option<&str>) -> Result<(), StageError> {
        let samples: Vec<f64> = record
            .get("zones")
            .and_then(Value::as_map)
            .into_iter()
            .flat_map(|zones| zones.values())
            .filter_map(Value::as_map)
            .map(|zone| {
                zone.get("symbolic_density")
                    .or_else(|| zone.get("energy"))
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0)
            })
            .collect();
        if samples.is_empty() {
            return Ok(());
        }
        let count = u32::try_from(samples.len()).unwrap_or(u32::MAX);
        let mean = samples.iter().sum::<f64>() / f64::from(count);
        let current = record.number("symbolic_density").unwrap_or(0.0);
        let smoothed = self.alpha.mul_add(mean, (1.0 - self.alpha) * current);
        if !smoothed.is_finite() {
            return Err(StageError::failed(format!("zone densities produced {smoothed}")));
        }
        record.set("symbolic_density", smoothed);
        Ok(())
    }
}
