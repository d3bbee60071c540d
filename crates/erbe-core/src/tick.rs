//! Tick cycle: one fault-isolated pass of the stage pipeline.
//!
//! Each tick runs through these steps while holding the store session:
//!
//! 1. **Load** -- read the world record through the store.
//!
//! 2. **Stages** -- run every registered stage in order. A stage that
//!    returns an error or panics gets an entry in `world_events`
//!    (`timestamp`, `event`, `stage`, `stage_index`) and the tick moves on.
//!
//! 3. **Bookkeeping** -- decay the resonance overlay once, append the
//!    current `symbolic_density` to `metrics.symbolic_density_history` and
//!    `density_log`, bump `metrics.tick_index`, record `last_tick_ms`, and
//!    compact capped logs.
//!
//! 4. **Reconcile** -- diff the pre-tick and post-tick documents and map
//!    their numeric deltas.
//!
//! 5. **Persist** -- save through the same session, then write the tick's
//!    ops to the delta document. A failed delta write is only logged.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use erbe_db::{StoreError, WorldStore};
use erbe_delta::{DeltaMap, DiffOptions, NumericDeltaOptions, compute_diff, compute_numeric_deltas, diff_summary};
use erbe_types::{PatchOp, Value, ValueMap};
use erbe_world::record::{DEFAULT_MAX_HISTORY, DENSITY_LOG_CAP, append_capped, append_world_event};
use erbe_world::resonance::DEFAULT_DECAY_LAMBDA;
use erbe_world::{WorldRecord, compact};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::stage::Stage;
use crate::stages::{ClockStage, DensityStage, EffectQueue, EffectQueueStage, PatchQueue, PatchQueueStage, ZoneIntakeStage};

/// Errors that can end a tick.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    /// The record could not be saved. The unsaved record is returned so
    /// the caller can decide what to do with it.
    #[error("tick {tick_index} could not be saved: {source}")]
    Persist {
        /// The tick that was not persisted.
        tick_index: u64,
        /// The record as it stood at the end of the tick.
        record: Box<WorldRecord>,
        /// The underlying store error.
        #[source]
        source: StoreError,
    },
}

/// Where the orchestrator is in its cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TickPhase {
    /// Between ticks.
    #[default]
    Idle,
    /// Inside a tick, running the named stage.
    Running {
        /// Name of the stage being run.
        stage: String,
    },
}

/// A stage that failed during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    /// Stage name.
    pub stage: String,
    /// Position of the stage in the pipeline.
    pub stage_index: usize,
    /// Error text or panic message.
    pub message: String,
    /// Whether the stage panicked rather than returning an error.
    pub panicked: bool,
}

/// Summary of a single tick's execution.
#[derive(Debug, Clone)]
pub struct TickSummary {
    /// Value of `metrics.tick_index` after this tick.
    pub tick_index: u64,
    /// The saved record.
    pub record: WorldRecord,
    /// Ops that turn the pre-tick document into the saved one.
    pub ops: Vec<PatchOp>,
    /// Numeric changes between the pre-tick and saved documents.
    pub deltas: DeltaMap,
    /// Stages that failed.
    pub failures: Vec<StageFailure>,
    /// Wall time of the tick in milliseconds.
    pub elapsed_ms: u64,
}

/// Settings applied around the stages of every tick.
#[derive(Debug, Clone)]
pub struct TickOptions {
    /// Diff tuning for the pre/post comparison.
    pub diff: DiffOptions,
    /// Delta tuning for the pre/post comparison.
    pub deltas: NumericDeltaOptions,
    /// Overlay decay factor applied once per tick.
    pub decay_lambda: f64,
}

impl Default for TickOptions {
    fn default() -> Self {
        Self {
            diff: DiffOptions::default().ignoring(["last_update", "last_tick_ms"]),
            deltas: NumericDeltaOptions::default(),
            decay_lambda: DEFAULT_DECAY_LAMBDA,
        }
    }
}

impl TickOptions {
    /// Options described by an engine configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            diff: DiffOptions::with_epsilon(config.tick.diff_epsilon).ignoring(config.tick.ignore_keys.iter().cloned()),
            deltas: NumericDeltaOptions {
                epsilon: config.tick.delta_epsilon,
                style: config.tick.delta_style,
                top_level_only: false,
            },
            decay_lambda: config.resonance.decay_lambda,
        }
    }
}

/// Runs ticks against one store with a fixed stage pipeline.
pub struct TickOrchestrator {
    store: Arc<WorldStore>,
    stages: Vec<Box<dyn Stage>>,
    options: TickOptions,
    phase: TickPhase,
}

impl std::fmt::Debug for TickOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickOrchestrator")
            .field("stages", &self.stage_names())
            .field("options", &self.options)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl TickOrchestrator {
    /// An orchestrator with no stages.
    pub fn new(store: Arc<WorldStore>, options: TickOptions) -> Self {
        Self {
            store,
            stages: Vec::new(),
            options,
            phase: TickPhase::Idle,
        }
    }

    /// An orchestrator with the built-in pipeline described by `config`:
    /// clock, zone intake (when a zone directory is set), patch queue,
    /// effect queue, density.
    pub fn from_config(store: Arc<WorldStore>, config: &EngineConfig, patches: PatchQueue, effects: EffectQueue) -> Self {
        let mut orchestrator = Self::new(store, TickOptions::from_config(config)).with_stage(ClockStage);
        if let Some(dir) = &config.world.zone_dir {
            orchestrator = orchestrator.with_stage(
                ZoneIntakeStage::new(dir.clone())
                    .overwrite(config.world.overwrite_zones)
                    .autolink(config.world.autolink_zones),
            );
        }
        orchestrator
            .with_stage(PatchQueueStage::new(patches))
            .with_stage(EffectQueueStage::new(effects))
            .with_stage(DensityStage::new(config.tick.density_alpha))
    }

    /// Append a stage to the pipeline.
    #[must_use]
    pub fn with_stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Append a boxed stage to the pipeline.
    pub fn push_stage(&mut self, stage: Box<dyn Stage>) {
        self.stages.push(stage);
    }

    /// Stage names in pipeline order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// The current phase.
    pub const fn phase(&self) -> &TickPhase {
        &self.phase
    }

    /// The store ticks run against.
    pub const fn store(&self) -> &Arc<WorldStore> {
        &self.store
    }

    /// Run one tick.
    ///
    /// Stage failures never end the tick; only a failed save does.
    pub fn run_tick(&mut self, prompt: Option<&str>) -> Result<TickSummary, TickError> {
        let started = Instant::now();
        let mut session = self.store.session();
        let mut record = session.load();
        let before = record.to_document();

        let mut failures = Vec::new();
        for (stage_index, stage) in self.stages.iter_mut().enumerate() {
            let name = stage.name().to_owned();
            self.phase = TickPhase::Running { stage: name.clone() };
            debug!(stage = %name, stage_index, "stage starting");

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| stage.run(&mut record, prompt)));
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(error)) => Some((error.to_string(), false)),
                Err(payload) => Some((panic_message(payload.as_ref()), true)),
            };
            if let Some((message, panicked)) = failure {
                warn!(stage = %name, stage_index, panicked, error = %message, "stage failed");
                record_stage_failure(record.fields_mut(), &name, stage_index, &message);
                failures.push(StageFailure {
                    stage: name,
                    stage_index,
                    message,
                    panicked,
                });
            }
        }
        self.phase = TickPhase::Idle;

        if let Err(error) = record.resonance_mut().decay(self.options.decay_lambda) {
            warn!(error = %error, "overlay decay skipped");
        }
        record_density(record.fields_mut());
        let tick_index = bump_tick_index(record.fields_mut());
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        record.set("last_tick_ms", elapsed_ms);
        compact(record.fields_mut());

        let after = record.to_document();
        let ops = compute_diff(&before, &after, &self.options.diff);
        let deltas = compute_numeric_deltas(&before, &after, &self.options.deltas);

        if let Err(source) = session.save(&record) {
            warn!(tick_index, error = %source, "tick not persisted");
            return Err(TickError::Persist {
                tick_index,
                record: Box::new(record),
                source,
            });
        }
        if let Err(error) = session.save_delta(&ops) {
            warn!(tick_index, error = %error, "tick delta not written");
        }
        drop(session);

        let summary = diff_summary(&ops);
        info!(
            tick_index,
            added = summary.added,
            removed = summary.removed,
            replaced = summary.replaced,
            deltas = deltas.len(),
            failed_stages = failures.len(),
            elapsed_ms,
            "tick complete"
        );
        Ok(TickSummary {
            tick_index,
            record,
            ops,
            deltas,
            failures,
            elapsed_ms,
        })
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .map_or_else(|| "panic".to_owned(), |message| format!("panic: {message}"))
}

fn record_stage_failure(fields: &mut ValueMap, stage: &str, stage_index: usize, message: &str) {
    let index = u64::try_from(stage_index).unwrap_or(u64::MAX);
    append_world_event(
        fields,
        &format!("[{stage}] error: {message}"),
        ValueMap::from([
            ("stage".to_owned(), Value::from(stage)),
            ("stage_index".to_owned(), Value::from(index)),
        ]),
    );
}

fn record_density(fields: &mut ValueMap) {
    let density = fields.get("symbolic_density").and_then(Value::as_f64).unwrap_or(0.0);
    let metrics = fields
        .entry("metrics".to_owned())
        .or_insert_with(Value::empty_map)
        .ensure_map();
    let max_history = metrics
        .get("max_history")
        .and_then(Value::as_usize)
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_MAX_HISTORY);
    append_capped(metrics, "symbolic_density_history", Value::Number(density), max_history);
    append_capped(fields, "density_log", Value::Number(density), DENSITY_LOG_CAP);
}

fn bump_tick_index(fields: &mut ValueMap) -> u64 {
    let metrics = fields
        .entry("metrics".to_owned())
        .or_insert_with(Value::empty_map)
        .ensure_map();
    let next = metrics
        .get("tick_index")
        .and_then(Value::as_usize)
        .and_then(|n| u64::try_from(n).ok())
        .unwrap_or(0)
        .saturating_add(1);
    metrics.insert("tick_index".to_owned(), Value::from(next));
    next
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::stage::{FnStage, StageError};
    use erbe_db::StoreConfig;

    fn store(dir: &std::path::Path) -> Arc<WorldStore> {
        Arc::new(WorldStore::new(StoreConfig::new(dir, "tick").with_copies(false, false)))
    }

    #[test]
    fn config_pipeline_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        let orchestrator =
            TickOrchestrator::from_config(store(dir.path()), &config, PatchQueue::new(), EffectQueue::new());
        assert_eq!(orchestrator.stage_names(), vec!["clock", "patch_queue", "effect_queue", "density"]);

        config.world.zone_dir = Some(dir.path().join("zones"));
        let orchestrator =
            TickOrchestrator::from_config(store(dir.path()), &config, PatchQueue::new(), EffectQueue::new());
        assert_eq!(orchestrator.stage_names(), vec!["clock", "zone_intake", "patch_queue", "effect_queue", "density"]);
    }

    #[test]
    fn empty_pipeline_still_does_bookkeeping() {
        let dir = tempfile::tempdir().unwrap();
        let mut orchestrator = TickOrchestrator::new(store(dir.path()), TickOptions::default());
        let first = orchestrator.run_tick(None).unwrap();
        let second = orchestrator.run_tick(None).unwrap();
        assert_eq!(first.tick_index, 1);
        assert_eq!(second.tick_index, 2);
        let history = second
            .record
            .get("metrics")
            .and_then(|m| m.get("symbolic_density_history"))
            .and_then(Value::as_list)
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(second.record.get("density_log").and_then(Value::as_list).map(<[Value]>::len), Some(2));
        assert!(second.record.get("last_tick_ms").is_some());
        assert_eq!(orchestrator.phase(), &TickPhase::Idle);
    }

    #[test]
    fn ops_and_deltas_describe_the_tick() {
        let dir = tempfile::tempdir().unwrap();
        let mut orchestrator = TickOrchestrator::new(store(dir.path()), TickOptions::default()).with_stage(ClockStage);
        let summary = orchestrator.run_tick(None).unwrap();
        assert!(summary.ops.iter().any(|op| op.path().to_string() == "/world_age"));
        assert!(summary.ops.iter().all(|op| op.path().to_string() != "/last_update"));
        assert_eq!(summary.deltas.get("/world_age"), Some(1.0));
        assert_eq!(summary.deltas.get("/metrics/tick_index"), Some(1.0));
    }

    #[test]
    fn delta_document_follows_each_tick() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let mut orchestrator = TickOrchestrator::new(Arc::clone(&store), TickOptions::default()).with_stage(ClockStage);
        let summary = orchestrator.run_tick(None).unwrap();

        let text = std::fs::read_to_string(store.layout().delta()).unwrap();
        let document: serde_json::Value = serde_json::from_str(&text).unwrap();
        let ops = document.get("ops").and_then(serde_json::Value::as_array).unwrap();
        assert_eq!(ops.len(), summary.ops.len());
        assert!(ops.iter().any(|op| op.get("path").and_then(serde_json::Value::as_str) == Some("/world_age")));
    }

    #[test]
    fn panicking_stage_is_contained() {
        let dir = tempfile::tempdir().unwrap();
        let mut orchestrator = TickOrchestrator::new(store(dir.path()), TickOptions::default())
            .with_stage(FnStage::new("boom", |_: &mut WorldRecord, _: Option<&str>| -> Result<(), StageError> {
                panic!("stage exploded")
            }))
            .with_stage(ClockStage);
        let summary = orchestrator.run_tick(None).unwrap();
        assert_eq!(summary.failures.len(), 1);
        let failure = summary.failures.first().unwrap();
        assert!(failure.panicked);
        assert_eq!(failure.message, "panic: stage exploded");
        assert_eq!(summary.record.number("world_age"), Some(1.0));
    }

    #[test]
    fn prompt_reaches_every_stage() {
        let dir = tempfile::tempdir().unwrap();
        let mut orchestrator = TickOrchestrator::new(store(dir.path()), TickOptions::default())
            .with_stage(FnStage::new("first", |r: &mut WorldRecord, p: Option<&str>| {
                r.set("first_prompt", p.unwrap_or_default());
                Ok(())
            }))
            .with_stage(FnStage::new("second", |r: &mut WorldRecord, p: Option<&str>| {
                r.set("second_prompt", p.unwrap_or_default());
                Ok(())
            }));
        let summary = orchestrator.run_tick(Some("dawn")).unwrap();
        assert_eq!(summary.record.get("first_prompt").and_then(Value::as_str), Some("dawn"));
        assert_eq!(summary.record.get("second_prompt").and_then(Value::as_str), Some("dawn"));
        assert_eq!(orchestrator.stage_names(), vec!["first", "second"]);
    }

    #[test]
    fn failed_save_returns_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let mut orchestrator = TickOrchestrator::new(Arc::clone(&store), TickOptions::default())
            .with_stage(ClockStage)
            .with_stage(FnStage::new("poison", |r: &mut WorldRecord, _: Option<&str>| {
                r.set("unstable", f64::NAN);
                Ok(())
            }));
        let err = orchestrator.run_tick(None).unwrap_err();
        let TickError::Persist { tick_index, record, source } = err;
        assert_eq!(tick_index, 1);
        assert_eq!(record.number("world_age"), Some(1.0));
        assert!(matches!(source, erbe_db::StoreError::NonFiniteNumber { .. }));

        let on_disk = store.load();
        assert_eq!(on_disk.number("world_age"), Some(0.0));
    }
}
