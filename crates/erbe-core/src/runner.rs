//! Periodic tick loop with a stop flag.
//!
//! [`run_periodic`] drives a [`TickOrchestrator`] until one of:
//!
//! - **Tick limit**: `max_ticks` ticks have completed
//! - **Stop request**: [`RunControl::request_stop`] was called; the flag is
//!   checked between ticks and while sleeping, never mid-tick
//! - **Persistent save failure**: several ticks in a row could not be saved
//!
//! The loop is synchronous. Hosts that run an async runtime should call it
//! from a blocking thread.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::RunConfig;
use crate::tick::{TickError, TickOrchestrator, TickSummary};

/// Consecutive failed saves after which the loop gives up.
pub const MAX_CONSECUTIVE_PERSIST_FAILURES: u32 = 3;

/// Longest single sleep between stop-flag checks.
const SLEEP_SLICE_MS: u64 = 50;

/// Errors that end a periodic run early.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// Saves kept failing.
    #[error("{failures} consecutive ticks could not be saved: {source}")]
    PersistFailing {
        /// How many ticks in a row failed to save.
        failures: u32,
        /// The last failure.
        #[source]
        source: TickError,
    },
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEndReason {
    /// The configured `max_ticks` completed.
    MaxTicksReached,
    /// A stop was requested.
    Stopped,
}

/// Outcome of [`run_periodic`].
#[derive(Debug)]
pub struct RunResult {
    /// Why the loop ended.
    pub end_reason: RunEndReason,
    /// Ticks that completed and were saved.
    pub total_ticks: u64,
    /// The last saved tick, if any.
    pub final_summary: Option<TickSummary>,
}

/// Shared control state for a running loop.
#[derive(Debug)]
pub struct RunControl {
    stop_requested: AtomicBool,
    tick_interval_ms: AtomicU64,
}

impl RunControl {
    /// Control state with the given pause between ticks.
    pub const fn new(tick_interval_ms: u64) -> Self {
        Self {
            stop_requested: AtomicBool::new(false),
            tick_interval_ms: AtomicU64::new(tick_interval_ms),
        }
    }

    /// Ask the loop to stop after the current tick.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    /// Whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Current pause between ticks.
    pub fn tick_interval_ms(&self) -> u64 {
        self.tick_interval_ms.load(Ordering::Acquire)
    }

    /// Change the pause between ticks; takes effect after the current sleep slice.
    pub fn set_tick_interval_ms(&self, interval_ms: u64) {
        self.tick_interval_ms.store(interval_ms, Ordering::Release);
    }
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new(RunConfig::default().interval_ms)
    }
}

/// Called after each saved tick.
pub trait TickCallback: Send {
    /// Called with the summary of a tick that was saved.
    fn on_tick(&mut self, summary: &TickSummary);
}

/// A callback that does nothing.
pub struct NoOpCallback;

impl TickCallback for NoOpCallback {
    fn on_tick(&mut self, _summary: &TickSummary) {}
}

impl<F> TickCallback for F
where
    F: FnMut(&TickSummary) + Send,
{
    fn on_tick(&mut self, summary: &TickSummary) {
        self(summary);
    }
}

/// Run ticks until the tick limit, a stop request, or repeated save failures.
///
/// A tick that fails to save is logged and the loop carries on; the next
/// tick starts again from the last saved state.
pub fn run_periodic(
    orchestrator: &mut TickOrchestrator,
    control: &RunControl,
    max_ticks: Option<u64>,
    prompt: Option<&str>,
    callback: &mut dyn TickCallback,
) -> Result<RunResult, RunnerError> {
    let mut final_summary = None;
    let mut total_ticks: u64 = 0;
    let mut persist_failures: u32 = 0;

    info!(
        max_ticks,
        tick_interval_ms = control.tick_interval_ms(),
        stages = orchestrator.stage_names().len(),
        "Periodic run starting"
    );

    let end_reason = loop {
        if control.is_stop_requested() {
            info!("Stop requested");
            break RunEndReason::Stopped;
        }
        if max_ticks.is_some_and(|max| total_ticks >= max) {
            info!(total_ticks, "Tick limit reached");
            break RunEndReason::MaxTicksReached;
        }

        match orchestrator.run_tick(prompt) {
            Ok(summary) => {
                persist_failures = 0;
                total_ticks = total_ticks.saturating_add(1);
                callback.on_tick(&summary);
                final_summary = Some(summary);
            }
            Err(error) => {
                persist_failures = persist_failures.saturating_add(1);
                warn!(failures = persist_failures, error = %error, "Tick failed");
                if persist_failures >= MAX_CONSECUTIVE_PERSIST_FAILURES {
                    return Err(RunnerError::PersistFailing {
                        failures: persist_failures,
                        source: error,
                    });
                }
            }
        }

        if max_ticks.is_some_and(|max| total_ticks >= max) {
            continue;
        }
        sleep_unless_stopped(control);
    };

    let result = RunResult {
        end_reason,
        total_ticks,
        final_summary,
    };
    log_run_end(&result);
    Ok(result)
}

/// Sleep for the current interval in short slices, returning early on stop.
fn sleep_unless_stopped(control: &RunControl) {
    let mut remaining = control.tick_interval_ms();
    while remaining > 0 && !control.is_stop_requested() {
        let slice = remaining.min(SLEEP_SLICE_MS);
        thread::sleep(Duration::from_millis(slice));
        remaining = remaining.saturating_sub(slice);
    }
}

fn log_run_end(result: &RunResult) {
    info!(
        reason = ?result.end_reason,
        total_ticks = result.total_ticks,
        final_tick = result.final_summary.as_ref().map(|s| s.tick_index),
        "Periodic run ended"
    );
    if result.final_summary.is_none() {
        warn!("Run ended with no ticks saved");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use erbe_db::{StoreConfig, WorldStore};
    use erbe_world::WorldRecord;

    use super::*;
    use crate::stage::FnStage;
    use crate::stages::ClockStage;
    use crate::tick::TickOptions;

    fn orchestrator(dir: &std::path::Path) -> TickOrchestrator {
        let store = Arc::new(WorldStore::new(StoreConfig::new(dir, "run").with_copies(false, false)));
        TickOrchestrator::new(store, TickOptions::default()).with_stage(ClockStage)
    }

    #[test]
    fn stops_at_tick_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut orchestrator = orchestrator(dir.path());
        let control = RunControl::new(0);
        let mut seen = Vec::new();
        let mut callback = |summary: &TickSummary| seen.push(summary.tick_index);
        let result = run_periodic(&mut orchestrator, &control, Some(3), None, &mut callback).unwrap();
        assert_eq!(result.end_reason, RunEndReason::MaxTicksReached);
        assert_eq!(result.total_ticks, 3);
        assert_eq!(seen, vec![1, 2, 3]);
        let last = result.final_summary.unwrap();
        assert_eq!(last.record.number("world_age"), Some(3.0));
    }

    #[test]
    fn stop_before_first_tick_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut orchestrator = orchestrator(dir.path());
        let control = RunControl::new(0);
        control.request_stop();
        let result = run_periodic(&mut orchestrator, &control, None, None, &mut NoOpCallback).unwrap();
        assert_eq!(result.end_reason, RunEndReason::Stopped);
        assert_eq!(result.total_ticks, 0);
        assert!(result.final_summary.is_none());
    }

    #[test]
    fn stop_from_another_thread_interrupts_sleep() {
        let dir = tempfile::tempdir().unwrap();
        let mut orchestrator = orchestrator(dir.path());
        let control = Arc::new(RunControl::new(60_000));
        let stopper = Arc::clone(&control);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            stopper.request_stop();
        });
        let result = run_periodic(&mut orchestrator, &control, None, None, &mut NoOpCallback).unwrap();
        handle.join().unwrap();
        assert_eq!(result.end_reason, RunEndReason::Stopped);
        assert_eq!(result.total_ticks, 1);
    }

    #[test]
    fn repeated_save_failures_end_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut orchestrator = orchestrator(dir.path()).with_stage(FnStage::new(
            "poison",
            |record: &mut WorldRecord, _: Option<&str>| {
                record.set("unstable", f64::INFINITY);
                Ok(())
            },
        ));
        let control = RunControl::new(0);
        let err = run_periodic(&mut orchestrator, &control, Some(10), None, &mut NoOpCallback).unwrap_err();
        let RunnerError::PersistFailing { failures, .. } = err;
        assert_eq!(failures, MAX_CONSECUTIVE_PERSIST_FAILURES);
    }

    #[test]
    fn interval_is_adjustable() {
        let control = RunControl::default();
        assert_eq!(control.tick_interval_ms(), 1000);
        control.set_tick_interval_ms(5);
        assert_eq!(control.tick_interval_ms(), 5);
    }
}
