//! Engine binary for the Erbe world.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from the path given as the first argument, else
//!    `ERBE_CONFIG`, else `erbe-config.yaml` (defaults when missing)
//! 2. Initialize structured logging (tracing)
//! 3. Open the world store and log how the record was loaded
//! 4. Build the tick pipeline from config
//! 5. Run the periodic loop on a blocking thread until the tick limit or
//!    Ctrl-C
//! 6. Log the result

mod error;
mod log_callback;

use std::path::PathBuf;
use std::sync::Arc;

use erbe_core::config::{EngineConfig, LogFormat, LoggingConfig};
use erbe_core::runner::{self, RunControl};
use erbe_core::stages::{EffectQueue, PatchQueue};
use erbe_core::tick::TickOrchestrator;
use erbe_db::WorldStore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::log_callback::LogCallback;

/// Config file used when neither an argument nor `ERBE_CONFIG` is given.
const DEFAULT_CONFIG_PATH: &str = "erbe-config.yaml";

/// Delta lines printed per tick at debug level.
const DELTA_LINES_PER_TICK: usize = 12;

/// Application entry point for the engine.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, saves keep failing,
/// or the tick thread dies.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config_path = config_path();
    let config_found = config_path.exists();
    let config = EngineConfig::from_file_or_default(&config_path).map_err(EngineError::from)?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging);
    info!("erbe-engine starting");
    if config_found {
        info!(path = %config_path.display(), "Configuration loaded");
    } else {
        info!(path = %config_path.display(), "Config file not found, using defaults");
    }

    // 3. Open the world store.
    let store = Arc::new(WorldStore::new(config.store.clone()).with_overlay_limits(config.resonance.limits()));
    let (_, report) = store.load_detailed();
    info!(
        path = %store.layout().canonical().display(),
        source = ?report.source,
        normalized = report.normalized_fields.len(),
        hydrated = report.hydrated_fields.len(),
        schema = %report.migration.reached,
        "World store opened"
    );
    if report.source.is_default() {
        warn!("Starting from a default world");
    }

    // 4. Build the tick pipeline.
    let orchestrator = TickOrchestrator::from_config(Arc::clone(&store), &config, PatchQueue::new(), EffectQueue::new());
    info!(stages = ?orchestrator.stage_names(), "Tick pipeline assembled");

    // 5. Run until the tick limit or Ctrl-C.
    let control = Arc::new(RunControl::new(config.run.interval_ms));
    spawn_stop_on_ctrl_c(Arc::clone(&control));

    let max_ticks = config.run.max_ticks;
    let prompt = config.tick.prompt.clone();
    let (global_coef, zone_coef) = (config.resonance.global_coef, config.resonance.zone_coef);
    let handle = tokio::task::spawn_blocking(move || {
        let mut orchestrator = orchestrator;
        let mut callback = LogCallback::new(DELTA_LINES_PER_TICK, global_coef, zone_coef);
        runner::run_periodic(&mut orchestrator, &control, max_ticks, prompt.as_deref(), &mut callback)
    });
    let result = handle
        .await
        .map_err(|e| EngineError::Join { message: e.to_string() })?
        .map_err(EngineError::from)?;

    // 6. Log results.
    info!(
        end_reason = ?result.end_reason,
        total_ticks = result.total_ticks,
        "erbe-engine shutdown complete"
    );

    Ok(())
}

/// Where to read configuration from.
fn config_path() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os("ERBE_CONFIG"))
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

/// Request a stop when Ctrl-C arrives. The loop notices between ticks.
fn spawn_stop_on_ctrl_c(control: Arc<RunControl>) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, stopping after the current tick");
                control.request_stop();
            }
            Err(error) => warn!(error = %error, "Could not listen for Ctrl-C; stop the process to exit"),
        }
    });
}
