//! Configuration loading and typed config structures for the Erbe engine.
//!
//! The canonical configuration lives in `erbe-config.yaml`. Every section
//! and field is optional; anything left out takes the default documented on
//! its field.

use std::path::{Path, PathBuf};

use erbe_db::StoreConfig;
use erbe_delta::{DEFAULT_DIFF_EPSILON, DEFAULT_NUMERIC_EPSILON};
use erbe_types::PathStyle;
use erbe_world::OverlayLimits;
use erbe_world::resonance::{
    DEFAULT_DECAY_LAMBDA, DEFAULT_GLOBAL_COEF, DEFAULT_MAX_MARKERS, DEFAULT_VISIBILITY_THRESHOLD, DEFAULT_ZONE_COEF,
};
use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value is outside its allowed range.
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Dotted name of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level engine configuration.
///
/// Mirrors the structure of `erbe-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EngineConfig {
    /// Zone intake settings.
    #[serde(default)]
    pub world: WorldConfig,

    /// Durable store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Per-tick bookkeeping settings.
    #[serde(default)]
    pub tick: TickConfig,

    /// Resonance overlay tunables.
    #[serde(default)]
    pub resonance: ResonanceConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Periodic runner settings.
    #[serde(default)]
    pub run: RunConfig,
}

impl EngineConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Load from `path` if it exists, otherwise use defaults.
    pub fn from_file_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse configuration from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check ranges serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let lambda = self.resonance.decay_lambda;
        let lambda_in_range = lambda > 0.0 && lambda < 1.0;
        if !lambda_in_range {
            return Err(ConfigError::Invalid {
                field: "resonance.decay_lambda",
                reason: format!("must be in (0, 1), got {lambda}"),
            });
        }
        let alpha = self.tick.density_alpha;
        if !(0.0..=1.0).contains(&alpha) {
            return Err(ConfigError::Invalid {
                field: "tick.density_alpha",
                reason: format!("must be in [0, 1], got {alpha}"),
            });
        }
        if self.resonance.max_markers == 0 {
            return Err(ConfigError::Invalid {
                field: "resonance.max_markers",
                reason: "must be at least 1".to_owned(),
            });
        }
        Ok(())
    }
}

/// Zone intake configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorldConfig {
    /// Directory of standalone `*.json` zone files. No intake stage runs
    /// when unset.
    #[serde(default)]
    pub zone_dir: Option<PathBuf>,

    /// Replace existing zones with incoming ones of the same id.
    #[serde(default)]
    pub overwrite_zones: bool,

    /// Link zones without links into a ring after intake.
    #[serde(default = "default_true")]
    pub autolink_zones: bool,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            zone_dir: None,
            overwrite_zones: false,
            autolink_zones: true,
        }
    }
}

/// Per-tick bookkeeping configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TickConfig {
    /// Numbers closer than this count as unchanged in the tick diff.
    #[serde(default = "default_diff_epsilon")]
    pub diff_epsilon: f64,

    /// Numeric changes at or below this are left out of the tick deltas.
    #[serde(default = "default_delta_epsilon")]
    pub delta_epsilon: f64,

    /// Path encoding used for delta keys.
    #[serde(default)]
    pub delta_style: PathStyle,

    /// Keys skipped at every level when diffing, because they change
    /// every tick.
    #[serde(default = "default_ignore_keys")]
    pub ignore_keys: Vec<String>,

    /// Smoothing factor of the density stage.
    #[serde(default = "default_density_alpha")]
    pub density_alpha: f64,

    /// Free-text prompt handed to every stage.
    #[serde(default)]
    pub prompt: Option<String>,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            diff_epsilon: default_diff_epsilon(),
            delta_epsilon: default_delta_epsilon(),
            delta_style: PathStyle::default(),
            ignore_keys: default_ignore_keys(),
            density_alpha: default_density_alpha(),
            prompt: None,
        }
    }
}

/// Resonance overlay configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResonanceConfig {
    /// Per-tick decay factor, in `(0, 1)`.
    #[serde(default = "default_decay_lambda")]
    pub decay_lambda: f64,

    /// Marker cap per bucket.
    #[serde(default = "default_max_markers")]
    pub max_markers: usize,

    /// Blended weight at which a marker becomes visible.
    #[serde(default = "default_visibility_threshold")]
    pub visibility_threshold: f64,

    /// Blend coefficient of the global bucket.
    #[serde(default = "default_global_coef")]
    pub global_coef: f64,

    /// Blend coefficient of the zone bucket.
    #[serde(default = "default_zone_coef")]
    pub zone_coef: f64,
}

impl ResonanceConfig {
    /// The overlay limits these settings describe.
    pub const fn limits(&self) -> OverlayLimits {
        OverlayLimits {
            max_markers: self.max_markers,
            visibility_threshold: self.visibility_threshold,
        }
    }
}

impl Default for ResonanceConfig {
    fn default() -> Self {
        Self {
            decay_lambda: default_decay_lambda(),
            max_markers: default_max_markers(),
            visibility_threshold: default_visibility_threshold(),
            global_coef: default_global_coef(),
            zone_coef: default_zone_coef(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Periodic runner configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RunConfig {
    /// Pause between ticks in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Stop after this many ticks. Runs until stopped when unset.
    #[serde(default)]
    pub max_ticks: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_ticks: None,
        }
    }
}

// =============================================================================
// Default value functions
// =============================================================================

const fn default_true() -> bool {
    true
}

const fn default_diff_epsilon() -> f64 {
    DEFAULT_DIFF_EPSILON
}

const fn default_delta_epsilon() -> f64 {
    DEFAULT_NUMERIC_EPSILON
}

fn default_ignore_keys() -> Vec<String> {
    ["last_update", "last_tick_ms"].map(str::to_owned).to_vec()
}

const fn default_density_alpha() -> f64 {
    0.33
}

const fn default_decay_lambda() -> f64 {
    DEFAULT_DECAY_LAMBDA
}

const fn default_max_markers() -> usize {
    DEFAULT_MAX_MARKERS
}

const fn default_visibility_threshold() -> f64 {
    DEFAULT_VISIBILITY_THRESHOLD
}

const fn default_global_coef() -> f64 {
    DEFAULT_GLOBAL_COEF
}

const fn default_zone_coef() -> f64 {
    DEFAULT_ZONE_COEF
}

fn default_log_level() -> String {
    "info".to_owned()
}

const fn default_interval_ms() -> u64 {
    1000
}
