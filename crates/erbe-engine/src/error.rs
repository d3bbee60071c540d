//! Error types for the engine binary.

/// Top-level error for the engine binary.
///
/// Each variant wraps a specific subsystem error so that `main` can
/// propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: erbe_core::config::ConfigError,
    },

    /// The periodic runner gave up.
    #[error("runner error: {source}")]
    Runner {
        /// The underlying runner error.
        #[from]
        source: erbe_core::runner::RunnerError,
    },

    /// The blocking tick thread did not finish cleanly.
    #[error("tick thread failed: {message}")]
    Join {
        /// Description of the join failure.
        message: String,
    },
}
