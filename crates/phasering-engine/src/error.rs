//! Error types for the controller engine binary.
//!
//! [`EngineError`] wraps every failure mode of engine startup and the
//! controller run.

/// Top-level error for the controller engine binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading or validation failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: phasering_core::config::ConfigError,
    },

    /// Simulation clock initialization failed.
    #[error("clock error: {source}")]
    Clock {
        /// The underlying clock error.
        #[from]
        source: phasering_core::clock::ClockError,
    },

    /// Controller run failed.
    #[error("runner error: {source}")]
    Runner {
        /// The underlying runner error.
        #[from]
        source: phasering_core::runner::RunnerError,
    },

    /// The detector script could not be read.
    #[error("script error: {message}")]
    Script {
        /// Description of the script failure.
        message: String,
    },
}
