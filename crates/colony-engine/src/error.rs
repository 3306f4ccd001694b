//! Error types for the colony engine binary.
//!
//! [`EngineError`] wraps every failure mode during startup and shutdown so
//! `main` can propagate with `?`.

/// Top-level error for the colony engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: colony_core::config::ConfigError,
    },

    /// Master clock construction or control failed.
    #[error("clock error: {source}")]
    Clock {
        /// The underlying clock error.
        #[from]
        source: colony_core::master_clock::ClockError,
    },

    /// Waiting for the shutdown task failed.
    #[error("shutdown task failed: {source}")]
    Shutdown {
        /// The underlying join error.
        #[from]
        source: tokio::task::JoinError,
    },

    /// Final diagnostics could not be serialized.
    #[error("diagnostics error: {source}")]
    Diagnostics {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },
}
