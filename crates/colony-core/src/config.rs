//! Configuration loading and typed config structures for the master clock.
//!
//! The canonical configuration lives in `colony-config.yaml` at the project
//! root. This module defines strongly-typed structs that mirror the YAML
//! structure, a loader that reads the file, and [`ClockConfig::validate`],
//! which enforces the invariants the scheduler relies on.

use std::num::NonZeroUsize;
use std::path::Path;

use chrono::{DateTime, Utc};
use colony_types::{EarthTime, MarsTime};
use serde::Deserialize;
use tracing::warn;

/// Errors that can occur when loading or validating configuration.
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

    /// A configuration invariant does not hold. Fatal at construction.
    #[error("invalid clock configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration.
///
/// Mirrors the structure of `colony-config.yaml`. Every field has a
/// default, so any section may be omitted.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SimulationConfig {
    /// Master clock pacing and start dates.
    #[serde(default)]
    pub clock: ClockConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Process run boundaries.
    #[serde(default)]
    pub simulation: SimulationBoundsConfig,
}

impl SimulationConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// The `COLONY_TIME_RATIO` environment variable overrides
    /// `clock.initial_time_ratio` when set to a valid integer.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = serde_yml::from_str(&contents)?;
        config.clock.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.clock.apply_env_overrides();
        Ok(config)
    }
}

/// Master clock configuration.
///
/// Pulse widths are in millisols; durations are real milliseconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClockConfig {
    /// Smallest simulated step a tick may take.
    #[serde(default = "default_min_pulse")]
    pub min_pulse: f64,

    /// Largest simulated step a tick may take.
    #[serde(default = "default_max_pulse")]
    pub max_pulse: f64,

    /// Preferred pulse width; the adaptive sleep aims for it.
    #[serde(default = "default_opt_pulse")]
    pub opt_pulse: f64,

    /// Sleep before the first measured tick.
    #[serde(default = "default_base_tick_ms")]
    pub base_tick_ms: u64,

    /// Simulated seconds per real second at startup.
    #[serde(default = "default_initial_time_ratio")]
    pub initial_time_ratio: u32,

    /// Upper bound for the time ratio.
    #[serde(default = "default_max_time_ratio")]
    pub max_time_ratio: u32,

    /// Cores kept free of listener work.
    #[serde(default = "default_reserved_cores")]
    pub reserved_cores: usize,

    /// Wall-clock gaps above this are treated as host stalls.
    #[serde(default = "default_stall_threshold_ms")]
    pub stall_threshold_ms: u64,

    /// Replacement for computed sleeps that exceed the stall threshold.
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,

    /// Number of recent tick instants kept for the ticks-per-second figure.
    #[serde(default = "default_tps_window")]
    pub tps_window: usize,

    /// Mars clock value at program start.
    #[serde(default = "default_start_mars_time")]
    pub start_mars_time: MarsTime,

    /// Earth clock value at program start.
    #[serde(default = "default_start_earth_time")]
    pub start_earth_time: EarthTime,
}

impl ClockConfig {
    /// Check every invariant the scheduler depends on.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| Err(ConfigError::Invalid { reason });

        if !self.min_pulse.is_finite() || self.min_pulse <= 0.0 {
            return invalid(format!("min_pulse must be positive, got {}", self.min_pulse));
        }
        if !self.max_pulse.is_finite() {
            return invalid(format!("max_pulse must be finite, got {}", self.max_pulse));
        }
        if self.min_pulse > self.max_pulse {
            return invalid(format!(
                "min_pulse {} exceeds max_pulse {}",
                self.min_pulse, self.max_pulse
            ));
        }
        if !(self.min_pulse..=self.max_pulse).contains(&self.opt_pulse) {
            return invalid(format!(
                "opt_pulse {} outside [{}, {}]",
                self.opt_pulse, self.min_pulse, self.max_pulse
            ));
        }
        if self.initial_time_ratio == 0 {
            return invalid("initial_time_ratio must be at least 1".to_owned());
        }
        if self.initial_time_ratio > self.max_time_ratio {
            return invalid(format!(
                "initial_time_ratio {} exceeds max_time_ratio {}",
                self.initial_time_ratio, self.max_time_ratio
            ));
        }
        if self.stall_threshold_ms == 0 {
            return invalid("stall_threshold_ms must be at least 1".to_owned());
        }
        if self.max_wait_ms == 0 || self.max_wait_ms > self.stall_threshold_ms {
            return invalid(format!(
                "max_wait_ms {} must be in 1..={}",
                self.max_wait_ms, self.stall_threshold_ms
            ));
        }
        if self.tps_window < 2 {
            return invalid(format!("tps_window must be at least 2, got {}", self.tps_window));
        }
        Ok(())
    }

    /// Worker threads for listener dispatch: available cores minus the
    /// reservation, never less than one.
    pub fn worker_threads(&self) -> usize {
        std::thread::available_parallelism()
            .map_or(1, NonZeroUsize::get)
            .saturating_sub(self.reserved_cores)
            .max(1)
    }

    /// Override the initial ratio from `COLONY_TIME_RATIO` when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("COLONY_TIME_RATIO") {
            match val.parse::<u32>() {
                Ok(ratio) => self.initial_time_ratio = ratio,
                Err(err) => warn!(value = %val, error = %err, "Ignoring COLONY_TIME_RATIO"),
            }
        }
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            min_pulse: default_min_pulse(),
            max_pulse: default_max_pulse(),
            opt_pulse: default_opt_pulse(),
            base_tick_ms: default_base_tick_ms(),
            initial_time_ratio: default_initial_time_ratio(),
            max_time_ratio: default_max_time_ratio(),
            reserved_cores: default_reserved_cores(),
            stall_threshold_ms: default_stall_threshold_ms(),
            max_wait_ms: default_max_wait_ms(),
            tps_window: default_tps_window(),
            start_mars_time: default_start_mars_time(),
            start_earth_time: default_start_earth_time(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON log lines instead of human-readable text.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Process run boundaries.
///
/// A value of 0 means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SimulationBoundsConfig {
    /// Maximum wall-clock seconds before the engine exits (0 = unlimited).
    #[serde(default)]
    pub max_real_time_seconds: u64,
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

const fn default_min_pulse() -> f64 {
    0.01
}

const fn default_max_pulse() -> f64 {
    10.0
}

const fn default_opt_pulse() -> f64 {
    0.05
}

const fn default_base_tick_ms() -> u64 {
    40
}

const fn default_initial_time_ratio() -> u32 {
    256
}

const fn default_max_time_ratio() -> u32 {
    16_384
}

const fn default_reserved_cores() -> usize {
    1
}

const fn default_stall_threshold_ms() -> u64 {
    30_000
}

const fn default_max_wait_ms() -> u64 {
    1_000
}

const fn default_tps_window() -> usize {
    10
}

fn default_start_mars_time() -> MarsTime {
    MarsTime::new(3, 1, 1, 0.0).unwrap_or_default()
}

fn default_start_earth_time() -> EarthTime {
    // 2043-09-30T00:00:00Z
    EarthTime::new(DateTime::<Utc>::from_timestamp(2_327_184_000, 0).unwrap_or_default())
}

fn default_log_level() -> String {
    "info".to_owned()
}
