//! Colony engine binary.
//!
//! The process entry point: it builds the master clock from configuration,
//! registers the demo listeners, and runs until interrupted or until the
//! configured real-time limit is reached.
//!
//! # Startup Sequence
//!
//! 1. Load configuration (`COLONY_CONFIG` or `colony-config.yaml`)
//! 2. Initialize structured logging (tracing)
//! 3. Build the master clock
//! 4. Register the sol announcer and the status reporter
//! 5. Start the driver
//! 6. Wait for Ctrl-C, the time limit, or an exit request
//! 7. Exit, shut down, and log final diagnostics

mod error;
mod listeners;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use colony_core::config::{LoggingConfig, SimulationConfig};
use colony_core::listener::ClockListener;
use colony_core::master_clock::MasterClock;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::listeners::{SolAnnouncer, StatusReporter};

/// Real milliseconds between status reports.
const STATUS_INTERVAL_MS: u64 = 5_000;

/// Application entry point for the colony engine.
///
/// # Errors
///
/// Returns an error if configuration, clock construction, or shutdown
/// fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    run().await?;
    Ok(())
}

async fn run() -> Result<(), EngineError> {
    // 1. Load configuration.
    let (config, config_path) = load_config()?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!("colony-engine starting");
    let source = config_path
        .as_ref()
        .map_or_else(|| "defaults".to_owned(), |path| path.display().to_string());
    info!(
        source = %source,
        time_ratio = config.clock.initial_time_ratio,
        max_real_time_seconds = config.simulation.max_real_time_seconds,
        "Configuration loaded"
    );

    // 3. Build the master clock.
    let clock = Arc::new(MasterClock::new(&config.clock)?);

    // 4. Register demo listeners.
    let announcer = Arc::new(SolAnnouncer::new());
    clock.add_listener(Arc::clone(&announcer) as Arc<dyn ClockListener>, 0);
    let reporter = Arc::new(StatusReporter::new(Arc::downgrade(&clock)));
    clock.add_listener(
        Arc::clone(&reporter) as Arc<dyn ClockListener>,
        STATUS_INTERVAL_MS,
    );

    // 5. Start the driver.
    clock.start()?;

    // 6. Wait for a termination condition.
    let limit = config.simulation.max_real_time_seconds;
    tokio::select! {
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => info!("Ctrl-C received"),
            Err(err) => warn!(error = %err, "Failed to listen for Ctrl-C; exiting"),
        },
        () = real_time_limit(limit) => {
            info!(max_real_time_seconds = limit, "Real-time limit reached");
        }
        () = clock.wait_for_exit() => {}
    }

    // 7. Exit and shut down. Joining the driver blocks, so it runs off the
    //    async workers.
    clock.exit_program();
    let stopping = Arc::clone(&clock);
    tokio::task::spawn_blocking(move || stopping.shutdown()).await?;

    let diagnostics = serde_json::to_string(&clock.diagnostics())?;
    info!(
        diagnostics = %diagnostics,
        sols_announced = announcer.sols_announced(),
        status_reports = reporter.reports(),
        "colony-engine shutdown complete"
    );

    Ok(())
}

/// Resolve after `seconds`, or never when `seconds` is 0.
async fn real_time_limit(seconds: u64) {
    if seconds == 0 {
        std::future::pending::<()>().await;
    } else {
        tokio::time::sleep(Duration::from_secs(seconds)).await;
    }
}

/// Install the tracing subscriber. `RUST_LOG` wins over the configured
/// level.
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Load the simulation configuration.
///
/// Reads the path in `COLONY_CONFIG` if set, otherwise
/// `colony-config.yaml` in the working directory. A missing file means
/// defaults; an unreadable or invalid one is an error.
fn load_config() -> Result<(SimulationConfig, Option<PathBuf>), EngineError> {
    let config_path = std::env::var_os("COLONY_CONFIG")
        .map_or_else(|| PathBuf::from("colony-config.yaml"), PathBuf::from);
    if config_path.exists() {
        let config = SimulationConfig::from_file(&config_path)?;
        Ok((config, Some(config_path)))
    } else {
        let mut config = SimulationConfig::default();
        config.clock.apply_env_overrides();
        Ok((config, None))
    }
}
