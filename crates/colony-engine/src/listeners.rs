//! Demo listeners registered by the engine.
//!
//! [`SolAnnouncer`] hears every pulse and logs each sol rollover.
//! [`StatusReporter`] is registered with a throttle and logs a periodic
//! pacing summary, reading diagnostics back from the clock.

use std::sync::Weak;
use std::sync::atomic::{AtomicU64, Ordering};

use colony_core::listener::{ClockListener, ListenerError};
use colony_core::master_clock::MasterClock;
use colony_types::Pulse;
use tracing::info;

/// Logs the start of every new sol.
#[derive(Debug, Default)]
pub struct SolAnnouncer {
    sols: AtomicU64,
}

impl SolAnnouncer {
    /// Create an announcer with no sols seen.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sol rollovers observed so far.
    pub fn sols_announced(&self) -> u64 {
        self.sols.load(Ordering::Relaxed)
    }
}

impl ClockListener for SolAnnouncer {
    fn on_pulse(&self, pulse: &Pulse) -> Result<(), ListenerError> {
        if pulse.is_new_sol() {
            self.sols.fetch_add(1, Ordering::Relaxed);
            let mars = pulse.mars_time();
            info!(
                mission_sol = pulse.mission_sol(),
                orbit = mars.orbit(),
                month = mars.month_name(),
                sol = mars.sol_of_month(),
                earth_time = %pulse.earth_time(),
                "Sol begins"
            );
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "sol-announcer"
    }
}

/// Logs a pacing summary each time its throttle lets a pulse through.
#[derive(Debug)]
pub struct StatusReporter {
    clock: Weak<MasterClock>,
    reports: AtomicU64,
}

impl StatusReporter {
    /// Create a reporter reading diagnostics from `clock`.
    ///
    /// Holds a weak reference so registering it does not keep the clock
    /// alive.
    pub const fn new(clock: Weak<MasterClock>) -> Self {
        Self {
            clock,
            reports: AtomicU64::new(0),
        }
    }

    /// Reports logged so far.
    pub fn reports(&self) -> u64 {
        self.reports.load(Ordering::Relaxed)
    }
}

impl ClockListener for StatusReporter {
    fn on_pulse(&self, pulse: &Pulse) -> Result<(), ListenerError> {
        let Some(clock) = self.clock.upgrade() else {
            return Err(ListenerError::new("master clock dropped"));
        };
        let diag = clock.diagnostics();
        self.reports.fetch_add(1, Ordering::Relaxed);
        info!(
            pulse_id = pulse.id(),
            elapsed = pulse.elapsed(),
            mars_time = %pulse.mars_time(),
            desired_ratio = diag.desired_ratio,
            actual_ratio = diag.actual_ratio,
            ticks_per_second = diag.ticks_per_second,
            last_execution_ms = diag.last_execution_ms,
            "Clock status"
        );
        Ok(())
    }

    fn on_pause_change(&self, is_paused: bool, show_ui: bool) {
        info!(is_paused, show_ui, "Simulation pause changed");
    }

    fn name(&self) -> &str {
        "status-reporter"
    }
}
