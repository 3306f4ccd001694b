//! The master clock: pulse generation, pacing, and fan-out.
//!
//! [`MasterClock`] owns everything that decides *when* simulated time
//! moves and *who* hears about it:
//!
//! - a driver thread (`pulse-driver`) that wakes, measures wall time since
//!   its previous wake, asks the [`Pacer`] how far to advance, advances
//!   the [`Timeline`], and dispatches the resulting [`Pulse`];
//! - the [`ListenerRegistry`] and a supervised [`WorkerPool`] on which
//!   listener callbacks run in parallel, with the driver blocked until the
//!   whole tick has been delivered;
//! - pause/resume, speed, stop and exit controls, all safe to call from
//!   any thread.
//!
//! # Architecture
//!
//! Control flags are atomics read on the driver's hot path without
//! locks. The driver sleeps on a condition variable, so `stop`, pause
//! changes and exit wake it immediately. The timeline is owned by the
//! driver while it runs and parked in the clock while it does not, which
//! lets [`MasterClock::step`] drive ticks by hand and lets a stopped clock
//! resume exactly where it left off.
//!
//! State transitions are published on a [`tokio::sync::watch`] channel so
//! async code can await them (see [`MasterClock::wait_for_exit`]).

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use colony_types::{EarthTime, ListenerId, MarsTime, Pulse, TimeError};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::clock::Timeline;
use crate::config::{ClockConfig, ConfigError};
use crate::listener::{ClockListener, SkippedTime};
use crate::pacing::{Pacer, TickDecision, TickRateTracker};
use crate::pool::{DispatchReport, PoolError, WorkerPool};
use crate::registry::ListenerRegistry;

/// Factor applied by [`MasterClock::increase_speed`] and
/// [`MasterClock::decrease_speed`].
const SPEED_STEP: u32 = 2;

/// Errors that can occur while building or controlling the master clock.
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    /// The configuration violates an invariant.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// Simulated time could not be advanced.
    #[error("time error: {source}")]
    Time {
        /// The underlying calendar error.
        #[from]
        source: TimeError,
    },

    /// The worker pool could not be built or rebuilt.
    #[error("worker pool error: {source}")]
    Pool {
        /// The underlying pool error.
        #[from]
        source: PoolError,
    },

    /// The driver thread could not be spawned.
    #[error("failed to spawn driver thread: {source}")]
    Spawn {
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Manual stepping is not allowed while the driver runs.
    #[error("master clock is running; stop it before stepping manually")]
    AlreadyRunning,

    /// The clock has been told to exit and cannot be restarted.
    #[error("master clock is exiting")]
    Exiting,

    /// The timeline is held elsewhere (a driver is still winding down).
    #[error("timeline unavailable")]
    TimelineUnavailable,

    /// A requested time ratio is outside `1..=max`.
    #[error("time ratio {ratio} outside 1..={max}")]
    InvalidRatio {
        /// The rejected ratio.
        ratio: u32,
        /// The configured maximum.
        max: u32,
    },
}

/// Lifecycle state of the master clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockState {
    /// No driver is running.
    Stopped,
    /// The driver is generating pulses.
    Running,
    /// The driver is alive but generating nothing.
    Paused,
    /// Exit has been requested; terminal.
    Exiting,
}

/// What one tick did.
#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// A pulse was generated and dispatched.
    Pulsed {
        /// The raw pulse of this tick.
        pulse: Arc<Pulse>,
        /// Per-listener delivery tally.
        report: DispatchReport,
        /// Wall time spent advancing and dispatching.
        execution: Duration,
    },
    /// The wall-clock gap was a host stall; nothing advanced.
    Stalled,
    /// Zero elapsed time; nothing advanced.
    Rejected,
    /// The clock is paused; nothing advanced.
    Paused,
}

/// Read-only snapshot of pacing figures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClockDiagnostics {
    /// Current lifecycle state.
    pub state: ClockState,
    /// User-selected time ratio.
    pub desired_ratio: u32,
    /// Ratio achieved by the last tick.
    pub actual_ratio: f64,
    /// Achieved ticks per second over the recent window.
    pub ticks_per_second: f64,
    /// Wall milliseconds the last tick spent executing.
    pub last_execution_ms: u64,
    /// Width of the last pulse in millisols.
    pub last_pulse_width: f64,
    /// Id of the last pulse, 0 before the first tick.
    pub last_pulse_id: u64,
    /// Real time spent producing accepted ticks (pauses and stalls excluded).
    pub uptime_ms: u64,
    /// Registered listeners.
    pub listeners: usize,
    /// Times the worker pool was rebuilt.
    pub pool_rebuilds: u64,
    /// Mars clock at the last pulse (or the start value).
    pub mars_time: MarsTime,
    /// Earth clock at the last pulse (or the start value).
    pub earth_time: EarthTime,
}

/// Mutable pacing figures, written by whoever runs a tick.
#[derive(Debug)]
struct Stats {
    tracker: TickRateTracker,
    actual_ratio: f64,
    last_execution: Duration,
    last_pulse_width: f64,
    uptime: Duration,
}

/// State shared between the control handle and the driver thread.
#[derive(Debug)]
struct Shared {
    pacer: Pacer,
    base_tick: Duration,
    max_time_ratio: u32,
    start: (MarsTime, EarthTime),

    desired_ratio: AtomicU32,
    running: AtomicBool,
    paused: AtomicBool,
    exiting: AtomicBool,
    /// Set on resume; the driver discards the wall time since its last wake.
    reset_reference: AtomicBool,

    registry: ListenerRegistry,
    /// Held for the whole of a dispatch.
    pool: Mutex<WorkerPool>,
    /// Mirror of the pool's rebuild count, readable mid-dispatch.
    pool_rebuilds: AtomicU64,
    /// The timeline while no driver owns it.
    timeline: Mutex<Option<Timeline>>,
    last_pulse: RwLock<Option<Arc<Pulse>>>,
    stats: Mutex<Stats>,

    /// Serializes pause transitions so each one notifies exactly once.
    pause_lock: Mutex<()>,
    wake_lock: Mutex<()>,
    wake: Condvar,
    state_tx: watch::Sender<ClockState>,
}

/// The time-pulse scheduler.
///
/// Construct once at process start and share as `Arc<MasterClock>`.
#[derive(Debug)]
pub struct MasterClock {
    shared: Arc<Shared>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl MasterClock {
    /// Build a stopped master clock.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::Config`] if the configuration is invalid
    /// (for example `min_pulse > max_pulse`) and [`ClockError::Pool`] if
    /// the worker pool cannot be created.
    pub fn new(config: &ClockConfig) -> Result<Self, ClockError> {
        config.validate()?;
        let pool = WorkerPool::new(config.worker_threads())?;
        let (state_tx, _state_rx) = watch::channel(ClockState::Stopped);

        info!(
            min_pulse = config.min_pulse,
            max_pulse = config.max_pulse,
            opt_pulse = config.opt_pulse,
            time_ratio = config.initial_time_ratio,
            workers = pool.threads(),
            start = %config.start_mars_time,
            "Master clock created"
        );

        let shared = Shared {
            pacer: Pacer::new(config),
            base_tick: Duration::from_millis(config.base_tick_ms),
            max_time_ratio: config.max_time_ratio,
            start: (config.start_mars_time, config.start_earth_time),
            desired_ratio: AtomicU32::new(config.initial_time_ratio),
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            exiting: AtomicBool::new(false),
            reset_reference: AtomicBool::new(false),
            registry: ListenerRegistry::new(),
            pool: Mutex::new(pool),
            pool_rebuilds: AtomicU64::new(0),
            timeline: Mutex::new(Some(Timeline::new(
                config.start_mars_time,
                config.start_earth_time,
            ))),
            last_pulse: RwLock::new(None),
            stats: Mutex::new(Stats {
                tracker: TickRateTracker::new(config.tps_window),
                actual_ratio: 0.0,
                last_execution: Duration::ZERO,
                last_pulse_width: 0.0,
                uptime: Duration::ZERO,
            }),
            pause_lock: Mutex::new(()),
            wake_lock: Mutex::new(()),
            wake: Condvar::new(),
            state_tx,
        };

        Ok(Self {
            shared: Arc::new(shared),
            driver: Mutex::new(None),
        })
    }

    // -----------------------------------------------------------------------
    // Listeners
    // -----------------------------------------------------------------------

    /// Register a listener. `min_duration_ms == 0` delivers every pulse;
    /// otherwise pulses closer together than the minimum are merged.
    pub fn add_listener(&self, listener: Arc<dyn ClockListener>, min_duration_ms: u64) -> ListenerId {
        self.shared.registry.add(listener, min_duration_ms)
    }

    /// Unregister a listener. Returns `false` for an unknown handle.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.registry.remove(id)
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Simulated time currently withheld from a throttled listener.
    pub fn pending_skipped(&self, id: ListenerId) -> Option<SkippedTime> {
        self.shared.registry.get(id).map(|task| task.pending_skipped())
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start the driver thread. Idempotent while running.
    ///
    /// Must not be called from inside a listener callback: restarting
    /// joins the previous driver, which waits for that callback.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::Exiting`] after [`exit_program`](Self::exit_program)
    /// and [`ClockError::Spawn`] if the thread cannot be created.
    pub fn start(&self) -> Result<(), ClockError> {
        let mut driver = self.driver.lock().unwrap_or_else(PoisonError::into_inner);
        if self.shared.exiting.load(Ordering::Acquire) {
            return Err(ClockError::Exiting);
        }
        if self.shared.running.load(Ordering::Acquire) {
            return Ok(());
        }
        if let Some(previous) = driver.take() {
            join_driver(previous);
        }

        self.shared.running.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name("pulse-driver".to_owned())
            .spawn(move || run_driver(&shared));
        match spawned {
            Ok(handle) => {
                *driver = Some(handle);
                self.shared.publish_state();
                info!(
                    time_ratio = self.desired_ratio(),
                    "Master clock started"
                );
                Ok(())
            }
            Err(source) => {
                self.shared.running.store(false, Ordering::Release);
                Err(ClockError::Spawn { source })
            }
        }
    }

    /// Ask the driver to stop. It finishes any tick in flight and exits at
    /// the top of its loop; this call does not wait for it.
    pub fn stop(&self) {
        if self.shared.running.swap(false, Ordering::AcqRel) {
            info!("Master clock stopping");
        }
        self.shared.wake_driver();
        self.shared.publish_state();
    }

    /// Pause or resume pulse generation.
    ///
    /// Every listener's `on_pause_change` runs synchronously on the calling
    /// thread, bypassing throttles. Repeating the current state is a no-op.
    /// On resume the paused interval is discarded rather than simulated.
    pub fn set_paused(&self, paused: bool, show_ui: bool) {
        let _transition = self
            .shared
            .pause_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.shared.paused.swap(paused, Ordering::AcqRel) == paused {
            return;
        }
        if !paused {
            self.shared.reset_reference.store(true, Ordering::Release);
        }
        info!(paused, show_ui, "Master clock pause changed");

        for task in self.shared.registry.snapshot() {
            task.notify_pause(paused, show_ui);
        }
        self.shared.stats().tracker.reset();
        self.shared.publish_state();
        self.shared.wake_driver();
    }

    /// Pause, mark the clock as exiting, and stop the driver.
    ///
    /// The process entry point observes this through
    /// [`wait_for_exit`](Self::wait_for_exit), flushes, and terminates.
    pub fn exit_program(&self) {
        info!("Exit requested");
        self.set_paused(true, false);
        self.shared.exiting.store(true, Ordering::Release);
        self.stop();
    }

    /// Resolve once [`exit_program`](Self::exit_program) has been called.
    pub async fn wait_for_exit(&self) {
        let mut rx = self.shared.state_tx.subscribe();
        if rx.wait_for(|state| *state == ClockState::Exiting).await.is_err() {
            warn!("Clock state channel closed before exit");
        }
    }

    /// Stop the driver, wait for it to finish, and release the worker pool.
    ///
    /// Blocks the calling thread; from async code run it via
    /// `spawn_blocking`.
    pub fn shutdown(&self) {
        self.stop();
        let handle = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            join_driver(handle);
        }
        self.shared.pool().shutdown();
        info!("Master clock shut down");
    }

    /// Run one tick on the calling thread with an explicit wall interval.
    ///
    /// Used for single-stepping a stopped clock. Pacing, throttling and
    /// dispatch behave exactly as in the driver loop.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::AlreadyRunning`] while the driver runs, and
    /// propagates time or pool errors from the tick itself.
    pub fn step(&self, real_elapsed: Duration) -> Result<TickOutcome, ClockError> {
        let mut driver = self.driver.lock().unwrap_or_else(PoisonError::into_inner);
        if self.shared.running.load(Ordering::Acquire) {
            return Err(ClockError::AlreadyRunning);
        }
        if let Some(previous) = driver.take() {
            join_driver(previous);
        }
        if self.shared.paused.load(Ordering::Acquire) {
            return Ok(TickOutcome::Paused);
        }

        let mut slot = self
            .shared
            .timeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let timeline = slot.as_mut().ok_or(ClockError::TimelineUnavailable)?;
        self.shared.tick(timeline, real_elapsed)
    }

    // -----------------------------------------------------------------------
    // Speed
    // -----------------------------------------------------------------------

    /// Current desired time ratio.
    pub fn desired_ratio(&self) -> u32 {
        self.shared.desired_ratio.load(Ordering::Acquire)
    }

    /// Set the desired time ratio; effective from the next tick.
    ///
    /// Returns the previous ratio.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidRatio`] outside `1..=max_time_ratio`.
    pub fn set_desired_ratio(&self, ratio: u32) -> Result<u32, ClockError> {
        let max = self.shared.max_time_ratio;
        if ratio == 0 || ratio > max {
            return Err(ClockError::InvalidRatio { ratio, max });
        }
        let previous = self.shared.desired_ratio.swap(ratio, Ordering::AcqRel);
        info!(previous, ratio, "Time ratio changed");
        Ok(previous)
    }

    /// Double the time ratio, capped at the configured maximum. Returns the
    /// new ratio.
    pub fn increase_speed(&self) -> u32 {
        self.update_ratio(|ratio, max| ratio.saturating_mul(SPEED_STEP).min(max))
    }

    /// Halve the time ratio, floored at 1. Returns the new ratio.
    pub fn decrease_speed(&self) -> u32 {
        self.update_ratio(|ratio, _max| ratio.checked_div(SPEED_STEP).map_or(1, |half| half.max(1)))
    }

    /// Apply `f(ratio, max)` atomically and return the new ratio.
    fn update_ratio(&self, f: fn(u32, u32) -> u32) -> u32 {
        let max = self.shared.max_time_ratio;
        let (Ok(previous) | Err(previous)) = self.shared.desired_ratio.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |ratio| Some(f(ratio, max)),
        );
        let ratio = f(previous, max);
        info!(previous, ratio, "Time ratio changed");
        ratio
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Current lifecycle state.
    pub fn state(&self) -> ClockState {
        *self.shared.state_tx.borrow()
    }

    /// Subscribe to lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ClockState> {
        self.shared.state_tx.subscribe()
    }

    /// Whether the driver is (or should be) running.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Whether pulse generation is paused.
    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    /// The most recent pulse, if any tick has run.
    pub fn last_pulse(&self) -> Option<Arc<Pulse>> {
        self.shared
            .last_pulse
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Mars clock as of the last pulse (or the start value).
    pub fn mars_time(&self) -> MarsTime {
        self.last_pulse()
            .map_or(self.shared.start.0, |pulse| *pulse.mars_time())
    }

    /// Earth clock as of the last pulse (or the start value).
    pub fn earth_time(&self) -> EarthTime {
        self.last_pulse()
            .map_or(self.shared.start.1, |pulse| *pulse.earth_time())
    }

    /// Snapshot of pacing diagnostics. No side effects; safe to call from
    /// a listener callback.
    pub fn diagnostics(&self) -> ClockDiagnostics {
        let last = self.last_pulse();
        let stats = self.shared.stats();
        ClockDiagnostics {
            state: self.state(),
            desired_ratio: self.desired_ratio(),
            actual_ratio: stats.actual_ratio,
            ticks_per_second: stats.tracker.ticks_per_second(),
            last_execution_ms: duration_ms(stats.last_execution),
            last_pulse_width: stats.last_pulse_width,
            last_pulse_id: last.as_ref().map_or(0, |pulse| pulse.id()),
            uptime_ms: duration_ms(stats.uptime),
            listeners: self.listener_count(),
            pool_rebuilds: self.shared.pool_rebuilds.load(Ordering::Acquire),
            mars_time: last
                .as_ref()
                .map_or(self.shared.start.0, |pulse| *pulse.mars_time()),
            earth_time: last
                .as_ref()
                .map_or(self.shared.start.1, |pulse| *pulse.earth_time()),
        }
    }
}

impl Drop for MasterClock {
    fn drop(&mut self) {
        // The driver holds its own reference to the shared state and exits
        // on its next iteration.
        self.stop();
    }
}

impl Shared {
    fn stats(&self) -> std::sync::MutexGuard<'_, Stats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pool(&self) -> std::sync::MutexGuard<'_, WorkerPool> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_state(&self) -> ClockState {
        if self.exiting.load(Ordering::Acquire) {
            ClockState::Exiting
        } else if !self.running.load(Ordering::Acquire) {
            ClockState::Stopped
        } else if self.paused.load(Ordering::Acquire) {
            ClockState::Paused
        } else {
            ClockState::Running
        }
    }

    fn publish_state(&self) {
        let state = self.current_state();
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(?previous, ?state, "Master clock state changed");
        }
    }

    fn wake_driver(&self) {
        let _guard = self.wake_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.wake.notify_all();
    }

    /// Sleep up to `duration`, returning early on stop or pause changes.
    fn sleep_for(&self, duration: Duration) {
        let guard = self.wake_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.running.load(Ordering::Acquire) || self.paused.load(Ordering::Acquire) {
            return;
        }
        let _woken = self
            .wake
            .wait_timeout(guard, duration)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Block while paused and still running.
    fn wait_while_paused(&self) {
        let mut guard = self.wake_lock.lock().unwrap_or_else(PoisonError::into_inner);
        while self.paused.load(Ordering::Acquire) && self.running.load(Ordering::Acquire) {
            guard = self.wake.wait(guard).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Advance the timeline for `real_elapsed` of wall time and dispatch.
    fn tick(&self, timeline: &mut Timeline, real_elapsed: Duration) -> Result<TickOutcome, ClockError> {
        let ratio = self.desired_ratio.load(Ordering::Acquire);
        let (elapsed, actual_ratio) = match self.pacer.add_time(real_elapsed, ratio) {
            TickDecision::Stalled => {
                self.stats().tracker.reset();
                return Ok(TickOutcome::Stalled);
            }
            TickDecision::Rejected => return Ok(TickOutcome::Rejected),
            TickDecision::Accepted {
                elapsed,
                actual_ratio,
                ..
            } => (elapsed, actual_ratio),
        };

        let started = Instant::now();
        let pulse = Arc::new(timeline.advance(elapsed)?);
        *self
            .last_pulse
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&pulse));
        let report = self.dispatch(&pulse, started)?;
        let execution = started.elapsed();

        {
            let mut stats = self.stats();
            stats.tracker.record(started);
            stats.actual_ratio = actual_ratio;
            stats.last_execution = execution;
            stats.last_pulse_width = elapsed;
            stats.uptime = stats.uptime.saturating_add(real_elapsed);
        }

        if pulse.is_new_sol() {
            info!(
                mission_sol = pulse.mission_sol(),
                mars_time = %pulse.mars_time(),
                earth_time = %pulse.earth_time(),
                "New sol"
            );
        }
        debug!(
            pulse_id = pulse.id(),
            elapsed,
            actual_ratio,
            delivered = report.delivered,
            throttled = report.throttled,
            failed = report.failed,
            execution_us = execution.as_micros(),
            "Pulse dispatched"
        );

        Ok(TickOutcome::Pulsed {
            pulse,
            report,
            execution,
        })
    }

    /// Deliver `pulse` to every registered listener and wait for all.
    fn dispatch(&self, pulse: &Arc<Pulse>, now: Instant) -> Result<DispatchReport, ClockError> {
        let mut jobs = Vec::new();
        let mut throttled: usize = 0;
        for task in self.registry.snapshot() {
            match task.prepare(pulse, now) {
                Some(delivered) => jobs.push((task, delivered)),
                None => throttled = throttled.saturating_add(1),
            }
        }
        let mut pool = self.pool();
        let result = pool.run(jobs);
        self.pool_rebuilds.store(pool.rebuilds(), Ordering::Release);
        let mut report = result?;
        report.throttled = throttled;
        Ok(report)
    }
}

/// Returns the timeline to its parking slot when the driver exits, even by
/// unwinding.
struct ParkedTimeline<'a> {
    shared: &'a Shared,
    timeline: Option<Timeline>,
}

impl Drop for ParkedTimeline<'_> {
    fn drop(&mut self) {
        if let Some(timeline) = self.timeline.take() {
            *self
                .shared
                .timeline
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(timeline);
        }
    }
}

/// Driver thread body.
fn run_driver(shared: &Shared) {
    let taken = shared
        .timeline
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    let mut parked = ParkedTimeline {
        shared,
        timeline: taken,
    };
    let Some(timeline) = parked.timeline.as_mut() else {
        error!("Driver started without a timeline");
        shared.running.store(false, Ordering::Release);
        shared.publish_state();
        return;
    };

    info!(next_pulse_id = timeline.next_pulse_id(), "Driver started");
    let mut reference = Instant::now();
    let mut sleep = shared.base_tick;

    loop {
        if !shared.running.load(Ordering::Acquire) {
            break;
        }
        if shared.paused.load(Ordering::Acquire) {
            shared.wait_while_paused();
            reference = Instant::now();
            sleep = shared.base_tick;
            continue;
        }

        shared.sleep_for(sleep);
        if !shared.running.load(Ordering::Acquire) {
            break;
        }
        if shared.paused.load(Ordering::Acquire) {
            continue;
        }
        if shared.reset_reference.swap(false, Ordering::AcqRel) {
            reference = Instant::now();
            sleep = shared.base_tick;
            continue;
        }

        let now = Instant::now();
        let real_elapsed = now.saturating_duration_since(reference);
        reference = now;

        sleep = match shared.tick(timeline, real_elapsed) {
            Ok(TickOutcome::Pulsed { execution, .. }) => {
                let ratio = shared.desired_ratio.load(Ordering::Acquire);
                Duration::from_millis(shared.pacer.sleep_ms(ratio, duration_ms(execution)))
            }
            Ok(TickOutcome::Stalled | TickOutcome::Rejected | TickOutcome::Paused) => {
                shared.base_tick
            }
            Err(ClockError::Time { source }) => {
                error!(error = %source, "Simulated time cannot advance; stopping driver");
                shared.running.store(false, Ordering::Release);
                break;
            }
            Err(err) => {
                error!(error = %err, "Tick failed; retrying next cycle");
                shared.base_tick
            }
        };
    }

    info!(last_pulse_id = timeline.last_pulse_id(), "Driver stopped");
    shared.publish_state();
}

fn join_driver(handle: JoinHandle<()>) {
    if handle.join().is_err() {
        error!("Driver thread panicked");
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
