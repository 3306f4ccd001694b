//! Listener contract and per-listener throttling.
//!
//! Subsystems implement [`ClockListener`] and register with the master
//! clock, which wraps each one in a [`ListenerTask`]. A task with a
//! non-zero minimum duration converts the raw pulse stream into a coarser
//! one: ticks arriving sooner than the minimum are folded into a
//! [`SkippedTime`] accumulator and delivered with the next pulse that does
//! get through, so no simulated time is ever lost to throttling.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use colony_types::{ListenerId, Pulse};
use tracing::{debug, error};

/// Error a listener reports from its pulse callback.
///
/// Reported errors are logged with the listener's identity; they never
/// interrupt delivery to other listeners.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ListenerError {
    /// Human-readable failure description.
    pub message: String,
}

impl ListenerError {
    /// Create an error with the given description.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A subsystem driven by the master clock.
///
/// Callbacks run on worker threads, possibly in parallel with other
/// listeners, but never concurrently with themselves: the next pulse is
/// only generated after every listener has returned from the current one.
pub trait ClockListener: Send + Sync {
    /// Called for every delivered pulse (possibly merged after throttling).
    fn on_pulse(&self, pulse: &Pulse) -> Result<(), ListenerError>;

    /// Called on every pause/resume transition. Never throttled.
    fn on_pause_change(&self, _is_paused: bool, _show_ui: bool) {}

    /// Name used to identify this listener in logs.
    fn name(&self) -> &str {
        "listener"
    }
}

/// Simulated time withheld from a throttled listener.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SkippedTime {
    /// Millisols from suppressed ticks.
    pub elapsed: f64,
    /// Number of suppressed ticks.
    pub ticks: u64,
    /// Whether any suppressed tick started a new sol.
    pub new_sol: bool,
    /// Whether any suppressed tick crossed a whole millisol.
    pub new_millisol: bool,
}

impl SkippedTime {
    /// Fold a suppressed pulse into the accumulator.
    pub fn absorb(&mut self, pulse: &Pulse) {
        self.elapsed += pulse.elapsed();
        self.ticks = self.ticks.saturating_add(1);
        self.new_sol |= pulse.is_new_sol();
        self.new_millisol |= pulse.is_new_millisol();
    }

    /// Whether nothing has been withheld.
    pub const fn is_empty(&self) -> bool {
        self.ticks == 0
    }
}

/// Build the pulse a throttled listener receives.
///
/// Same id and clock snapshots as `pulse`; `elapsed` grows by the skipped
/// amount and boundary flags from skipped ticks are carried forward.
pub fn merge_skipped(pulse: &Pulse, skipped: &SkippedTime) -> Pulse {
    pulse.with_carry(skipped.elapsed, skipped.new_sol, skipped.new_millisol)
}

/// Outcome of one callback invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The listener returned `Ok`.
    Delivered,
    /// The listener returned `Err` or panicked.
    Failed,
}

#[derive(Debug, Default)]
struct ThrottleState {
    last_delivered: Option<Instant>,
    skipped: SkippedTime,
}

/// A registered listener with its throttle bookkeeping.
pub struct ListenerTask {
    id: ListenerId,
    listener: Arc<dyn ClockListener>,
    min_duration: Duration,
    throttle: Mutex<ThrottleState>,
}

impl ListenerTask {
    /// Wrap `listener`; `min_duration_ms == 0` means every pulse.
    pub fn new(id: ListenerId, listener: Arc<dyn ClockListener>, min_duration_ms: u64) -> Self {
        Self {
            id,
            listener,
            min_duration: Duration::from_millis(min_duration_ms),
            throttle: Mutex::new(ThrottleState::default()),
        }
    }

    /// Registration handle.
    pub const fn id(&self) -> ListenerId {
        self.id
    }

    /// Listener name for logs.
    pub fn name(&self) -> &str {
        self.listener.name()
    }

    /// Configured minimum delivery interval.
    pub const fn min_duration(&self) -> Duration {
        self.min_duration
    }

    /// Decide what this listener receives for `pulse` at wall time `now`.
    ///
    /// Returns `None` when the tick is suppressed; its elapsed time is
    /// then held until the next delivery.
    pub fn prepare(&self, pulse: &Arc<Pulse>, now: Instant) -> Option<Arc<Pulse>> {
        if self.min_duration.is_zero() {
            return Some(Arc::clone(pulse));
        }

        let mut state = self.throttle.lock().unwrap_or_else(PoisonError::into_inner);
        let due = state
            .last_delivered
            .is_none_or(|last| now.saturating_duration_since(last) >= self.min_duration);
        if !due {
            state.skipped.absorb(pulse);
            return None;
        }

        state.last_delivered = Some(now);
        if state.skipped.is_empty() {
            return Some(Arc::clone(pulse));
        }
        let skipped = std::mem::take(&mut state.skipped);
        debug!(
            listener = self.name(),
            skipped_ticks = skipped.ticks,
            skipped_elapsed = skipped.elapsed,
            "Merging throttled pulses"
        );
        Some(Arc::new(merge_skipped(pulse, &skipped)))
    }

    /// Invoke the listener, containing errors and panics.
    pub fn deliver(&self, pulse: &Pulse) -> Delivery {
        match catch_unwind(AssertUnwindSafe(|| self.listener.on_pulse(pulse))) {
            Ok(Ok(())) => Delivery::Delivered,
            Ok(Err(err)) => {
                error!(
                    listener = self.name(),
                    listener_id = %self.id,
                    pulse_id = pulse.id(),
                    error = %err,
                    "Listener failed to handle pulse"
                );
                Delivery::Failed
            }
            Err(payload) => {
                error!(
                    listener = self.name(),
                    listener_id = %self.id,
                    pulse_id = pulse.id(),
                    panic = panic_message(payload.as_ref()),
                    "Listener panicked while handling pulse"
                );
                Delivery::Failed
            }
        }
    }

    /// Forward a pause transition, bypassing the throttle.
    pub fn notify_pause(&self, is_paused: bool, show_ui: bool) {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.listener.on_pause_change(is_paused, show_ui);
        }));
        if let Err(payload) = outcome {
            error!(
                listener = self.name(),
                listener_id = %self.id,
                is_paused,
                panic = panic_message(payload.as_ref()),
                "Listener panicked on pause change"
            );
        }
    }

    /// Time currently withheld from this listener.
    pub fn pending_skipped(&self) -> SkippedTime {
        self.throttle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .skipped
    }
}

impl core::fmt::Debug for ListenerTask {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ListenerTask")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("min_duration", &self.min_duration)
            .finish_non_exhaustive()
    }
}

/// Best-effort text of a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
