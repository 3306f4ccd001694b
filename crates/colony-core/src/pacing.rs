//! Pacing: converting wall-clock time into simulated pulse widths.
//!
//! The [`Pacer`] is pure arithmetic over the clock configuration. It
//! answers two questions for the driver loop:
//!
//! 1. **How far does this tick advance?** [`Pacer::add_time`] turns the
//!    real time since the previous tick into millisols at the desired
//!    ratio, clamps the result into `[min_pulse, max_pulse]`, and flags
//!    host stalls that must not become simulated time.
//! 2. **How long until the next tick?** [`Pacer::sleep_ms`] is a
//!    proportional controller aiming for pulses of `opt_pulse` width,
//!    net of the time the last tick spent executing.
//!
//! [`TickRateTracker`] keeps a short ring buffer of tick instants to
//! report the achieved ticks per second.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use colony_types::{MILLISECONDS_PER_MILLISOL, SECONDS_PER_MILLISOL};
use tracing::{debug, warn};

use crate::config::ClockConfig;

/// Which bound a clamped pulse was pinned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clamp {
    /// The computed width was below `min_pulse` and was raised to it.
    Floor,
    /// The computed width was above `max_pulse` and was capped.
    Ceiling,
}

/// Outcome of feeding one wall-clock interval to the pacer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickDecision {
    /// Advance the clocks by `elapsed` millisols.
    Accepted {
        /// Pulse width in millisols, already clamped.
        elapsed: f64,
        /// Achieved simulated/real ratio for this tick. Diagnostic only.
        actual_ratio: f64,
        /// Set when the raw width fell outside the configured bounds.
        clamp: Option<Clamp>,
    },
    /// The gap exceeded the stall threshold; reset the reference point.
    Stalled,
    /// Nothing to advance (zero real time elapsed).
    Rejected,
}

/// Pulse-width and sleep calculations for the driver loop.
#[derive(Debug, Clone, PartialEq)]
pub struct Pacer {
    min_pulse: f64,
    max_pulse: f64,
    opt_pulse: f64,
    stall_threshold: Duration,
    max_wait_ms: u64,
}

impl Pacer {
    /// Build a pacer from an already validated configuration.
    pub const fn new(config: &ClockConfig) -> Self {
        Self {
            min_pulse: config.min_pulse,
            max_pulse: config.max_pulse,
            opt_pulse: config.opt_pulse,
            stall_threshold: Duration::from_millis(config.stall_threshold_ms),
            max_wait_ms: config.max_wait_ms,
        }
    }

    /// Lower pulse bound in millisols.
    pub const fn min_pulse(&self) -> f64 {
        self.min_pulse
    }

    /// Upper pulse bound in millisols.
    pub const fn max_pulse(&self) -> f64 {
        self.max_pulse
    }

    /// Decide how far the clocks advance for `real_elapsed` of wall time.
    pub fn add_time(&self, real_elapsed: Duration, desired_ratio: u32) -> TickDecision {
        if real_elapsed > self.stall_threshold {
            warn!(
                real_elapsed_ms = real_elapsed.as_millis(),
                threshold_ms = self.stall_threshold.as_millis(),
                "Wall-clock stall detected; discarding gap"
            );
            return TickDecision::Stalled;
        }

        let real_ms = real_elapsed.as_secs_f64() * 1000.0;
        let raw = real_ms * f64::from(desired_ratio) / MILLISECONDS_PER_MILLISOL;
        if raw.is_nan() || raw <= 0.0 {
            return TickDecision::Rejected;
        }

        let (elapsed, clamp) = if raw < self.min_pulse {
            (self.min_pulse, Some(Clamp::Floor))
        } else if raw > self.max_pulse {
            (self.max_pulse, Some(Clamp::Ceiling))
        } else {
            (raw, None)
        };
        if let Some(bound) = clamp {
            debug!(raw, elapsed, ?bound, "Pulse width clamped");
        }

        TickDecision::Accepted {
            elapsed,
            actual_ratio: elapsed * MILLISECONDS_PER_MILLISOL / real_ms,
            clamp,
        }
    }

    /// Target pulses per second for the given ratio, at least one.
    pub fn desired_pulses_per_second(&self, desired_ratio: u32) -> f64 {
        (f64::from(desired_ratio) / SECONDS_PER_MILLISOL / self.opt_pulse).max(1.0)
    }

    /// Milliseconds to sleep after a tick that took `execution_ms`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn sleep_ms(&self, desired_ratio: u32, execution_ms: u64) -> u64 {
        let period_ms = 1000.0 / self.desired_pulses_per_second(desired_ratio);
        // period_ms is in (0, 1000], so the cast cannot truncate.
        let sleep = (period_ms.round() as u64).saturating_sub(execution_ms);
        if sleep > self.stall_threshold_ms() {
            self.max_wait_ms
        } else {
            sleep
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn stall_threshold_ms(&self) -> u64 {
        self.stall_threshold.as_millis() as u64
    }
}

/// Ring buffer of recent tick instants.
#[derive(Debug, Clone)]
pub struct TickRateTracker {
    stamps: VecDeque<Instant>,
    capacity: usize,
}

impl TickRateTracker {
    /// Create a tracker remembering the last `capacity` ticks.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            stamps: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a tick at `now`, evicting the oldest when full.
    pub fn record(&mut self, now: Instant) {
        if self.stamps.len() >= self.capacity {
            self.stamps.pop_front();
        }
        self.stamps.push_back(now);
    }

    /// Forget all samples (after a pause or stall).
    pub fn reset(&mut self) {
        self.stamps.clear();
    }

    /// Achieved ticks per second over the buffered window, 0 if unknown.
    #[allow(clippy::cast_precision_loss)]
    pub fn ticks_per_second(&self) -> f64 {
        let (Some(first), Some(last)) = (self.stamps.front(), self.stamps.back()) else {
            return 0.0;
        };
        let span = last.saturating_duration_since(*first).as_secs_f64();
        if span <= 0.0 {
            return 0.0;
        }
        self.stamps.len().saturating_sub(1) as f64 / span
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::panic,
    clippy::float_cmp,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
mod tests {
    use super::*;

    fn pacer() -> Pacer {
        Pacer::new(&ClockConfig {
            min_pulse: 0.01,
            max_pulse: 10.0,
            opt_pulse: 0.05,
            stall_threshold_ms: 30_000,
            max_wait_ms: 1_000,
            ..ClockConfig::default()
        })
    }

    #[test]
    fn converts_real_time_at_ratio() {
        // 16 ms at ratio 100 is 1.6 simulated seconds = 0.018 millisols.
        let decision = pacer().add_time(Duration::from_millis(16), 100);
        let TickDecision::Accepted {
            elapsed,
            actual_ratio,
            clamp,
        } = decision
        else {
            panic!("expected acceptance, got {decision:?}");
        };
        assert!((elapsed - 1600.0 / MILLISECONDS_PER_MILLISOL).abs() < 1e-12);
        assert!((actual_ratio - 100.0).abs() < 1e-9);
        assert_eq!(clamp, None);
    }

    #[test]
    fn clamps_low_and_high() {
        let low = pacer().add_time(Duration::from_millis(1), 1);
        assert!(matches!(
            low,
            TickDecision::Accepted { elapsed, clamp: Some(Clamp::Floor), .. } if elapsed == 0.01
        ));

        let high = pacer().add_time(Duration::from_secs(20), 16_384);
        assert!(matches!(
            high,
            TickDecision::Accepted { elapsed, clamp: Some(Clamp::Ceiling), .. } if elapsed == 10.0
        ));
    }

    #[test]
    fn stall_produces_no_advance() {
        let decision = pacer().add_time(Duration::from_secs(300), 100);
        assert_eq!(decision, TickDecision::Stalled);
    }

    #[test]
    fn zero_elapsed_is_rejected() {
        assert_eq!(pacer().add_time(Duration::ZERO, 100), TickDecision::Rejected);
    }

    #[test]
    fn sleep_tracks_desired_rate() {
        let p = pacer();
        // Ratio 1: 0.011 millisols/s / 0.05 < 1, so one pulse per second.
        assert_eq!(p.desired_pulses_per_second(1), 1.0);
        assert_eq!(p.sleep_ms(1, 0), 1000);
        assert_eq!(p.sleep_ms(1, 250), 750);
        assert_eq!(p.sleep_ms(1, 5_000), 0);

        // Ratio 256: 2.88 millisols/s / 0.05 = ~57.7 pulses/s.
        let pps = p.desired_pulses_per_second(256);
        assert!((pps - 256.0 / SECONDS_PER_MILLISOL / 0.05).abs() < 1e-9);
        assert_eq!(p.sleep_ms(256, 0), (1000.0 / pps).round() as u64);
    }

    #[test]
    fn oversized_sleep_is_clipped_to_max_wait() {
        let p = Pacer::new(&ClockConfig {
            stall_threshold_ms: 500,
            max_wait_ms: 200,
            ..ClockConfig::default()
        });
        assert_eq!(p.sleep_ms(1, 0), 200);
    }

    #[test]
    fn tick_rate_from_ring_buffer() {
        let mut tracker = TickRateTracker::new(3);
        assert_eq!(tracker.ticks_per_second(), 0.0);
        let t0 = Instant::now();
        for i in 0..5 {
            tracker.record(t0 + Duration::from_millis(100 * i));
        }
        // Window holds ticks at 200, 300, 400 ms: two intervals in 0.2 s.
        assert!((tracker.ticks_per_second() - 10.0).abs() < 1e-9);
        tracker.reset();
        assert_eq!(tracker.ticks_per_second(), 0.0);
    }
}
