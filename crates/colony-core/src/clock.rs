//! The simulated clocks owned by the master clock's driver.
//!
//! A [`Timeline`] holds the Mars and Earth clocks side by side together
//! with the pulse sequence counter. It is the only place simulated time is
//! mutated; every advance produces exactly one [`Pulse`] snapshot.
//!
//! # Design Principles
//!
//! - Both clocks move by the same elapsed amount in one step, or neither
//!   moves (the new values are computed before either is committed).
//! - Pulse ids start at 1 and are never reused; overflow is an error, not
//!   a wrap.
//! - The timeline is plain owned data. Whoever drives ticks owns it, so no
//!   locking is needed around the clock values.

use colony_types::{EarthTime, MarsTime, Pulse, TimeError};

/// Mars and Earth clocks advanced in lock-step, plus the pulse counter.
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    /// Scientific clock.
    mars: MarsTime,
    /// Earth mapping of the same instant.
    earth: EarthTime,
    /// Mars clock value when the timeline was created.
    origin: MarsTime,
    /// Id the next pulse will carry.
    next_pulse_id: u64,
    /// Sols since start, 1-based.
    mission_sol: u32,
}

impl Timeline {
    /// Create a timeline starting at the given clock values.
    pub const fn new(mars: MarsTime, earth: EarthTime) -> Self {
        Self {
            mars,
            earth,
            origin: mars,
            next_pulse_id: 1,
            mission_sol: 1,
        }
    }

    /// Advance both clocks by `elapsed` millisols and emit the pulse.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::InvalidElapsed`] for non-positive or
    /// non-finite widths, or [`TimeError::Overflow`] if a clock or the
    /// pulse counter would overflow. On error nothing is committed.
    pub fn advance(&mut self, elapsed: f64) -> Result<Pulse, TimeError> {
        if !elapsed.is_finite() || elapsed <= 0.0 {
            return Err(TimeError::InvalidElapsed { amount: elapsed });
        }
        let mars = self.mars.add_millisols(elapsed)?;
        let earth = self.earth.add_millisols(elapsed)?;
        let id = self.next_pulse_id;
        let next_pulse_id = id.checked_add(1).ok_or(TimeError::Overflow)?;

        let is_new_sol = !mars.same_sol(&self.mars);
        let is_new_millisol = is_new_sol || mars.millisol_int() != self.mars.millisol_int();
        let mission_sol = if is_new_sol {
            let crossed = mars
                .sols_since_epoch()
                .saturating_sub(self.mars.sols_since_epoch());
            let crossed = u32::try_from(crossed).map_err(|_err| TimeError::Overflow)?;
            self.mission_sol
                .checked_add(crossed)
                .ok_or(TimeError::Overflow)?
        } else {
            self.mission_sol
        };

        self.mars = mars;
        self.earth = earth;
        self.next_pulse_id = next_pulse_id;
        self.mission_sol = mission_sol;

        Ok(Pulse::new(
            id,
            elapsed,
            mars,
            earth,
            mission_sol,
            is_new_sol,
            is_new_millisol,
        ))
    }

    /// Current Mars clock value.
    pub const fn mars_time(&self) -> &MarsTime {
        &self.mars
    }

    /// Current Earth clock value.
    pub const fn earth_time(&self) -> &EarthTime {
        &self.earth
    }

    /// Id the next pulse will carry.
    pub const fn next_pulse_id(&self) -> u64 {
        self.next_pulse_id
    }

    /// Id of the most recent pulse, or 0 before the first tick.
    pub const fn last_pulse_id(&self) -> u64 {
        self.next_pulse_id.saturating_sub(1)
    }

    /// Sols since start, 1-based.
    pub const fn mission_sol(&self) -> u32 {
        self.mission_sol
    }

    /// Millisols simulated since the timeline was created.
    pub fn millisols_simulated(&self) -> f64 {
        self.mars.millisols_since(&self.origin)
    }
}
