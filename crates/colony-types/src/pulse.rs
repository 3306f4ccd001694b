//! The clock pulse delivered to every listener once per tick.
//!
//! A [`Pulse`] is immutable once built. The master clock wraps each one in
//! an `Arc` and hands the same value to every listener of a tick, so reads
//! need no synchronization.

use serde::{Deserialize, Serialize};

use crate::earth_time::EarthTime;
use crate::mars_time::MarsTime;

/// One discrete advance of simulated time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pulse {
    /// Monotonic sequence number, starting at 1.
    id: u64,
    /// Simulated millisols covered by this pulse.
    elapsed: f64,
    /// Mars clock after applying `elapsed`.
    mars_time: MarsTime,
    /// Earth clock after applying `elapsed`.
    earth_time: EarthTime,
    /// Sols since the clock started, 1-based.
    mission_sol: u32,
    /// Whether this pulse crossed into a new sol.
    is_new_sol: bool,
    /// Whether this pulse crossed a whole-millisol boundary.
    is_new_millisol: bool,
}

impl Pulse {
    /// Assemble a pulse. Called by the master clock's timeline.
    pub const fn new(
        id: u64,
        elapsed: f64,
        mars_time: MarsTime,
        earth_time: EarthTime,
        mission_sol: u32,
        is_new_sol: bool,
        is_new_millisol: bool,
    ) -> Self {
        Self {
            id,
            elapsed,
            mars_time,
            earth_time,
            mission_sol,
            is_new_sol,
            is_new_millisol,
        }
    }

    /// Sequence number of the tick that produced this pulse.
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Simulated millisols this pulse represents.
    pub const fn elapsed(&self) -> f64 {
        self.elapsed
    }

    /// Mars clock snapshot.
    pub const fn mars_time(&self) -> &MarsTime {
        &self.mars_time
    }

    /// Earth clock snapshot.
    pub const fn earth_time(&self) -> &EarthTime {
        &self.earth_time
    }

    /// Sols since the clock started, 1-based.
    pub const fn mission_sol(&self) -> u32 {
        self.mission_sol
    }

    /// Whether this pulse crossed into a new sol.
    pub const fn is_new_sol(&self) -> bool {
        self.is_new_sol
    }

    /// Whether this pulse crossed a whole-millisol boundary.
    pub const fn is_new_millisol(&self) -> bool {
        self.is_new_millisol
    }

    /// Derive a pulse carrying additional elapsed time and boundary flags.
    ///
    /// The id and clock snapshots are kept; `extra` millisols are added to
    /// `elapsed` and the flags are OR-ed in.
    #[must_use]
    pub fn with_carry(&self, extra: f64, new_sol: bool, new_millisol: bool) -> Self {
        Self {
            elapsed: self.elapsed + extra,
            is_new_sol: self.is_new_sol || new_sol,
            is_new_millisol: self.is_new_millisol || new_millisol,
            ..self.clone()
        }
    }
}
