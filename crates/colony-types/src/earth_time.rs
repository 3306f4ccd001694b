//! Earth calendar mapping of simulated time.
//!
//! [`EarthTime`] advances in lock-step with [`MarsTime`](crate::MarsTime):
//! every millisol added to the Mars clock adds
//! [`MILLISECONDS_PER_MILLISOL`] real milliseconds here.

use core::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TimeError;
use crate::mars_time::MILLISECONDS_PER_MILLISOL;

/// An Earth UTC instant on the simulated timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EarthTime(DateTime<Utc>);

impl EarthTime {
    /// Wrap a UTC instant.
    pub const fn new(instant: DateTime<Utc>) -> Self {
        Self(instant)
    }

    /// Return the wrapped UTC instant.
    pub const fn instant(&self) -> DateTime<Utc> {
        self.0
    }

    /// Return a new value advanced by `amount` millisols of Earth time.
    ///
    /// Precision is one microsecond.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::InvalidElapsed`] for negative or non-finite
    /// amounts, or [`TimeError::Overflow`] past chrono's range.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn add_millisols(&self, amount: f64) -> Result<Self, TimeError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(TimeError::InvalidElapsed { amount });
        }
        let micros = (amount * MILLISECONDS_PER_MILLISOL * 1000.0).round();
        if micros >= i64::MAX as f64 {
            return Err(TimeError::Overflow);
        }
        let delta = TimeDelta::microseconds(micros as i64);
        self.0
            .checked_add_signed(delta)
            .map(Self)
            .ok_or(TimeError::Overflow)
    }

    /// Duration from `earlier` to `self`.
    pub fn duration_since(&self, earlier: &Self) -> TimeDelta {
        self.0.signed_duration_since(earlier.0)
    }
}

impl From<DateTime<Utc>> for EarthTime {
    fn from(instant: DateTime<Utc>) -> Self {
        Self(instant)
    }
}

impl fmt::Display for EarthTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S%.3f UTC"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn start() -> EarthTime {
        EarthTime::new(Utc.with_ymd_and_hms(2043, 9, 30, 0, 0, 0).unwrap())
    }

    #[test]
    fn one_sol_is_about_24h_40m() {
        let next = start().add_millisols(1000.0).unwrap();
        let delta = next.duration_since(&start());
        assert_eq!(delta.num_seconds(), 88_775);
        assert_eq!(delta.num_milliseconds(), 88_775_244);
    }

    #[test]
    fn rejects_rewind() {
        assert!(start().add_millisols(-0.1).is_err());
        assert!(start().add_millisols(f64::NAN).is_err());
    }

    #[test]
    fn display_is_utc() {
        assert_eq!(start().to_string(), "2043-09-30 00:00:00.000 UTC");
    }

    #[test]
    fn serde_is_rfc3339() {
        let json = serde_json::to_string(&start()).unwrap();
        assert_eq!(json, "\"2043-09-30T00:00:00Z\"");
        let back: EarthTime = serde_json::from_str(&json).unwrap();
        assert_eq!(back, start());
    }
}
