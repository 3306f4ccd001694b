//! Martian calendar time, the "scientific" clock of the simulation.
//!
//! A [`MarsTime`] is an immutable position on a Darian-style calendar:
//! orbit, month, sol of month, and a fractional millisol within the sol.
//! All scheduling and business logic runs on this clock; its companion
//! [`EarthTime`](crate::EarthTime) exists for display and wall-calendar
//! duration math.
//!
//! # Calendar rules
//!
//! - 24 months per orbit, 28 sols per month, except months 6, 12 and 18
//!   (27 sols) and month 24 (27 sols, or 28 in a leap orbit).
//! - A leap orbit is any odd orbit, or any orbit divisible by 10.
//! - A standard orbit therefore has 668 sols and a leap orbit 669.
//!
//! Values only move forward: [`MarsTime::add_millisols`] rejects negative
//! or non-finite amounts.

use core::cmp::Ordering;
use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TimeError;

/// Number of millisols in one sol.
pub const MILLISOLS_PER_SOL: f64 = 1000.0;

/// Real seconds in one millisol (the simulated unit).
pub const SECONDS_PER_MILLISOL: f64 = 88.775_244;

/// Real milliseconds in one millisol.
pub const MILLISECONDS_PER_MILLISOL: f64 = 88_775.244;

/// Number of months in one orbit.
pub const MONTHS_PER_ORBIT: u8 = 24;

/// Sols in a standard (non-leap) orbit.
pub const SOLS_PER_ORBIT: u64 = 668;

/// Darian month names, indexed by `month - 1`.
const MONTH_NAMES: [&str; 24] = [
    "Sagittarius",
    "Dhanus",
    "Capricornus",
    "Makara",
    "Aquarius",
    "Kumbha",
    "Pisces",
    "Mina",
    "Aries",
    "Mesha",
    "Taurus",
    "Rishabha",
    "Gemini",
    "Mithuna",
    "Cancer",
    "Karka",
    "Leo",
    "Simha",
    "Virgo",
    "Kanya",
    "Libra",
    "Tula",
    "Scorpius",
    "Vrishika",
];

/// Serde shape for [`MarsTime`]; validated on the way in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RawMarsTime {
    orbit: u32,
    month: u8,
    sol: u8,
    #[serde(default)]
    millisol: f64,
}

/// An absolute position on the Martian calendar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMarsTime", into = "RawMarsTime")]
pub struct MarsTime {
    orbit: u32,
    month: u8,
    sol: u8,
    millisol: f64,
}

impl MarsTime {
    /// Create a validated calendar value.
    ///
    /// `month` is 1-based (1..=24), `sol` is 1-based within the month, and
    /// `millisol` must lie in `[0, 1000)`.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::InvalidField`] if any field is out of range.
    pub fn new(orbit: u32, month: u8, sol: u8, millisol: f64) -> Result<Self, TimeError> {
        if month == 0 || month > MONTHS_PER_ORBIT {
            return Err(TimeError::InvalidField {
                field: "month",
                value: month.to_string(),
            });
        }
        if sol == 0 || sol > sols_in_month(orbit, month) {
            return Err(TimeError::InvalidField {
                field: "sol",
                value: sol.to_string(),
            });
        }
        if !millisol.is_finite() || !(0.0..MILLISOLS_PER_SOL).contains(&millisol) {
            return Err(TimeError::InvalidField {
                field: "millisol",
                value: millisol.to_string(),
            });
        }
        Ok(Self {
            orbit,
            month,
            sol,
            millisol,
        })
    }

    /// Return the orbit (Martian year) number.
    pub const fn orbit(&self) -> u32 {
        self.orbit
    }

    /// Return the 1-based month within the orbit.
    pub const fn month(&self) -> u8 {
        self.month
    }

    /// Return the 1-based sol within the month.
    pub const fn sol_of_month(&self) -> u8 {
        self.sol
    }

    /// Return the fractional millisol within the current sol.
    pub const fn millisol(&self) -> f64 {
        self.millisol
    }

    /// Return the whole millisol within the current sol (0..=999).
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn millisol_int(&self) -> u32 {
        // millisol is validated to [0, 1000), so the floor fits in u32.
        self.millisol.floor() as u32
    }

    /// Return the Darian name of the current month.
    pub fn month_name(&self) -> &'static str {
        MONTH_NAMES
            .get(usize::from(self.month.saturating_sub(1)))
            .copied()
            .unwrap_or("Unknown")
    }

    /// Whether this value falls in a leap orbit.
    pub const fn is_leap_orbit(&self) -> bool {
        is_leap_orbit(self.orbit)
    }

    /// Return the 1-based sol within the orbit.
    pub fn sol_of_orbit(&self) -> u64 {
        sols_before_month(self.orbit, self.month).saturating_add(u64::from(self.sol))
    }

    /// Whole sols elapsed since orbit 0, month 1, sol 1.
    pub fn sols_since_epoch(&self) -> u64 {
        sols_before_orbit(self.orbit)
            .saturating_add(sols_before_month(self.orbit, self.month))
            .saturating_add(u64::from(self.sol.saturating_sub(1)))
    }

    /// Absolute position in millisols since the calendar epoch.
    ///
    /// Used for ordering and duration arithmetic.
    #[allow(clippy::cast_precision_loss)]
    pub fn total_millisols(&self) -> f64 {
        (self.sols_since_epoch() as f64).mul_add(MILLISOLS_PER_SOL, self.millisol)
    }

    /// Millisols from `earlier` to `self` (negative if `earlier` is later).
    pub fn millisols_since(&self, earlier: &Self) -> f64 {
        self.total_millisols() - earlier.total_millisols()
    }

    /// Return a new value advanced by `amount` millisols.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::InvalidElapsed`] for negative or non-finite
    /// amounts, or [`TimeError::Overflow`] if the orbit counter would
    /// exceed `u32::MAX`.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn add_millisols(&self, amount: f64) -> Result<Self, TimeError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(TimeError::InvalidElapsed { amount });
        }

        let total = self.millisol + amount;
        let whole_sols = (total / MILLISOLS_PER_SOL).floor();
        if whole_sols >= u64::MAX as f64 {
            return Err(TimeError::Overflow);
        }
        let sols = whole_sols as u64;
        let millisol = whole_sols.mul_add(-MILLISOLS_PER_SOL, total);
        // Rounding can leave the remainder at exactly 1000.
        if millisol >= MILLISOLS_PER_SOL {
            return self.add_sols(sols.saturating_add(1), 0.0);
        }
        self.add_sols(sols, millisol.max(0.0))
    }

    /// Advance by whole sols, landing on the given millisol.
    fn add_sols(&self, sols: u64, millisol: f64) -> Result<Self, TimeError> {
        let mut orbit = self.orbit;
        let mut month = self.month;
        let mut sol = self.sol;
        let mut left = sols;

        while left > 0 {
            let len = sols_in_month(orbit, month);
            // Sols needed to reach sol 1 of the next month.
            let to_next_month = u64::from(len.saturating_sub(sol)).saturating_add(1);
            if left < to_next_month {
                let step = u8::try_from(left).map_err(|_err| TimeError::Overflow)?;
                sol = sol.checked_add(step).ok_or(TimeError::Overflow)?;
                left = 0;
            } else {
                left = left.saturating_sub(to_next_month);
                sol = 1;
                if month >= MONTHS_PER_ORBIT {
                    month = 1;
                    orbit = orbit.checked_add(1).ok_or(TimeError::Overflow)?;
                } else {
                    month = month.saturating_add(1);
                }
            }
        }

        Ok(Self {
            orbit,
            month,
            sol,
            millisol,
        })
    }

    /// Whether `self` and `other` fall on the same sol.
    pub const fn same_sol(&self, other: &Self) -> bool {
        self.orbit == other.orbit && self.month == other.month && self.sol == other.sol
    }
}

impl Default for MarsTime {
    /// Orbit 0, month 1, sol 1, millisol 0.
    fn default() -> Self {
        Self {
            orbit: 0,
            month: 1,
            sol: 1,
            millisol: 0.0,
        }
    }
}

impl PartialOrd for MarsTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        (self.orbit, self.month, self.sol)
            .cmp(&(other.orbit, other.month, other.sol))
            .then_with(|| {
                self.millisol
                    .partial_cmp(&other.millisol)
                    .unwrap_or(Ordering::Equal)
            })
            .into()
    }
}

impl fmt::Display for MarsTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}-{:02}-{:02}:{:07.3}",
            self.orbit, self.month, self.sol, self.millisol
        )
    }
}

impl TryFrom<RawMarsTime> for MarsTime {
    type Error = TimeError;

    fn try_from(raw: RawMarsTime) -> Result<Self, Self::Error> {
        Self::new(raw.orbit, raw.month, raw.sol, raw.millisol)
    }
}

impl From<MarsTime> for RawMarsTime {
    fn from(time: MarsTime) -> Self {
        Self {
            orbit: time.orbit,
            month: time.month,
            sol: time.sol,
            millisol: time.millisol,
        }
    }
}

/// Whether `orbit` is a leap orbit (669 sols).
pub const fn is_leap_orbit(orbit: u32) -> bool {
    orbit % 2 == 1 || orbit % 10 == 0
}

/// Number of sols in `month` of `orbit`.
pub const fn sols_in_month(orbit: u32, month: u8) -> u8 {
    match month {
        6 | 12 | 18 => 27,
        24 if is_leap_orbit(orbit) => 28,
        24 => 27,
        _ => 28,
    }
}

/// Number of sols in `orbit`.
pub const fn sols_in_orbit(orbit: u32) -> u64 {
    if is_leap_orbit(orbit) {
        SOLS_PER_ORBIT + 1
    } else {
        SOLS_PER_ORBIT
    }
}

/// Sols in all orbits before `orbit`.
fn sols_before_orbit(orbit: u32) -> u64 {
    let n = u64::from(orbit);
    // Leap orbits in [0, n): the odd ones plus the (even) multiples of 10.
    let odd = n / 2;
    let tens = n.saturating_add(9) / 10;
    n.saturating_mul(SOLS_PER_ORBIT)
        .saturating_add(odd)
        .saturating_add(tens)
}

/// Sols in the months of `orbit` before `month`.
fn sols_before_month(orbit: u32, month: u8) -> u64 {
    (1..month)
        .map(|m| u64::from(sols_in_month(orbit, m)))
        .sum()
}
