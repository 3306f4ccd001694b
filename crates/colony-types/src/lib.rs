//! Shared value types for the colony master clock.
//!
//! This crate holds the pure data that flows out of the scheduler: the two
//! simulated clocks and the pulse that bundles their snapshots. Nothing
//! here touches threads or wall-clock time.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers (listener handles)
//! - [`mars_time`] -- Darian calendar value, the scientific clock
//! - [`earth_time`] -- Earth UTC mapping advanced in lock-step
//! - [`pulse`] -- The immutable per-tick event
//! - [`error`] -- Calendar arithmetic errors

pub mod earth_time;
pub mod error;
pub mod ids;
pub mod mars_time;
pub mod pulse;

// Re-export all public types at crate root for convenience.
pub use earth_time::EarthTime;
pub use error::TimeError;
pub use ids::ListenerId;
pub use mars_time::{
    MILLISECONDS_PER_MILLISOL, MILLISOLS_PER_SOL, MarsTime, SECONDS_PER_MILLISOL,
};
pub use pulse::Pulse;
