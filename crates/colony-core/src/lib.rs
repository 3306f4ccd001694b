//! Master clock for the colony simulation.
//!
//! This crate owns the time-pulse scheduler: the single source of
//! simulated time that every other subsystem subscribes to. Wall-clock
//! time is converted into pulses of simulated millisols, the Mars and
//! Earth clocks advance in lock-step, and each pulse is fanned out to the
//! registered listeners on a supervised worker pool.
//!
//! # Modules
//!
//! - [`clock`] -- [`Timeline`]: the Mars/Earth clock pair and pulse counter.
//! - [`config`] -- Configuration loading from `colony-config.yaml` into
//!   strongly-typed structs.
//! - [`listener`] -- [`ClockListener`] trait, per-listener throttling and
//!   skipped-time merging.
//! - [`master_clock`] -- [`MasterClock`]: driver thread, pause/resume,
//!   speed control, exit, diagnostics.
//! - [`pacing`] -- Pulse-width clamping, stall detection, adaptive sleep.
//! - [`pool`] -- Self-healing worker pool with a per-tick barrier.
//! - [`registry`] -- Thread-safe listener registration.
//!
//! [`Timeline`]: clock::Timeline
//! [`ClockListener`]: listener::ClockListener
//! [`MasterClock`]: master_clock::MasterClock

pub mod clock;
pub mod config;
pub mod listener;
pub mod master_clock;
pub mod pacing;
pub mod pool;
pub mod registry;
