//! Integration tests for the master clock.
//!
//! Deterministic scenarios drive ticks by hand through
//! [`MasterClock::step`]; the rest run the real driver thread for a few
//! hundred milliseconds and check ordering properties that hold
//! regardless of scheduling jitter.

// Integration tests use unwrap extensively for clarity -- panicking on
// failure is the correct behavior in test code.
#![allow(
    clippy::unwrap_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::arithmetic_side_effects,
    clippy::missing_panics_doc
)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::sleep;
use std::time::Duration;

use colony_core::config::ClockConfig;
use colony_core::listener::{ClockListener, ListenerError};
use colony_core::master_clock::{ClockError, ClockState, MasterClock, TickOutcome};
use colony_types::{MILLISECONDS_PER_MILLISOL, MarsTime, Pulse};

fn config(ratio: u32) -> ClockConfig {
    ClockConfig {
        min_pulse: 0.01,
        max_pulse: 10.0,
        opt_pulse: 0.05,
        base_tick_ms: 10,
        initial_time_ratio: ratio,
        reserved_cores: 0,
        stall_threshold_ms: 30_000,
        max_wait_ms: 1_000,
        ..ClockConfig::default()
    }
}

/// Keeps every pulse and pause notification it receives.
#[derive(Default)]
struct Recorder {
    delay: Duration,
    pulses: Mutex<Vec<Pulse>>,
    pauses: Mutex<Vec<(bool, bool)>>,
}

impl Recorder {
    fn with_delay(delay_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            delay: Duration::from_millis(delay_ms),
            ..Self::default()
        })
    }

    fn ids(&self) -> Vec<u64> {
        self.pulses.lock().unwrap().iter().map(Pulse::id).collect()
    }

    fn total_elapsed(&self) -> f64 {
        self.pulses.lock().unwrap().iter().map(Pulse::elapsed).sum()
    }

    fn count(&self) -> usize {
        self.pulses.lock().unwrap().len()
    }
}

impl ClockListener for Recorder {
    fn on_pulse(&self, pulse: &Pulse) -> Result<(), ListenerError> {
        if !self.delay.is_zero() {
            sleep(self.delay);
        }
        self.pulses.lock().unwrap().push(pulse.clone());
        Ok(())
    }

    fn on_pause_change(&self, is_paused: bool, show_ui: bool) {
        self.pauses.lock().unwrap().push((is_paused, show_ui));
    }

    fn name(&self) -> &str {
        "recorder"
    }
}

fn register(clock: &MasterClock, listener: &Arc<Recorder>, min_duration_ms: u64) -> colony_types::ListenerId {
    clock.add_listener(Arc::clone(listener) as Arc<dyn ClockListener>, min_duration_ms)
}

fn assert_contiguous(ids: &[u64], first: u64) {
    for (offset, id) in ids.iter().enumerate() {
        assert_eq!(*id, first + offset as u64, "gap in pulse ids: {ids:?}");
    }
}

// ---------------------------------------------------------------------------
// Stepped scenarios
// ---------------------------------------------------------------------------

#[test]
fn stepped_pulses_have_gap_free_ids() {
    let clock = MasterClock::new(&config(100)).unwrap();
    let recorder = Recorder::with_delay(0);
    register(&clock, &recorder, 0);

    for _ in 0..100 {
        clock.step(Duration::from_millis(16)).unwrap();
    }

    let ids = recorder.ids();
    assert_eq!(ids.len(), 100);
    assert_contiguous(&ids, 1);
    assert_eq!(clock.last_pulse().unwrap().id(), 100);
}

#[test]
fn ratio_100_at_16ms_moves_both_clocks_by_the_same_amount() {
    let cfg = config(100);
    let clock = MasterClock::new(&cfg).unwrap();

    let mut widths = Vec::new();
    for _ in 0..100 {
        match clock.step(Duration::from_millis(16)).unwrap() {
            TickOutcome::Pulsed { pulse, .. } => widths.push(pulse.elapsed()),
            other => panic!("expected a pulse, got {other:?}"),
        }
    }

    let expected_width = 16.0 * 100.0 / MILLISECONDS_PER_MILLISOL;
    for width in &widths {
        assert!((width - expected_width).abs() < 1e-12);
    }
    let total: f64 = widths.iter().sum();

    let mars = clock.mars_time();
    assert!((mars.millisols_since(&cfg.start_mars_time) - total).abs() < 1e-6);

    // 100 ticks x 16 ms x ratio 100 = 160 simulated seconds.
    let earth_ms = clock
        .earth_time()
        .duration_since(&cfg.start_earth_time)
        .num_milliseconds();
    assert!((earth_ms - 160_000).abs() <= 1, "earth advanced {earth_ms} ms");
}

#[test]
fn pulse_widths_stay_within_bounds() {
    let clock = MasterClock::new(&config(100)).unwrap();
    let gaps_ms = [1, 5, 16, 250, 4_000, 12_000, 29_999];

    for gap in gaps_ms {
        let TickOutcome::Pulsed { pulse, .. } = clock.step(Duration::from_millis(gap)).unwrap() else {
            panic!("gap of {gap} ms produced no pulse");
        };
        assert!(
            (0.01..=10.0).contains(&pulse.elapsed()),
            "width {} for gap {gap} ms",
            pulse.elapsed()
        );
    }
}

#[test]
fn host_stall_is_absorbed() {
    let clock = MasterClock::new(&config(100)).unwrap();
    let recorder = Recorder::with_delay(0);
    register(&clock, &recorder, 0);

    let outcome = clock.step(Duration::from_secs(300)).unwrap();
    assert!(matches!(outcome, TickOutcome::Stalled));
    assert!(clock.last_pulse().is_none());
    assert_eq!(recorder.count(), 0);

    let TickOutcome::Pulsed { pulse, .. } = clock.step(Duration::from_millis(16)).unwrap() else {
        panic!("expected a pulse after the stall");
    };
    assert_eq!(pulse.id(), 1);
    assert!((pulse.elapsed() - 1600.0 / MILLISECONDS_PER_MILLISOL).abs() < 1e-12);
}

#[test]
fn throttled_listener_receives_all_simulated_time() {
    let cfg = ClockConfig {
        start_mars_time: MarsTime::new(3, 1, 1, 999.7).unwrap(),
        ..config(100)
    };
    let clock = MasterClock::new(&cfg).unwrap();
    let every = Recorder::with_delay(0);
    let coarse = Recorder::with_delay(0);
    register(&clock, &every, 0);
    let coarse_id = register(&clock, &coarse, 40);

    let mut raw_total = 0.0;
    let mut throttled_ticks = 0;
    for _ in 0..60 {
        if let TickOutcome::Pulsed { pulse, report, .. } = clock.step(Duration::from_millis(16)).unwrap() {
            raw_total += pulse.elapsed();
            throttled_ticks += report.throttled;
        }
        sleep(Duration::from_millis(4));
    }

    assert_eq!(every.count(), 60);
    assert!(coarse.count() < 60);
    assert!(throttled_ticks > 0);

    let pending = clock.pending_skipped(coarse_id).unwrap();
    let delivered = coarse.total_elapsed();
    assert!((delivered + pending.elapsed - raw_total).abs() < 1e-9);
    assert!((every.total_elapsed() - raw_total).abs() < 1e-9);

    // The sol rolls over during the run; the coarse listener must learn of
    // it even if the crossing tick itself was suppressed.
    let coarse_saw_sol = coarse.pulses.lock().unwrap().iter().any(Pulse::is_new_sol);
    assert!(coarse_saw_sol || pending.new_sol);

    let ids = coarse.ids();
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn failing_listeners_do_not_block_others() {
    struct Refuses;
    impl ClockListener for Refuses {
        fn on_pulse(&self, _pulse: &Pulse) -> Result<(), ListenerError> {
            Err(ListenerError::new("not today"))
        }
    }

    struct Explodes;
    impl ClockListener for Explodes {
        fn on_pulse(&self, pulse: &Pulse) -> Result<(), ListenerError> {
            panic!("listener exploded on pulse {}", pulse.id());
        }
    }

    let clock = MasterClock::new(&config(100)).unwrap();
    let good = Recorder::with_delay(0);
    clock.add_listener(Arc::new(Refuses), 0);
    clock.add_listener(Arc::new(Explodes), 0);
    register(&clock, &good, 0);

    for expected in 1..=3 {
        let TickOutcome::Pulsed { report, .. } = clock.step(Duration::from_millis(16)).unwrap() else {
            panic!("expected a pulse");
        };
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(good.count(), expected);
    }
}

#[test]
fn removed_listener_stops_receiving() {
    let clock = MasterClock::new(&config(100)).unwrap();
    let recorder = Recorder::with_delay(0);
    let id = register(&clock, &recorder, 0);

    clock.step(Duration::from_millis(16)).unwrap();
    assert!(clock.remove_listener(id));
    assert!(!clock.remove_listener(id));
    clock.step(Duration::from_millis(16)).unwrap();

    assert_eq!(recorder.ids(), vec![1]);
    assert_eq!(clock.listener_count(), 0);
    assert!(clock.pending_skipped(id).is_none());
}

#[test]
fn diagnostics_serialize_to_json() {
    let clock = MasterClock::new(&config(100)).unwrap();
    clock.step(Duration::from_millis(16)).unwrap();

    let json = serde_json::to_value(clock.diagnostics()).unwrap();
    assert_eq!(json["state"], "Stopped");
    assert_eq!(json["desired_ratio"], 100);
    assert_eq!(json["last_pulse_id"], 1);
    assert_eq!(json["pool_rebuilds"], 0);
    assert!(json["mars_time"].is_object());
}

// ---------------------------------------------------------------------------
// Driver thread
// ---------------------------------------------------------------------------

#[test]
fn driver_produces_contiguous_pulses_across_restarts() {
    let clock = MasterClock::new(&config(256)).unwrap();
    let recorder = Recorder::with_delay(0);
    register(&clock, &recorder, 0);

    clock.start().unwrap();
    sleep(Duration::from_millis(150));
    clock.shutdown();
    let first_run = recorder.count();
    assert!(first_run > 0);
    assert_eq!(clock.state(), ClockState::Stopped);

    clock.start().unwrap();
    sleep(Duration::from_millis(150));
    clock.shutdown();

    let ids = recorder.ids();
    assert!(ids.len() > first_run);
    assert_contiguous(&ids, 1);

    for pulse in recorder.pulses.lock().unwrap().iter() {
        assert!((0.01..=10.0).contains(&pulse.elapsed()));
    }
}

#[test]
fn slow_listener_holds_back_the_next_tick() {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Phase {
        Begin,
        End,
    }

    struct Logged {
        delay: Duration,
        log: Arc<Mutex<Vec<(Phase, u64)>>>,
    }

    impl ClockListener for Logged {
        fn on_pulse(&self, pulse: &Pulse) -> Result<(), ListenerError> {
            self.log.lock().unwrap().push((Phase::Begin, pulse.id()));
            sleep(self.delay);
            self.log.lock().unwrap().push((Phase::End, pulse.id()));
            Ok(())
        }
    }

    let clock = MasterClock::new(&config(256)).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    for delay_ms in [25, 0] {
        clock.add_listener(
            Arc::new(Logged {
                delay: Duration::from_millis(delay_ms),
                log: Arc::clone(&log),
            }),
            0,
        );
    }

    clock.start().unwrap();
    sleep(Duration::from_millis(250));
    clock.shutdown();

    let log = log.lock().unwrap();
    let mut finished = std::collections::BTreeMap::<u64, usize>::new();
    let mut pulses = 0;
    for (phase, id) in log.iter() {
        match phase {
            Phase::Begin if *id > 1 => {
                assert_eq!(
                    finished.get(&(id - 1)).copied(),
                    Some(2),
                    "pulse {id} started before pulse {} finished everywhere",
                    id - 1
                );
                pulses += 1;
            }
            Phase::Begin => pulses += 1,
            Phase::End => *finished.entry(*id).or_default() += 1,
        }
    }
    assert!(pulses > 2);
}

#[test]
fn pause_discards_wall_time_and_notifies_once() {
    let clock = MasterClock::new(&config(256)).unwrap();
    let recorder = Recorder::with_delay(0);
    register(&clock, &recorder, 0);

    clock.start().unwrap();
    sleep(Duration::from_millis(150));

    clock.set_paused(true, true);
    clock.set_paused(true, true);
    assert_eq!(clock.state(), ClockState::Paused);
    sleep(Duration::from_millis(50));
    let before = recorder.count();
    sleep(Duration::from_millis(450));
    assert_eq!(recorder.count(), before, "pulses generated while paused");

    clock.set_paused(false, false);
    clock.set_paused(false, false);
    assert_eq!(clock.state(), ClockState::Running);
    sleep(Duration::from_millis(150));
    clock.shutdown();

    assert_eq!(
        *recorder.pauses.lock().unwrap(),
        vec![(true, true), (false, false)]
    );

    // 500 ms of pause at ratio 256 would be about 1.44 millisols; a normal
    // tick here is about 0.05.
    let pulses = recorder.pulses.lock().unwrap();
    assert!(pulses.len() > before);
    for pulse in pulses.iter() {
        assert!(pulse.elapsed() < 0.5, "pulse {} carried {}", pulse.id(), pulse.elapsed());
    }
}

#[test]
fn speed_change_applies_while_running() {
    let clock = MasterClock::new(&config(64)).unwrap();
    let recorder = Recorder::with_delay(0);
    register(&clock, &recorder, 0);

    clock.start().unwrap();
    assert_eq!(clock.increase_speed(), 128);
    assert_eq!(clock.set_desired_ratio(1024).unwrap(), 128);
    sleep(Duration::from_millis(150));
    clock.shutdown();

    assert_eq!(clock.desired_ratio(), 1024);
    assert!(recorder.count() > 0);
    assert!(matches!(
        clock.set_desired_ratio(0),
        Err(ClockError::InvalidRatio { ratio: 0, .. })
    ));
}

#[test]
fn listener_can_request_exit() {
    struct ExitAfter {
        clock: Mutex<Option<Arc<MasterClock>>>,
        after: u64,
        seen: AtomicU64,
    }

    impl ClockListener for ExitAfter {
        fn on_pulse(&self, pulse: &Pulse) -> Result<(), ListenerError> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            if pulse.id() >= self.after {
                if let Some(clock) = self.clock.lock().unwrap().take() {
                    clock.exit_program();
                }
            }
            Ok(())
        }
    }

    let clock = Arc::new(MasterClock::new(&config(256)).unwrap());
    let listener = Arc::new(ExitAfter {
        clock: Mutex::new(Some(Arc::clone(&clock))),
        after: 3,
        seen: AtomicU64::new(0),
    });
    clock.add_listener(Arc::clone(&listener) as Arc<dyn ClockListener>, 0);

    let mut state = clock.subscribe_state();
    clock.start().unwrap();
    for _ in 0..100 {
        if *state.borrow_and_update() == ClockState::Exiting {
            break;
        }
        sleep(Duration::from_millis(10));
    }
    clock.shutdown();

    assert_eq!(clock.state(), ClockState::Exiting);
    assert_eq!(listener.seen.load(Ordering::SeqCst), 3);
    assert!(matches!(clock.start(), Err(ClockError::Exiting)));
}

#[tokio::test]
async fn wait_for_exit_resolves_after_exit_program() {
    let clock = Arc::new(MasterClock::new(&config(256)).unwrap());
    clock.start().unwrap();

    let trigger = Arc::clone(&clock);
    let handle = std::thread::spawn(move || {
        sleep(Duration::from_millis(50));
        trigger.exit_program();
    });

    tokio::time::timeout(Duration::from_secs(5), clock.wait_for_exit())
        .await
        .unwrap();
    handle.join().unwrap();

    let shutdown = Arc::clone(&clock);
    tokio::task::spawn_blocking(move || shutdown.shutdown())
        .await
        .unwrap();
    assert_eq!(clock.state(), ClockState::Exiting);
}
