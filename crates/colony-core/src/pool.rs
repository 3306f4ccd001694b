//! Supervised worker pool for listener callbacks.
//!
//! Listener callbacks for one tick run in parallel on a dedicated
//! multi-thread Tokio runtime. [`WorkerPool::run`] is a barrier: it
//! returns only after every submitted callback has finished, which is what
//! keeps tick `N + 1` from starting while any listener is still inside
//! tick `N`.
//!
//! The pool is supervised rather than trusted. Before every dispatch it
//! checks its own health; a runtime that has been shut down, or that lost
//! tasks during the previous dispatch, is torn down and rebuilt with a
//! warning. Registered listeners live in the registry, not the pool, so
//! they survive a rebuild untouched.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use colony_types::Pulse;
use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::listener::{Delivery, ListenerTask};

/// Errors raised by the worker pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The Tokio runtime backing the pool could not be built.
    #[error("failed to build worker pool: {source}")]
    Build {
        /// The underlying I/O error from the runtime builder.
        #[from]
        source: std::io::Error,
    },
}

/// Per-tick dispatch tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Callbacks that returned `Ok`.
    pub delivered: usize,
    /// Listeners whose tick was withheld by their throttle.
    pub throttled: usize,
    /// Callbacks that returned `Err` or panicked.
    pub failed: usize,
    /// Tasks the pool failed to run to completion.
    pub lost: usize,
}

/// A listener paired with the pulse it should receive this tick.
pub type Job = (Arc<ListenerTask>, Arc<Pulse>);

/// Fixed-size, self-healing pool of listener worker threads.
#[derive(Debug)]
pub struct WorkerPool {
    threads: usize,
    runtime: Option<Runtime>,
    /// Set when the last dispatch lost tasks.
    degraded: bool,
    rebuilds: u64,
}

impl WorkerPool {
    /// Build a pool with `threads` workers (at least one).
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Build`] if the runtime cannot be created.
    pub fn new(threads: usize) -> Result<Self, PoolError> {
        let threads = threads.max(1);
        let runtime = build_runtime(threads)?;
        debug!(threads, "Worker pool started");
        Ok(Self {
            threads,
            runtime: Some(runtime),
            degraded: false,
            rebuilds: 0,
        })
    }

    /// Number of worker threads.
    pub const fn threads(&self) -> usize {
        self.threads
    }

    /// How many times the pool has been rebuilt.
    pub const fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    /// Whether the pool can accept work without a rebuild.
    pub const fn is_healthy(&self) -> bool {
        self.runtime.is_some() && !self.degraded
    }

    /// Rebuild the runtime if the health check fails.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Build`] if the replacement cannot be created;
    /// the pool stays unhealthy and the next dispatch retries.
    pub fn ensure_healthy(&mut self) -> Result<(), PoolError> {
        if self.is_healthy() {
            return Ok(());
        }
        warn!(
            threads = self.threads,
            rebuilds = self.rebuilds,
            "Worker pool unavailable; rebuilding"
        );
        if let Some(old) = self.runtime.take() {
            old.shutdown_background();
        }
        self.runtime = Some(build_runtime(self.threads)?);
        self.degraded = false;
        self.rebuilds = self.rebuilds.saturating_add(1);
        Ok(())
    }

    /// Run every job and wait for all of them to finish.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Build`] if an unhealthy pool cannot be rebuilt.
    /// Listener failures are counted in the report, never returned.
    pub fn run(&mut self, jobs: Vec<Job>) -> Result<DispatchReport, PoolError> {
        if jobs.is_empty() {
            return Ok(DispatchReport::default());
        }
        self.ensure_healthy()?;
        let Some(runtime) = self.runtime.as_ref() else {
            return Ok(DispatchReport {
                lost: jobs.len(),
                ..DispatchReport::default()
            });
        };

        let report = runtime.block_on(async move {
            let mut set = JoinSet::new();
            for (task, pulse) in jobs {
                set.spawn(async move { task.deliver(&pulse) });
            }

            let mut report = DispatchReport::default();
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(Delivery::Delivered) => {
                        report.delivered = report.delivered.saturating_add(1);
                    }
                    Ok(Delivery::Failed) => report.failed = report.failed.saturating_add(1),
                    Err(err) => {
                        warn!(error = %err, "Worker task did not complete");
                        report.lost = report.lost.saturating_add(1);
                    }
                }
            }
            report
        });

        if report.lost > 0 {
            self.degraded = true;
        }
        Ok(report)
    }

    /// Stop the worker threads. The next [`run`](Self::run) rebuilds them.
    pub fn shutdown(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
            debug!(threads = self.threads, "Worker pool shut down");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Dropping a runtime inside async code panics; background shutdown
        // is safe from any context.
        self.shutdown();
    }
}

fn build_runtime(threads: usize) -> Result<Runtime, PoolError> {
    let counter = AtomicUsize::new(0);
    let runtime = Builder::new_multi_thread()
        .worker_threads(threads)
        .thread_name_fn(move || {
            let n = counter.fetch_add(1, Ordering::Relaxed);
            format!("pulse-worker-{n}")
        })
        .enable_time()
        .build()?;
    Ok(runtime)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use colony_types::{EarthTime, ListenerId, MarsTime};

    use super::*;
    use crate::listener::{ClockListener, ListenerError};

    fn pulse(id: u64) -> Arc<Pulse> {
        Arc::new(Pulse::new(
            id,
            0.1,
            MarsTime::new(3, 1, 1, 0.0).unwrap(),
            EarthTime::new(Utc.with_ymd_and_hms(2043, 9, 30, 0, 0, 0).unwrap()),
            1,
            false,
            false,
        ))
    }

    /// Records the thread each call ran on, after an optional delay.
    struct Recorder {
        delay: Duration,
        seen: Mutex<Vec<(u64, String)>>,
        fail: bool,
    }

    impl ClockListener for Recorder {
        fn on_pulse(&self, pulse: &Pulse) -> Result<(), ListenerError> {
            std::thread::sleep(self.delay);
            let thread = std::thread::current().name().unwrap_or("").to_owned();
            self.seen.lock().unwrap().push((pulse.id(), thread));
            if self.fail {
                return Err(ListenerError::new("refused"));
            }
            Ok(())
        }
    }

    fn recorder(delay_ms: u64, fail: bool) -> Arc<Recorder> {
        Arc::new(Recorder {
            delay: Duration::from_millis(delay_ms),
            seen: Mutex::new(Vec::new()),
            fail,
        })
    }

    fn job(listener: &Arc<Recorder>, id: u64) -> Job {
        let task = ListenerTask::new(ListenerId::new(), Arc::clone(listener) as Arc<dyn ClockListener>, 0);
        (Arc::new(task), pulse(id))
    }

    #[test]
    fn run_waits_for_every_job() {
        let mut pool = WorkerPool::new(2).unwrap();
        let slow = recorder(50, false);
        let fast = recorder(0, false);
        let report = pool.run(vec![job(&slow, 1), job(&fast, 1)]).unwrap();
        assert_eq!(report.delivered, 2);
        // Both finished before run returned.
        assert_eq!(slow.seen.lock().unwrap().len(), 1);
        assert_eq!(fast.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn callbacks_run_on_worker_threads() {
        let mut pool = WorkerPool::new(1).unwrap();
        let listener = recorder(0, false);
        pool.run(vec![job(&listener, 1)]).unwrap();
        let seen = listener.seen.lock().unwrap();
        assert!(seen.iter().all(|(_, name)| name.starts_with("pulse-worker-")));
    }

    #[test]
    fn failures_are_counted_not_propagated() {
        let mut pool = WorkerPool::new(2).unwrap();
        let bad = recorder(0, true);
        let good = recorder(0, false);
        let report = pool.run(vec![job(&bad, 1), job(&good, 1)]).unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.delivered, 1);
        assert!(pool.is_healthy());
    }

    #[test]
    fn dead_pool_is_rebuilt_on_next_dispatch() {
        let mut pool = WorkerPool::new(2).unwrap();
        pool.shutdown();
        assert!(!pool.is_healthy());

        let listener = recorder(0, false);
        let report = pool.run(vec![job(&listener, 7)]).unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(pool.rebuilds(), 1);
        assert!(pool.is_healthy());
    }

    #[test]
    fn empty_dispatch_is_a_no_op() {
        let mut pool = WorkerPool::new(1).unwrap();
        pool.shutdown();
        assert_eq!(pool.run(Vec::new()).unwrap(), DispatchReport::default());
        assert_eq!(pool.rebuilds(), 0);
    }
}
