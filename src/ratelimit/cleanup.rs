//! Periodic eviction of idle signatures.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use super::controller::elapsed_msec;

/// Cleanup period used when none is configured (5 minutes).
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// A background thread that runs a sweep every `interval` until stopped.
///
/// The next wait starts only after the previous sweep has finished, so
/// sweeps never overlap.
#[derive(Debug)]
pub struct CleanupTimer {
    interval: Duration,
    signal: Arc<StopSignal>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CleanupTimer {
    /// Start the timer. A zero interval falls back to [`DEFAULT_CLEANUP_INTERVAL`].
    pub fn start<F>(name: &str, interval: Duration, mut sweep: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let interval = if interval.is_zero() {
            DEFAULT_CLEANUP_INTERVAL
        } else {
            interval
        };
        let signal = Arc::new(StopSignal::default());
        let worker_signal = Arc::clone(&signal);

        let worker = thread::Builder::new()
            .name(format!("cleanup-{name}"))
            .spawn(move || {
                while wait_for_tick(&worker_signal, interval) {
                    sweep();
                }
            });

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(name = %name, error = %e, "Failed to start cleanup thread; idle entries will not be evicted");
                None
            }
        };

        Self {
            interval,
            signal,
            worker: Mutex::new(worker),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the background thread is still scheduled.
    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Stop the timer and wait for an in-flight sweep to finish.
    pub fn stop(&self) {
        *self.signal.stopped.lock() = true;
        self.signal.wake.notify_all();

        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        if worker.thread().id() == thread::current().id() {
            return;
        }
        if worker.join().is_err() {
            warn!("Cleanup thread panicked before shutdown");
        }
    }
}

impl Drop for CleanupTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sleep until the next tick. Returns `false` once the timer is stopped.
fn wait_for_tick(signal: &StopSignal, interval: Duration) -> bool {
    let deadline = Instant::now() + interval;
    let mut stopped = signal.stopped.lock();
    while !*stopped {
        if signal.wake.wait_until(&mut stopped, deadline).timed_out() {
            break;
        }
    }
    !*stopped
}

/// Remove every entry whose last activity is more than `lifetime_msec` before `now`.
///
/// `DashMap::retain` only takes shard locks, so concurrent decisions on
/// other shards proceed while the sweep runs.
pub(crate) fn evict_expired<H>(
    name: &str,
    table: &DashMap<String, H>,
    now: DateTime<Utc>,
    lifetime_msec: f64,
    last_seen: impl Fn(&H) -> DateTime<Utc>,
) -> usize {
    let mut removed = 0;
    table.retain(|_, history| {
        let keep = elapsed_msec(last_seen(history), now) <= lifetime_msec;
        if !keep {
            removed += 1;
        }
        keep
    });

    debug!(
        name = %name,
        removed = removed,
        remaining = table.len(),
        "Lookup table cleanup complete"
    );
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_timer_runs_sweeps() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let timer = CleanupTimer::start("ticks", Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(200));
        timer.stop();

        assert!(ticks.load(Ordering::SeqCst) >= 2);
        assert!(!timer.is_running());
    }

    #[test]
    fn test_stop_is_idempotent_and_halts_sweeps() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let timer = CleanupTimer::start("halt", Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        timer.stop();
        timer.stop();
        let after_stop = ticks.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));

        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_stop_does_not_wait_for_interval() {
        let timer = CleanupTimer::start("slow", Duration::from_secs(3600), || {});
        let started = Instant::now();
        timer.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_zero_interval_uses_default() {
        let timer = CleanupTimer::start("zero", Duration::ZERO, || {});
        assert_eq!(timer.interval(), DEFAULT_CLEANUP_INTERVAL);
    }

    #[test]
    fn test_evict_expired() {
        let now = Utc::now();
        let table: DashMap<String, DateTime<Utc>> = DashMap::new();
        table.insert("old".to_string(), now - chrono::Duration::milliseconds(2500));
        table.insert("edge".to_string(), now - chrono::Duration::milliseconds(2000));
        table.insert("fresh".to_string(), now - chrono::Duration::milliseconds(10));

        let removed = evict_expired("evict", &table, now, 2000.0, |stamp| *stamp);

        assert_eq!(removed, 1);
        assert!(!table.contains_key("old"));
        assert!(table.contains_key("edge"));
        assert!(table.contains_key("fresh"));
    }
}
