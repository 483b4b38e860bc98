//! The rate controller contract shared by every algorithm.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::average::AverageController;
use super::counter::CallCounters;
use super::limits::{ConcurrencyModel, Limits};
use super::linear::LinearController;

/// Identity, budget, counters and locking shared by every controller.
#[derive(Debug)]
pub struct ControllerStatus {
    name: String,
    created_at: DateTime<Utc>,
    limits: Limits,
    counters: CallCounters,
    pessimistic: AtomicBool,
    /// Set once the controller has been shut down
    stopped: AtomicBool,
    /// Serializes the decision section under the pessimistic model
    critical: Mutex<()>,
}

impl ControllerStatus {
    /// Create the status block for a new controller.
    pub fn new(name: impl Into<String>, limits: Limits) -> Self {
        Self {
            name: name.into(),
            created_at: Utc::now(),
            limits,
            counters: CallCounters::new(),
            pessimistic: AtomicBool::new(ConcurrencyModel::default() == ConcurrencyModel::Pessimistic),
            stopped: AtomicBool::new(false),
            critical: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    pub fn counters(&self) -> &CallCounters {
        &self.counters
    }

    pub fn concurrency_model(&self) -> ConcurrencyModel {
        if self.pessimistic.load(Ordering::Relaxed) {
            ConcurrencyModel::Pessimistic
        } else {
            ConcurrencyModel::Optimistic
        }
    }

    pub fn set_concurrency_model(&self, model: ConcurrencyModel) {
        self.pessimistic
            .store(model == ConcurrencyModel::Pessimistic, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Mark the controller as shut down. Must happen before its table is
    /// cleared, so a decision racing the shutdown can see the flag after
    /// its own write.
    pub(crate) fn mark_stopped(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Decide a call: answer the special-case budgets directly, otherwise
    /// run `decide` under the configured concurrency model. The outcome is
    /// recorded in the counters either way.
    ///
    /// A stopped controller allows every call without running `decide` or
    /// touching the counters.
    pub(crate) fn evaluate(&self, decide: impl FnOnce() -> bool) -> bool {
        if self.is_stopped() {
            return true;
        }
        let allowed = match self.limits {
            Limits::Unlimited => true,
            Limits::Blocked => false,
            Limits::Window { .. } => match self.concurrency_model() {
                ConcurrencyModel::Optimistic => decide(),
                ConcurrencyModel::Pessimistic => {
                    let _guard = self.critical.lock();
                    decide()
                }
            },
        };
        self.counters.record(allowed);
        allowed
    }
}

/// A named rate-limiting state machine keyed by request signature.
///
/// Implementations are shared across request threads and must be safe to
/// call concurrently.
pub trait RateController: Send + Sync + fmt::Debug {
    /// Identity, limits and counters of this controller.
    fn status(&self) -> &ControllerStatus;

    /// Decide whether a call with `signature` observed at `timestamp` may proceed.
    fn is_call_allowed(&self, signature: &str, timestamp: DateTime<Utc>) -> bool;

    /// Number of signatures currently tracked.
    fn lookup_table_size(&self) -> usize;

    /// Evict entries that have been idle past their lifetime as of `now`.
    ///
    /// Returns the number of evicted entries.
    fn execute_cleanup(&self, now: DateTime<Utc>) -> usize;

    /// Drop every tracked signature.
    fn clear(&self);

    /// Stop background cleanup and release the signature table.
    ///
    /// Safe to call more than once.
    fn shutdown(&self);

    fn name(&self) -> &str {
        self.status().name()
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.status().created_at()
    }

    fn limits(&self) -> Limits {
        self.status().limits()
    }

    fn total_calls(&self) -> u64 {
        self.status().counters().total()
    }

    fn blocked_calls(&self) -> u64 {
        self.status().counters().blocked()
    }

    fn concurrency_model(&self) -> ConcurrencyModel {
        self.status().concurrency_model()
    }

    fn set_concurrency_model(&self, model: ConcurrencyModel) {
        self.status().set_concurrency_model(model)
    }
}

/// The rate-limiting algorithm backing a controller instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Algorithm {
    /// Minimum spacing between consecutive allowed calls
    #[serde(alias = "Linear")]
    Linear,
    /// Moving average of call spacing that keeps counting blocked calls
    #[serde(alias = "LongAverage", alias = "longaverage", alias = "long_average")]
    LongAverage,
    /// Moving average of call spacing that forgets blocked calls and idle history
    #[default]
    #[serde(alias = "ShortAverage", alias = "shortaverage", alias = "short_average")]
    ShortAverage,
}

impl Algorithm {
    /// Construct a controller running this algorithm.
    pub fn build(
        self,
        name: impl Into<String>,
        limits: Limits,
        cleanup_interval: Duration,
    ) -> Arc<dyn RateController> {
        match self {
            Algorithm::Linear => Arc::new(LinearController::new(name, limits, cleanup_interval)),
            Algorithm::LongAverage => {
                Arc::new(AverageController::long_average(name, limits, cleanup_interval))
            }
            Algorithm::ShortAverage => {
                Arc::new(AverageController::short_average(name, limits, cleanup_interval))
            }
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Algorithm::Linear => "linear",
            Algorithm::LongAverage => "longAverage",
            Algorithm::ShortAverage => "shortAverage",
        };
        f.write_str(name)
    }
}

/// Milliseconds from `from` to `to`, negative when `to` is earlier.
pub(crate) fn elapsed_msec(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let delta = to.signed_duration_since(from);
    match delta.num_microseconds() {
        Some(micros) => micros as f64 / 1000.0,
        None => delta.num_milliseconds() as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_elapsed_msec() {
        let start = Utc.timestamp_millis_opt(1_000_000).unwrap();
        let later = start + chrono::Duration::microseconds(1_500);

        assert_eq!(elapsed_msec(start, later), 1.5);
        assert_eq!(elapsed_msec(later, start), -1.5);
    }

    #[test]
    fn test_status_concurrency_model() {
        let status = ControllerStatus::new("status", Limits::Unlimited);
        assert_eq!(status.concurrency_model(), ConcurrencyModel::Pessimistic);

        status.set_concurrency_model(ConcurrencyModel::Optimistic);
        assert_eq!(status.concurrency_model(), ConcurrencyModel::Optimistic);
    }

    #[test]
    fn test_special_cases_are_counted() {
        let unlimited = ControllerStatus::new("open", Limits::Unlimited);
        let blocked = ControllerStatus::new("closed", Limits::Blocked);

        assert!(unlimited.evaluate(|| unreachable!()));
        assert!(!blocked.evaluate(|| unreachable!()));

        assert_eq!(unlimited.counters().total(), 1);
        assert_eq!(unlimited.counters().blocked(), 0);
        assert_eq!(blocked.counters().total(), 1);
        assert_eq!(blocked.counters().blocked(), 1);
    }

    #[test]
    fn test_stopped_status_skips_decisions() {
        let status = ControllerStatus::new("stopped", Limits::Blocked);
        status.mark_stopped();

        assert!(status.is_stopped());
        assert!(status.evaluate(|| unreachable!()));
        assert_eq!(status.counters().total(), 0);
    }

    #[test]
    fn test_algorithm_parsing() {
        let parsed: Vec<Algorithm> =
            serde_yaml::from_str("[linear, longAverage, shortaverage, LongAverage]").unwrap();
        assert_eq!(
            parsed,
            vec![
                Algorithm::Linear,
                Algorithm::LongAverage,
                Algorithm::ShortAverage,
                Algorithm::LongAverage
            ]
        );
        assert_eq!(Algorithm::default(), Algorithm::ShortAverage);
    }

    #[test]
    fn test_build_each_algorithm() {
        let limits = Limits::window(1000, 5).unwrap();
        for algorithm in [Algorithm::Linear, Algorithm::LongAverage, Algorithm::ShortAverage] {
            let controller = algorithm.build(algorithm.to_string(), limits, Duration::from_secs(60));
            assert_eq!(controller.name(), algorithm.to_string());
            assert_eq!(controller.limits(), limits);
            assert_eq!(controller.lookup_table_size(), 0);
            controller.shutdown();
        }
    }
}
