//! Moving-average controllers.
//!
//! Both variants track a decaying average of the gap between consecutive
//! calls per signature and block while that average is below
//! `time_interval_msec / max_threshold`.
//!
//! - The *long* variant keeps recording blocked calls, so a client that
//!   bursts has to slow down long enough to pay the average back.
//! - The *short* variant drops blocked calls from the average and starts a
//!   fresh sequence after a full idle window.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, trace};

use super::cleanup::{evict_expired, CleanupTimer};
use super::controller::{elapsed_msec, ControllerStatus, RateController};
use super::limits::Limits;

/// How long the long variant keeps an idle signature (5 minutes).
const PENALTY_LIFETIME_MSEC: f64 = 300_000.0;

/// Per-signature moving-average state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AverageHistory {
    /// Timestamp of the last recorded call
    pub last_time: DateTime<Utc>,
    /// Average gap between recorded calls, in milliseconds
    pub average_time: f64,
    /// Number of calls folded into the average; always at least 1
    pub current_count: u32,
}

impl AverageHistory {
    /// A fresh sequence, seeded as if the previous call happened one full window ago.
    fn seed(timestamp: DateTime<Utc>, time_interval_msec: f64) -> Self {
        Self {
            last_time: timestamp,
            average_time: time_interval_msec,
            current_count: 1,
        }
    }

    /// Add one more gap of `elapsed_msec` to the average.
    fn fold(&mut self, elapsed_msec: f64) {
        let count = f64::from(self.current_count);
        self.average_time = (self.average_time * count + elapsed_msec) / (count + 1.0);
        self.current_count = self.current_count.saturating_add(1);
    }
}

/// Reconcile a decision with the entry stored at write time.
///
/// When another call advanced the entry after `observed` was read, or the
/// stored call is later than this one, this call's gap is folded into the
/// stored history instead of overwriting it with `candidate`.
fn merge(
    stored: &mut AverageHistory,
    observed: Option<AverageHistory>,
    candidate: AverageHistory,
    elapsed_msec: f64,
    timestamp: DateTime<Utc>,
) {
    let advanced = observed.is_some_and(|previous| stored.last_time > previous.last_time);
    if advanced || stored.last_time > timestamp {
        stored.fold(elapsed_msec);
    } else {
        *stored = candidate;
    }
}

/// Moving-average controller, in its long (penalty) or short form.
#[derive(Debug)]
pub struct AverageController {
    status: ControllerStatus,
    apply_longtime_penalty: bool,
    time_interval_msec: f64,
    max_threshold: u32,
    min_average_msec: f64,
    requests: Arc<DashMap<String, AverageHistory>>,
    cleanup: CleanupTimer,
}

impl AverageController {
    /// Create the penalty variant: blocked calls keep counting toward the average.
    pub fn long_average(name: impl Into<String>, limits: Limits, cleanup_interval: Duration) -> Self {
        Self::new(name, limits, cleanup_interval, true)
    }

    /// Create the forgiving variant: blocked calls are not recorded and a
    /// full idle window resets the sequence.
    pub fn short_average(name: impl Into<String>, limits: Limits, cleanup_interval: Duration) -> Self {
        Self::new(name, limits, cleanup_interval, false)
    }

    fn new(
        name: impl Into<String>,
        limits: Limits,
        cleanup_interval: Duration,
        apply_longtime_penalty: bool,
    ) -> Self {
        let status = ControllerStatus::new(name, limits);
        let requests: Arc<DashMap<String, AverageHistory>> = Arc::new(DashMap::new());

        let table = Arc::clone(&requests);
        let timer_name = status.name().to_string();
        let lifetime_msec = Self::lifetime_msec(limits, apply_longtime_penalty);
        let cleanup = CleanupTimer::start(status.name(), cleanup_interval, move || {
            evict_expired(&timer_name, &table, Utc::now(), lifetime_msec, |history| {
                history.last_time
            });
        });

        debug!(
            name = %status.name(),
            limits = ?limits,
            penalty = apply_longtime_penalty,
            cleanup_interval = ?cleanup.interval(),
            "Created average controller"
        );

        let max_threshold = match limits {
            Limits::Window { max_threshold, .. } => max_threshold,
            _ => 0,
        };

        Self {
            status,
            apply_longtime_penalty,
            time_interval_msec: limits.time_interval_msec() as f64,
            max_threshold,
            min_average_msec: limits.min_interval_msec().unwrap_or_default(),
            requests,
            cleanup,
        }
    }

    /// Whether blocked calls keep counting toward the average.
    pub fn applies_longtime_penalty(&self) -> bool {
        self.apply_longtime_penalty
    }

    /// Current history for `signature`, if tracked.
    pub fn history(&self, signature: &str) -> Option<AverageHistory> {
        self.requests.get(signature).map(|entry| *entry.value())
    }

    fn lifetime_msec(limits: Limits, apply_longtime_penalty: bool) -> f64 {
        if apply_longtime_penalty {
            PENALTY_LIFETIME_MSEC
        } else {
            2.0 * limits.time_interval_msec() as f64
        }
    }

    fn decide(&self, signature: &str, timestamp: DateTime<Utc>) -> bool {
        let observed = self.history(signature);

        let mut allowed = true;
        let mut elapsed = self.time_interval_msec;
        let mut candidate = AverageHistory::seed(timestamp, self.time_interval_msec);

        if let Some(previous) = observed {
            // simultaneous calls can arrive with a slightly earlier stamp
            elapsed = elapsed_msec(previous.last_time, timestamp).max(0.0);

            let mut next = previous;
            next.fold(elapsed);
            next.last_time = timestamp;
            allowed = next.average_time >= self.min_average_msec;

            if next.current_count == self.max_threshold {
                // The seed assumed a full-window gap before the first call;
                // now that the sequence is full, swap it for the minimum gap.
                next.average_time -=
                    (self.time_interval_msec - self.min_average_msec) / f64::from(next.current_count);
            }
            candidate = next;

            if !self.apply_longtime_penalty && elapsed > self.time_interval_msec {
                candidate = AverageHistory::seed(timestamp, self.time_interval_msec);
                allowed = true;
            }
        }

        if allowed || self.apply_longtime_penalty {
            self.requests
                .entry(signature.to_string())
                .and_modify(|stored| merge(stored, observed, candidate, elapsed, timestamp))
                .or_insert(candidate);
        }

        trace!(
            name = %self.status.name(),
            signature = signature,
            elapsed_msec = elapsed,
            average_msec = candidate.average_time,
            allowed = allowed,
            "Average decision"
        );
        allowed
    }
}

impl RateController for AverageController {
    fn status(&self) -> &ControllerStatus {
        &self.status
    }

    fn is_call_allowed(&self, signature: &str, timestamp: DateTime<Utc>) -> bool {
        let allowed = self.status.evaluate(|| self.decide(signature, timestamp));
        if self.status.is_stopped() {
            // shutdown landed while deciding; keep the table empty
            self.requests.remove(signature);
        }
        allowed
    }

    fn lookup_table_size(&self) -> usize {
        self.requests.len()
    }

    fn execute_cleanup(&self, now: DateTime<Utc>) -> usize {
        let lifetime_msec = Self::lifetime_msec(self.status.limits(), self.apply_longtime_penalty);
        evict_expired(self.status.name(), &self.requests, now, lifetime_msec, |history| {
            history.last_time
        })
    }

    fn clear(&self) {
        self.requests.clear();
    }

    fn shutdown(&self) {
        self.status.mark_stopped();
        self.cleanup.stop();
        self.requests.clear();
    }
}

impl Drop for AverageController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
