//! Minimum inter-arrival time controller.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, trace};

use super::cleanup::{evict_expired, CleanupTimer};
use super::controller::{elapsed_msec, ControllerStatus, RateController};
use super::limits::Limits;

/// Allows a call only when at least `time_interval_msec / max_threshold`
/// milliseconds have passed since the last allowed call for the same
/// signature.
///
/// The table maps each signature to the timestamp of its last allowed call.
#[derive(Debug)]
pub struct LinearController {
    status: ControllerStatus,
    /// Minimum spacing between allowed calls, in milliseconds
    threshold_msec: f64,
    requests: Arc<DashMap<String, DateTime<Utc>>>,
    cleanup: CleanupTimer,
}

impl LinearController {
    /// Create a controller and start its periodic cleanup.
    pub fn new(name: impl Into<String>, limits: Limits, cleanup_interval: Duration) -> Self {
        let status = ControllerStatus::new(name, limits);
        let requests: Arc<DashMap<String, DateTime<Utc>>> = Arc::new(DashMap::new());

        let table = Arc::clone(&requests);
        let timer_name = status.name().to_string();
        let lifetime_msec = Self::lifetime_msec(limits);
        let cleanup = CleanupTimer::start(status.name(), cleanup_interval, move || {
            evict_expired(&timer_name, &table, Utc::now(), lifetime_msec, |stamp| *stamp);
        });

        debug!(
            name = %status.name(),
            limits = ?limits,
            cleanup_interval = ?cleanup.interval(),
            "Created linear controller"
        );

        Self {
            status,
            threshold_msec: limits.min_interval_msec().unwrap_or_default(),
            requests,
            cleanup,
        }
    }

    /// Timestamp of the last allowed call for `signature`, if tracked.
    pub fn last_allowed(&self, signature: &str) -> Option<DateTime<Utc>> {
        self.requests.get(signature).map(|entry| *entry.value())
    }

    fn lifetime_msec(limits: Limits) -> f64 {
        2.0 * limits.time_interval_msec() as f64
    }

    fn decide(&self, signature: &str, timestamp: DateTime<Utc>) -> bool {
        let previous = self.last_allowed(signature);
        let allowed = match previous {
            Some(stamp) => elapsed_msec(stamp, timestamp) >= self.threshold_msec,
            None => true,
        };

        if allowed {
            // Keep the later stamp if a concurrent call already recorded one.
            self.requests
                .entry(signature.to_string())
                .and_modify(|stamp| {
                    if timestamp > *stamp {
                        *stamp = timestamp;
                    }
                })
                .or_insert(timestamp);
        }

        trace!(
            name = %self.status.name(),
            signature = signature,
            elapsed_msec = previous.map(|stamp| elapsed_msec(stamp, timestamp)),
            allowed = allowed,
            "Linear decision"
        );
        allowed
    }
}

impl RateController for LinearController {
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
        let lifetime_msec = Self::lifetime_msec(self.status.limits());
        evict_expired(self.status.name(), &self.requests, now, lifetime_msec, |stamp| *stamp)
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

impl Drop for LinearController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::ratelimit::ConcurrencyModel;

    fn at(offset_msec: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
            + chrono::Duration::milliseconds(offset_msec)
    }

    fn create_controller(interval: i64, threshold: i64) -> LinearController {
        let limits = Limits::new(interval, threshold).unwrap();
        LinearController::new("linear", limits, Duration::from_secs(300))
    }

    #[test]
    fn test_minimum_spacing_rules() {
        let controller = create_controller(1000, 5);

        // threshold is 200ms
        assert!(controller.is_call_allowed("sig", at(0)));
        assert!(controller.is_call_allowed("sig", at(500)));
        assert!(!controller.is_call_allowed("sig", at(630)));
        assert!(controller.is_call_allowed("sig", at(930)));
        assert!(!controller.is_call_allowed("sig", at(1080)));

        assert_eq!(controller.total_calls(), 5);
        assert_eq!(controller.blocked_calls(), 2);
    }

    #[test]
    fn test_blocked_call_does_not_move_stamp() {
        let controller = create_controller(1000, 5);

        assert!(controller.is_call_allowed("sig", at(0)));
        assert!(!controller.is_call_allowed("sig", at(150)));
        assert_eq!(controller.last_allowed("sig"), Some(at(0)));

        // measured from t=0, not from the blocked call at t=150
        assert!(controller.is_call_allowed("sig", at(210)));
    }

    #[test]
    fn test_out_of_order_call_keeps_later_stamp() {
        let controller = create_controller(1000, 5);

        assert!(controller.is_call_allowed("sig", at(1000)));
        assert!(!controller.is_call_allowed("sig", at(900)));
        assert_eq!(controller.last_allowed("sig"), Some(at(1000)));
    }

    #[test]
    fn test_signatures_are_independent() {
        let controller = create_controller(1000, 5);

        assert!(controller.is_call_allowed("a", at(0)));
        assert!(controller.is_call_allowed("b", at(10)));
        assert!(!controller.is_call_allowed("a", at(20)));
        assert_eq!(controller.lookup_table_size(), 2);
    }

    #[test]
    fn test_special_case_limits() {
        let blocked = create_controller(0, 0);
        let unlimited = create_controller(-1, -1);

        for offset in [0, 1, 2, 5000] {
            assert!(!blocked.is_call_allowed("sig", at(offset)));
            assert!(unlimited.is_call_allowed("sig", at(offset)));
        }
        assert_eq!(blocked.lookup_table_size(), 0);
        assert_eq!(unlimited.lookup_table_size(), 0);
        assert_eq!(blocked.blocked_calls(), 4);
    }

    #[test]
    fn test_optimistic_model_same_sequential_result() {
        let controller = create_controller(1000, 5);
        controller.set_concurrency_model(ConcurrencyModel::Optimistic);

        assert!(controller.is_call_allowed("sig", at(0)));
        assert!(!controller.is_call_allowed("sig", at(100)));
        assert!(controller.is_call_allowed("sig", at(200)));
    }

    #[test]
    fn test_cleanup_evicts_after_two_intervals() {
        let controller = create_controller(1000, 5);

        controller.is_call_allowed("old", at(0));
        controller.is_call_allowed("recent", at(1500));
        assert_eq!(controller.lookup_table_size(), 2);

        let removed = controller.execute_cleanup(at(2500));

        assert_eq!(removed, 1);
        assert_eq!(controller.lookup_table_size(), 1);
        assert!(controller.last_allowed("old").is_none());
        assert!(controller.last_allowed("recent").is_some());
    }

    #[test]
    fn test_background_cleanup() {
        let limits = Limits::window(10, 1).unwrap();
        let controller = LinearController::new("background", limits, Duration::from_millis(20));

        controller.is_call_allowed("sig", Utc::now() - chrono::Duration::seconds(1));
        assert_eq!(controller.lookup_table_size(), 1);

        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(controller.lookup_table_size(), 0);
    }

    #[test]
    fn test_shutdown_clears_and_is_idempotent() {
        let controller = create_controller(1000, 5);
        controller.is_call_allowed("sig", at(0));

        controller.shutdown();
        controller.shutdown();

        assert_eq!(controller.lookup_table_size(), 0);
        assert!(!controller.cleanup.is_running());
    }

    #[test]
    fn test_calls_after_shutdown_are_not_recorded() {
        let controller = create_controller(1000, 5);
        controller.shutdown();

        assert!(controller.is_call_allowed("sig", at(0)));
        assert!(controller.is_call_allowed("sig", at(1)));

        assert_eq!(controller.lookup_table_size(), 0);
        assert_eq!(controller.total_calls(), 0);
    }
}
