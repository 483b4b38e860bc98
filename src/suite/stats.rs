//! Observational snapshots of a suite.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ratelimit::RateController;

/// Statistics for one controller instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceStatistics {
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// Seconds since the controller was created, to one decimal
    pub elapsed_seconds: f64,
    pub time_interval_msec: i64,
    pub max_threshold: i64,
    pub table_size: usize,
    pub total_calls: u64,
    pub blocked_calls: u64,
}

impl InstanceStatistics {
    /// Snapshot a controller as of `now`.
    pub fn capture(controller: &dyn RateController, now: DateTime<Utc>) -> Self {
        let created_at = controller.created_at();
        let elapsed_msec = now.signed_duration_since(created_at).num_milliseconds();
        let limits = controller.limits();

        Self {
            name: controller.name().to_string(),
            created_at,
            elapsed_seconds: (elapsed_msec as f64 / 100.0).round() / 10.0,
            time_interval_msec: limits.time_interval_msec(),
            max_threshold: limits.max_threshold(),
            table_size: controller.lookup_table_size(),
            total_calls: controller.total_calls(),
            blocked_calls: controller.blocked_calls(),
        }
    }
}

/// Statistics for a whole suite, in instance order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuiteStatistics {
    pub enabled: bool,
    pub log_only: bool,
    pub total_instances: usize,
    pub instances: Vec<InstanceStatistics>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{Algorithm, Limits};
    use std::time::Duration;

    #[test]
    fn test_capture() {
        let controller = Algorithm::Linear.build(
            "stats",
            Limits::window(1000, 5).unwrap(),
            Duration::from_secs(60),
        );
        let now = controller.created_at();

        assert!(controller.is_call_allowed("a", now));
        assert!(!controller.is_call_allowed("a", now));
        assert!(controller.is_call_allowed("b", now));

        let later = controller.created_at() + chrono::Duration::milliseconds(12_345);
        let stats = InstanceStatistics::capture(controller.as_ref(), later);

        assert_eq!(stats.name, "stats");
        assert_eq!(stats.elapsed_seconds, 12.3);
        assert_eq!(stats.time_interval_msec, 1000);
        assert_eq!(stats.max_threshold, 5);
        assert_eq!(stats.table_size, 2);
        assert_eq!(stats.total_calls, 3);
        assert_eq!(stats.blocked_calls, 1);

        controller.shutdown();
    }

    #[test]
    fn test_special_limits_reported_raw() {
        let controller = Algorithm::ShortAverage.build("open", Limits::Unlimited, Duration::from_secs(60));
        let stats = InstanceStatistics::capture(controller.as_ref(), Utc::now());

        assert_eq!(stats.time_interval_msec, -1);
        assert_eq!(stats.max_threshold, -1);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["name"], "open");
        assert_eq!(json["table_size"], 0);

        controller.shutdown();
    }
}
