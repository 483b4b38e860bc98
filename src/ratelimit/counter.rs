//! Informational call counters shared by every controller.

use std::sync::atomic::{AtomicU64, Ordering};

/// Total and blocked call counters for one controller.
///
/// The counters are observational only. Updates are relaxed and two
/// concurrent calls may race past the overflow check; when either counter
/// reaches `u64::MAX` both are reset to zero before counting continues.
#[derive(Debug, Default)]
pub struct CallCounters {
    total: AtomicU64,
    blocked: AtomicU64,
}

impl CallCounters {
    /// Create a new pair of zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one call.
    pub fn record(&self, allowed: bool) {
        if self.total.load(Ordering::Relaxed) == u64::MAX {
            self.reset();
        }
        self.total.fetch_add(1, Ordering::Relaxed);

        if !allowed {
            if self.blocked.load(Ordering::Relaxed) == u64::MAX {
                self.reset();
            }
            self.blocked.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Total number of evaluated calls.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Number of blocked calls.
    pub fn blocked(&self) -> u64 {
        self.blocked.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.blocked.store(0, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub(crate) fn with_values(total: u64, blocked: u64) -> Self {
        Self {
            total: AtomicU64::new(total),
            blocked: AtomicU64::new(blocked),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_allowed_and_blocked() {
        let counters = CallCounters::new();

        counters.record(true);
        counters.record(false);
        counters.record(true);

        assert_eq!(counters.total(), 3);
        assert_eq!(counters.blocked(), 1);
    }

    #[test]
    fn test_total_overflow_resets_both() {
        let counters = CallCounters::with_values(u64::MAX, 42);

        counters.record(true);

        assert_eq!(counters.total(), 1);
        assert_eq!(counters.blocked(), 0);
    }

    #[test]
    fn test_blocked_overflow_resets_both() {
        let counters = CallCounters::with_values(10, u64::MAX);

        counters.record(false);

        // total was counted before the blocked overflow wiped both
        assert_eq!(counters.total(), 0);
        assert_eq!(counters.blocked(), 1);
    }
}
