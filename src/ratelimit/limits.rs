//! Rate limit parameters and the concurrency discipline of a controller.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ThrottleError};

/// The rate budget a controller enforces.
///
/// A budget is either a positive window (`max_threshold` calls per
/// `time_interval_msec`), or one of two special cases configured as
/// `-1/-1` (never block) and `0/0` (always block).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Limits {
    /// Every call is allowed
    Unlimited,
    /// Every call is blocked
    Blocked,
    /// `max_threshold` calls per `time_interval_msec`
    Window {
        time_interval_msec: u32,
        max_threshold: u32,
    },
}

impl Limits {
    /// Validate a raw `(time_interval_msec, max_threshold)` pair.
    pub fn new(time_interval_msec: i64, max_threshold: i64) -> Result<Self> {
        match (time_interval_msec, max_threshold) {
            (-1, -1) => Ok(Limits::Unlimited),
            (0, 0) => Ok(Limits::Blocked),
            (interval, threshold) if interval > 0 && threshold > 0 => {
                let invalid = || ThrottleError::InvalidLimits {
                    time_interval_msec,
                    max_threshold,
                };
                Ok(Limits::Window {
                    time_interval_msec: u32::try_from(interval).map_err(|_| invalid())?,
                    max_threshold: u32::try_from(threshold).map_err(|_| invalid())?,
                })
            }
            _ => Err(ThrottleError::InvalidLimits {
                time_interval_msec,
                max_threshold,
            }),
        }
    }

    /// Shorthand for a positive window.
    pub fn window(time_interval_msec: u32, max_threshold: u32) -> Result<Self> {
        Self::new(i64::from(time_interval_msec), i64::from(max_threshold))
    }

    /// The configured window length, as reported in statistics.
    pub fn time_interval_msec(&self) -> i64 {
        match self {
            Limits::Unlimited => -1,
            Limits::Blocked => 0,
            Limits::Window {
                time_interval_msec, ..
            } => i64::from(*time_interval_msec),
        }
    }

    /// The configured calls per window, as reported in statistics.
    pub fn max_threshold(&self) -> i64 {
        match self {
            Limits::Unlimited => -1,
            Limits::Blocked => 0,
            Limits::Window { max_threshold, .. } => i64::from(*max_threshold),
        }
    }

    /// Minimum average spacing between calls, in milliseconds.
    ///
    /// Returns `None` for the two special cases.
    pub fn min_interval_msec(&self) -> Option<f64> {
        match self {
            Limits::Window {
                time_interval_msec,
                max_threshold,
            } => Some(f64::from(*time_interval_msec) / f64::from(*max_threshold)),
            _ => None,
        }
    }
}

/// Update discipline for a controller's signature table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyModel {
    /// Read, compute and merge directly against the concurrent table
    Optimistic,
    /// Serialize the read-compute-write section behind one lock per controller
    #[default]
    Pessimistic,
}
