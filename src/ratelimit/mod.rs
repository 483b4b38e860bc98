//! Rate controllers and their per-signature state.

mod average;
mod cleanup;
mod controller;
mod counter;
mod limits;
mod linear;

pub use average::{AverageController, AverageHistory};
pub use cleanup::{CleanupTimer, DEFAULT_CLEANUP_INTERVAL};
pub use controller::{Algorithm, ControllerStatus, RateController};
pub use counter::CallCounters;
pub use limits::{ConcurrencyModel, Limits};
pub use linear::LinearController;
