//! Progress tracking and completion estimation for execution plans.

#![warn(missing_docs)]

mod estimator;
mod tracker;

pub use estimator::EtaEstimator;
pub use tracker::{PlanTracker, StatusCounts};
