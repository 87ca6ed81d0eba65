//! Observers give insights about runs of a target.
//!
//! Here, the only observation is the coverage report of the instrumentation
//! tool, see [`gcov`].

pub mod gcov;
pub use gcov::{parse_percentage, parse_report, CoverageKind};
