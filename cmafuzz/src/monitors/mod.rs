//! Keep stats, and display them to the user.

pub mod perf_stats;
pub use perf_stats::{PerfFeature, PerfStats, NUM_PERF_FEATURES};
