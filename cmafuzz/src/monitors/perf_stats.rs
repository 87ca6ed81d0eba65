//! Statistics related to introspection

use core::{fmt, time::Duration};
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Wall-clock time spent in each phase of the fuzzing loop.
///
/// One instance is created by the [`crate::Fuzzer`] and passed by `&mut` into
/// every component that does measurable work.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PerfStats {
    /// Accumulated time per [`PerfFeature`]
    features: [Duration; NUM_PERF_FEATURES],

    /// How often each [`PerfFeature`] was marked
    counts: [u64; NUM_PERF_FEATURES],

    /// Current time set by `start_timer`
    #[serde(skip)]
    timer_start: Option<Instant>,
}

/// Various features that are measured for performance
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PerfFeature {
    /// Building the instrumented binary
    Compile = 0,

    /// Actual time spent executing the target
    Execute = 1,

    /// Running the coverage tool and parsing its report
    ExtractCoverage = 2,

    /// Deleting the instrumentation data between measurements
    Reset = 3,

    /// Asking the optimizer for a generation
    Ask = 4,

    /// Telling the optimizer the fitness values
    Tell = 5,

    /// Used as a counter to know how many elements are in [`PerfFeature`]. Must be the
    /// last value in the enum.
    Count, // !! No more values here since Count is last! !!
}

/// Number of features we can measure for performance
pub const NUM_PERF_FEATURES: usize = PerfFeature::Count as usize;

impl PerfFeature {
    /// All measurable features, in display order
    pub const ALL: [PerfFeature; NUM_PERF_FEATURES] = [
        PerfFeature::Compile,
        PerfFeature::Execute,
        PerfFeature::ExtractCoverage,
        PerfFeature::Reset,
        PerfFeature::Ask,
        PerfFeature::Tell,
    ];

    /// The name used in reports
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            PerfFeature::Compile => "compile",
            PerfFeature::Execute => "execute",
            PerfFeature::ExtractCoverage => "extract_coverage",
            PerfFeature::Reset => "reset",
            PerfFeature::Ask => "ask",
            PerfFeature::Tell => "tell",
            PerfFeature::Count => "count",
        }
    }
}

impl PerfStats {
    /// Create a blank [`PerfStats`]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a timer with the current time
    #[inline]
    pub fn start_timer(&mut self) {
        self.timer_start = Some(Instant::now());
    }

    /// Gets the elapsed time since the internal timer started. Resets the timer when
    /// finished execution.
    #[inline]
    fn mark_time(&mut self) -> Duration {
        match self.timer_start.take() {
            None => {
                // Warning message if marking time without starting the timer first
                log::warn!("Attempted to `mark_time` without starting timer first.");

                Duration::ZERO
            }
            Some(timer_start) => timer_start.elapsed(),
        }
    }

    /// Update the time spent in the given [`PerfFeature`] with the elapsed time that we have seen
    #[inline]
    pub fn mark_feature_time(&mut self, feature: PerfFeature) {
        let elapsed = self.mark_time();
        self.update_feature(feature, elapsed);
    }

    /// Add the given `time` to the given [`PerfFeature`]
    pub fn update_feature(&mut self, feature: PerfFeature, time: Duration) {
        let idx = feature as usize;
        self.features[idx] = self.features[idx].saturating_add(time);
        self.counts[idx] += 1;
    }

    /// Merge the times of another [`PerfStats`] into this one
    pub fn update(&mut self, other: &PerfStats) {
        for feature in PerfFeature::ALL {
            let idx = feature as usize;
            self.features[idx] = self.features[idx].saturating_add(other.features[idx]);
            self.counts[idx] += other.counts[idx];
        }
    }

    /// Time spent in `feature` so far
    #[must_use]
    pub fn feature_time(&self, feature: PerfFeature) -> Duration {
        self.features[feature as usize]
    }

    /// How often `feature` was timed
    #[must_use]
    pub fn feature_count(&self, feature: PerfFeature) -> u64 {
        self.counts[feature as usize]
    }

    /// Total time across all features
    #[must_use]
    pub fn total(&self) -> Duration {
        self.features.iter().sum()
    }

    /// Iterator over `(name, milliseconds)` of all features
    pub fn millis(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        PerfFeature::ALL
            .iter()
            .map(|feature| (feature.name(), self.feature_time(*feature).as_secs_f64() * 1000.0))
    }

    /// Returns the stats gathered so far and starts over
    pub fn take(&mut self) -> PerfStats {
        core::mem::take(self)
    }
}

impl fmt::Display for PerfStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let total = self.total().as_secs_f64();
        write!(f, "{total:.3}s total")?;
        for feature in PerfFeature::ALL {
            let elapsed = self.feature_time(feature).as_secs_f64();
            if self.feature_count(feature) == 0 {
                continue;
            }
            let percent = if total > 0.0 {
                elapsed / total * 100.0
            } else {
                0.0
            };
            write!(
                f,
                ", {}: {:.2}ms ({percent:.1}%, {}x)",
                feature.name(),
                elapsed * 1000.0,
                self.feature_count(feature)
            )?;
        }
        Ok(())
    }
}
