//! A [`Harness`] that runs a rust closure instead of a compiled target.
//!
//! The closure reports the coverage of one input. Accumulated coverage is the
//! best single report since the last reset, which models targets whose inputs
//! reach nested code: a later input covering more subsumes the earlier ones.

use core::fmt::{self, Debug, Formatter};

use crate::{
    executors::{ExitKind, Harness},
    inputs::EncodedInput,
    monitors::{PerfFeature, PerfStats},
    Error,
};

/// The inmem harness, wrapping a `FnMut(&[u8]) -> f64` coverage function
pub struct InProcessHarness<F>
where
    F: FnMut(&[u8]) -> f64,
{
    harness_fn: F,
    /// `None` while no execution left data behind
    accumulated: Option<f64>,
    executions: u64,
}

impl<F> Debug for InProcessHarness<F>
where
    F: FnMut(&[u8]) -> f64,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcessHarness")
            .field("accumulated", &self.accumulated)
            .field("executions", &self.executions)
            .finish_non_exhaustive()
    }
}

impl<F> InProcessHarness<F>
where
    F: FnMut(&[u8]) -> f64,
{
    /// Create a new in mem harness around `harness_fn`
    pub fn new(harness_fn: F) -> Self {
        Self {
            harness_fn,
            accumulated: None,
            executions: 0,
        }
    }

    /// How often the wrapped function was called
    #[must_use]
    pub fn executions(&self) -> u64 {
        self.executions
    }
}

impl<F> Harness for InProcessHarness<F>
where
    F: FnMut(&[u8]) -> f64,
{
    fn compile(&mut self, _perf: &mut PerfStats) -> Result<(), Error> {
        Ok(())
    }

    fn execute(&mut self, input: &EncodedInput, perf: &mut PerfStats) -> Result<ExitKind, Error> {
        perf.start_timer();
        let coverage = (self.harness_fn)(input.bytes());
        perf.mark_feature_time(PerfFeature::Execute);

        self.executions += 1;
        self.accumulated = Some(self.accumulated.map_or(coverage, |acc| acc.max(coverage)));
        Ok(ExitKind::Ok)
    }

    fn extract_coverage(&mut self, _perf: &mut PerfStats) -> Result<f64, Error> {
        Ok(self.accumulated.unwrap_or(0.0))
    }

    fn reset(&mut self, perf: &mut PerfStats) -> Result<(), Error> {
        perf.start_timer();
        if self.accumulated.take().is_none() {
            log::warn!("No coverage data to reset");
        }
        perf.mark_feature_time(PerfFeature::Reset);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        executors::{Harness, InProcessHarness},
        inputs::{bytes_to_int, EncodedInput},
        monitors::PerfStats,
    };

    fn levels(bytes: &[u8]) -> f64 {
        let x = bytes_to_int(bytes);
        f64::from(1 + u8::from(x > 0) + u8::from(x > 1000))
    }

    #[test]
    fn test_measure_resets() {
        let mut harness = InProcessHarness::new(levels);
        let mut perf = PerfStats::new();
        let big = EncodedInput::new(vec![0, 0, 1, 0]);
        let small = EncodedInput::new(vec![1, 0, 0, 0]);

        assert_eq!(harness.measure(&big, &mut perf).unwrap(), 3.0);
        assert_eq!(harness.measure(&small, &mut perf).unwrap(), 2.0);
        assert_eq!(harness.extract_coverage(&mut perf).unwrap(), 0.0);
    }

    #[test]
    fn test_measure_cumulative() {
        let mut harness = InProcessHarness::new(levels);
        let mut perf = PerfStats::new();
        let big = EncodedInput::new(vec![0, 0, 1, 0]);
        let zero = EncodedInput::new(vec![0, 0, 0, 0]);

        assert_eq!(
            harness
                .measure_cumulative(&[big], &zero, &mut perf)
                .unwrap(),
            3.0
        );
        assert_eq!(harness.executions(), 2);
        assert_eq!(harness.measure(&zero, &mut perf).unwrap(), 1.0);
    }
}
