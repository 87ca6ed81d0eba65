//! Executors take care of building, running and measuring the target.
//!
//! Every [`Harness`] owns one target and the instrumentation state its runs
//! leave behind. The state is additive: each execution adds to the counters
//! until [`Harness::reset`] clears them, so a measurement is always
//! `execute* -> extract_coverage -> reset`.

pub mod command;
pub use command::{CommandBuilder, CommandConfigurator, StdCommandConfigurator};

pub mod gcov;
pub use gcov::{GcovHarness, GcovHarnessBuilder};

pub mod inprocess;
pub use inprocess::InProcessHarness;

use serde::{Deserialize, Serialize};

use crate::{inputs::EncodedInput, monitors::PerfStats, Error};

/// How an execution exited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitKind {
    /// The run exited normally.
    Ok,
    /// The run resulted in a target crash.
    Crash,
    /// The run timed out
    Timeout,
}

/// A target that can be compiled, executed, and measured.
///
/// The harness does not judge runs: a crashing input is just an input whose
/// report shows little coverage.
pub trait Harness {
    /// Builds the target. Only the first call does work.
    fn compile(&mut self, perf: &mut PerfStats) -> Result<(), Error>;

    /// Runs the target once with `input` on its stdin, blocking until it exits
    fn execute(&mut self, input: &EncodedInput, perf: &mut PerfStats) -> Result<ExitKind, Error>;

    /// The coverage accumulated by all executions since the last [`Harness::reset`].
    ///
    /// Missing instrumentation data is a coverage of `0.0`, not an error.
    fn extract_coverage(&mut self, perf: &mut PerfStats) -> Result<f64, Error>;

    /// Clears the accumulated instrumentation data
    fn reset(&mut self, perf: &mut PerfStats) -> Result<(), Error>;

    /// The coverage of `input` on its own
    ///
    /// The instrumentation data is reset even if the measurement fails.
    fn measure(&mut self, input: &EncodedInput, perf: &mut PerfStats) -> Result<f64, Error> {
        let coverage = match self
            .execute(input, perf)
            .and_then(|_| self.extract_coverage(perf))
        {
            Ok(coverage) => coverage,
            Err(err) => return Err(discard_measurement(self, perf, err)),
        };
        self.reset(perf)?;
        Ok(coverage)
    }

    /// The coverage of all `prior` inputs, in order, followed by `input`.
    ///
    /// This is the value of `input` relative to an existing corpus: it only
    /// beats the corpus' own score if `input` reaches new code.
    fn measure_cumulative(
        &mut self,
        prior: &[EncodedInput],
        input: &EncodedInput,
        perf: &mut PerfStats,
    ) -> Result<f64, Error> {
        for sample in prior {
            if let Err(err) = self.execute(sample, perf) {
                return Err(discard_measurement(self, perf, err));
            }
        }
        self.measure(input, perf)
    }
}

/// Resets `harness` after a failed measurement and hands back its error
fn discard_measurement<H>(harness: &mut H, perf: &mut PerfStats, err: Error) -> Error
where
    H: Harness + ?Sized,
{
    if let Err(reset_err) = harness.reset(perf) {
        log::warn!("Reset after a failed measurement failed: {reset_err}");
    }
    err
}
