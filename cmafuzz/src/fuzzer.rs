//! The [`Fuzzer`] ties harness, optimizer, driver and collector together,
//! and builds the test suite.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{
    corpus::{OnDiskSuite, SampleCollector, TestSuite},
    driver::{SearchConfig, SearchDriver, SearchOutcome},
    executors::Harness,
    inputs::bytes_to_int,
    monitors::PerfStats,
    optimizers::OptimizerFactory,
    Error,
};

/// Why [`Fuzzer::generate_testsuite`] stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The suite holds `max_sample_size` samples
    MaxSamples,
    /// The best coverage reached the saturation threshold
    Saturated,
    /// The largest population found nothing new
    PopsizeExhausted,
    /// An error ended the search, the suite holds what was found before it
    Interrupted(String),
}

/// Configuration of a [`Fuzzer`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuzzerConfig {
    /// The suite is done with this many samples
    pub max_sample_size: usize,
    /// The suite is done once coverage reaches this
    pub saturation: f64,
    /// The search loop
    pub search: SearchConfig,
    /// Where to write the suite, the inputs and the report
    pub log_dir: Option<PathBuf>,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        Self {
            max_sample_size: 10,
            saturation: 100.0,
            search: SearchConfig::default(),
            log_dir: None,
        }
    }
}

/// What [`Fuzzer::generate_testsuite`] produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuzzReport {
    /// Accepted inputs and the coverage they reached
    pub test_suite: TestSuite,
    /// Why the fuzzer stopped
    pub stop_reason: StopReason,
    /// The best coverage reached
    pub best_coverage: f64,
    /// Number of optimizer runs
    pub runs: u64,
    /// Time spent per phase
    pub perf: PerfStats,
}

/// Builds a test suite for the target of `H`, searching with optimizers
/// from `OF`.
#[derive(Debug)]
pub struct Fuzzer<H, OF> {
    harness: H,
    factory: OF,
    driver: SearchDriver,
    collector: SampleCollector,
    perf: PerfStats,
    on_disk: Option<OnDiskSuite>,
    stop_reason: Option<StopReason>,
}

impl<H, OF> Fuzzer<H, OF>
where
    H: Harness,
    OF: OptimizerFactory,
{
    /// Create a new [`Fuzzer`]. Creates the log dir, if configured.
    pub fn new(harness: H, factory: OF, config: FuzzerConfig) -> Result<Self, Error> {
        if config.max_sample_size == 0 {
            return Err(Error::illegal_argument("max_sample_size must not be 0"));
        }
        let on_disk = config.log_dir.as_ref().map(OnDiskSuite::new).transpose()?;
        Ok(Self {
            harness,
            factory,
            driver: SearchDriver::new(config.search)?,
            collector: SampleCollector::new(config.max_sample_size, config.saturation),
            perf: PerfStats::new(),
            on_disk,
            stop_reason: None,
        })
    }

    /// Compiles the target and searches until the suite is full or
    /// saturated, or the search gives up.
    ///
    /// A failed compilation is returned as error. Any later error ends the
    /// search with [`StopReason::Interrupted`], keeping the suite found so far.
    pub fn generate_testsuite(&mut self) -> Result<FuzzReport, Error> {
        self.harness.compile(&mut self.perf)?;

        let stop_reason = loop {
            if self.collector.is_full() {
                break StopReason::MaxSamples;
            }
            if self.collector.is_saturated() {
                break StopReason::Saturated;
            }

            match self.driver.search(
                &mut self.harness,
                &mut self.factory,
                &mut self.collector,
                &mut self.perf,
            ) {
                Ok(SearchOutcome::PopsizeExhausted) => break StopReason::PopsizeExhausted,
                Ok(SearchOutcome::Converged | SearchOutcome::ThresholdReached) => (),
                Err(err) => {
                    log::error!("Search interrupted: {err}");
                    self.driver.interrupt();
                    break StopReason::Interrupted(err.to_string());
                }
            }
        };
        log::info!("Stopping: {stop_reason:?}");
        self.stop_reason = Some(stop_reason.clone());
        self.last_report();

        let report = FuzzReport {
            test_suite: self.collector.test_suite(),
            stop_reason,
            best_coverage: self.collector.best_coverage(),
            runs: self.driver.state().runs,
            perf: self.perf.take(),
        };

        if let Some(on_disk) = &self.on_disk {
            on_disk.store(&self.collector)?;
            on_disk.store_report(&report)?;
        }
        Ok(report)
    }

    /// Runs all accepted inputs in order and returns their joint coverage
    pub fn replay_coverage(&mut self) -> Result<f64, Error> {
        self.harness.compile(&mut self.perf)?;
        match self.collector.optimized_inputs().split_last() {
            None => Ok(0.0),
            Some((last, prior)) => self
                .harness
                .measure_cumulative(prior, last, &mut self.perf),
        }
    }

    /// Logs the suite, the best coverage, and the time spent per phase
    pub fn last_report(&self) {
        log::info!(
            "Test suite of {} samples, best coverage {:.2}",
            self.collector.len(),
            self.collector.best_coverage()
        );
        for holder in self.collector.holders() {
            let input = holder.input();
            if input.len() <= 8 {
                log::info!(
                    "  {} ({}): {:.2}",
                    input.key(),
                    bytes_to_int(input.bytes()),
                    holder.coverage()
                );
            } else {
                log::info!("  {}: {:.2}", input.key(), holder.coverage());
            }
        }
        log::info!("{}", self.perf);
    }

    /// The suite built so far
    #[must_use]
    pub fn test_suite(&self) -> TestSuite {
        self.collector.test_suite()
    }

    /// The collector
    #[must_use]
    pub fn collector(&self) -> &SampleCollector {
        &self.collector
    }

    /// The search driver
    #[must_use]
    pub fn driver(&self) -> &SearchDriver {
        &self.driver
    }

    /// The harness
    #[must_use]
    pub fn harness(&self) -> &H {
        &self.harness
    }

    /// The harness (mutable)
    pub fn harness_mut(&mut self) -> &mut H {
        &mut self.harness
    }

    /// Time spent per phase since the last report
    #[must_use]
    pub fn perf(&self) -> &PerfStats {
        &self.perf
    }

    /// Why the last [`Fuzzer::generate_testsuite`] stopped
    #[must_use]
    pub fn stop_reason(&self) -> Option<&StopReason> {
        self.stop_reason.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        corpus::ondisk::{INPUTS_DIR, REPORT_FILE, SUITE_FILE},
        driver::{SearchConfig, SearchPhase},
        executors::{ExitKind, Harness, InProcessHarness},
        fuzzer::{FuzzReport, Fuzzer, FuzzerConfig, StopReason},
        inputs::EncodedInput,
        monitors::{PerfFeature, PerfStats},
        optimizers::CmaEsConfig,
        Error,
    };

    fn cmaes(dim: usize) -> CmaEsConfig {
        CmaEsConfig::builder()
            .mean(vec![128.0; dim])
            .seed(11)
            .build()
    }

    /// Fails on the n-th execution
    #[derive(Debug)]
    struct FlakyHarness {
        executions: usize,
        fail_at: usize,
    }

    impl Harness for FlakyHarness {
        fn compile(&mut self, _perf: &mut PerfStats) -> Result<(), Error> {
            Ok(())
        }

        fn execute(
            &mut self,
            _input: &EncodedInput,
            _perf: &mut PerfStats,
        ) -> Result<ExitKind, Error> {
            self.executions += 1;
            if self.executions == self.fail_at {
                return Err(Error::unknown("target vanished"));
            }
            Ok(ExitKind::Ok)
        }

        fn extract_coverage(&mut self, _perf: &mut PerfStats) -> Result<f64, Error> {
            Ok(self.executions as f64)
        }

        fn reset(&mut self, _perf: &mut PerfStats) -> Result<(), Error> {
            Ok(())
        }
    }

    /// Never compiles
    #[derive(Debug)]
    struct BrokenHarness;

    impl Harness for BrokenHarness {
        fn compile(&mut self, _perf: &mut PerfStats) -> Result<(), Error> {
            Err(Error::compile("test.c:1: error"))
        }

        fn execute(
            &mut self,
            _input: &EncodedInput,
            _perf: &mut PerfStats,
        ) -> Result<ExitKind, Error> {
            unreachable!()
        }

        fn extract_coverage(&mut self, _perf: &mut PerfStats) -> Result<f64, Error> {
            unreachable!()
        }

        fn reset(&mut self, _perf: &mut PerfStats) -> Result<(), Error> {
            unreachable!()
        }
    }

    #[test]
    fn test_compile_error_is_fatal() {
        let mut fuzzer = Fuzzer::new(BrokenHarness, cmaes(4), FuzzerConfig::default()).unwrap();
        assert!(matches!(
            fuzzer.generate_testsuite(),
            Err(Error::Compile(_, _))
        ));
        assert!(fuzzer.stop_reason().is_none());
    }

    #[test]
    fn test_interrupted_keeps_progress() {
        let harness = FlakyHarness {
            executions: 0,
            fail_at: 35,
        };
        let mut fuzzer = Fuzzer::new(harness, cmaes(2), FuzzerConfig::default()).unwrap();

        let report = fuzzer.generate_testsuite().unwrap();
        assert!(matches!(report.stop_reason, StopReason::Interrupted(_)));
        // the first two generations complete, each improving on the last
        assert_eq!(report.test_suite.len(), 2);
        assert_eq!(fuzzer.collector().len(), 2);
        assert_eq!(fuzzer.driver().state().phase, SearchPhase::Interrupted);
    }

    #[test]
    fn test_saturation_and_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = FuzzerConfig {
            saturation: 1.0,
            log_dir: Some(dir.path().join("out")),
            ..FuzzerConfig::default()
        };
        let harness = InProcessHarness::new(|bytes: &[u8]| f64::from(bytes[0] > 0));
        let mut fuzzer = Fuzzer::new(harness, cmaes(1), config).unwrap();

        let report = fuzzer.generate_testsuite().unwrap();
        assert_eq!(report.stop_reason, StopReason::Saturated);
        assert_eq!(report.best_coverage, 1.0);
        assert_eq!(report.test_suite.len(), 1);
        assert_eq!(report.runs, 1);
        assert!(report.perf.feature_count(PerfFeature::Execute) >= 1);
        // the report took the timings
        assert_eq!(fuzzer.perf().feature_count(PerfFeature::Execute), 0);

        let out = dir.path().join("out");
        assert!(out.join(SUITE_FILE).exists());
        assert_eq!(std::fs::read_dir(out.join(INPUTS_DIR)).unwrap().count(), 1);
        let stored: FuzzReport =
            serde_json::from_slice(&std::fs::read(out.join(REPORT_FILE)).unwrap()).unwrap();
        assert_eq!(stored, report);

        assert_eq!(fuzzer.replay_coverage().unwrap(), 1.0);
    }

    #[test]
    fn test_max_samples() {
        // every generation reaches one level deeper
        let mut level = 0.0;
        let harness = InProcessHarness::new(move |_: &[u8]| {
            level += 0.1;
            level
        });
        let config = FuzzerConfig {
            max_sample_size: 3,
            search: SearchConfig::builder().max_generations(50).build(),
            ..FuzzerConfig::default()
        };
        let mut fuzzer = Fuzzer::new(harness, cmaes(2), config).unwrap();

        let report = fuzzer.generate_testsuite().unwrap();
        assert_eq!(report.stop_reason, StopReason::MaxSamples);
        assert_eq!(report.test_suite.len(), 3);
        let coverages: Vec<f64> = report.test_suite.iter().map(|(_, cov)| cov).collect();
        assert!(coverages.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_empty_replay() {
        let harness = InProcessHarness::new(|_: &[u8]| 3.0);
        let mut fuzzer = Fuzzer::new(harness, cmaes(1), FuzzerConfig::default()).unwrap();
        assert_eq!(fuzzer.replay_coverage().unwrap(), 0.0);
        assert!(Fuzzer::new(
            InProcessHarness::new(|_: &[u8]| 3.0),
            cmaes(1),
            FuzzerConfig {
                max_sample_size: 0,
                ..FuzzerConfig::default()
            }
        )
        .is_err());
    }
}
