//! The collector of accepted samples, the test suite under construction.

pub mod testsuite;
pub use testsuite::TestSuite;

pub mod ondisk;
pub use ondisk::OnDiskSuite;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::inputs::{EncodedInput, Sample};

/// What happens to the accepted samples when the search has to escalate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum ResetMode {
    /// Keep the samples, later runs build on top of them
    #[default]
    Keep,
    /// Drop the samples and start over with a bigger population
    Reset,
}

/// An accepted sample together with the state of the search that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleHolder {
    sample: Sample,
    input: EncodedInput,
    coverage: f64,
    stds: Vec<f64>,
    generation: u64,
    popsize: usize,
}

impl SampleHolder {
    /// Holds `sample`, encoded as `input`, reaching `coverage`
    #[must_use]
    pub fn new(
        sample: Sample,
        input: EncodedInput,
        coverage: f64,
        stds: Vec<f64>,
        generation: u64,
        popsize: usize,
    ) -> Self {
        Self {
            sample,
            input,
            coverage,
            stds,
            generation,
            popsize,
        }
    }

    /// The optimizer's sample
    #[must_use]
    pub fn sample(&self) -> &Sample {
        &self.sample
    }

    /// The bytes given to the target
    #[must_use]
    pub fn input(&self) -> &EncodedInput {
        &self.input
    }

    /// The cumulative coverage when this sample was accepted
    #[must_use]
    pub fn coverage(&self) -> f64 {
        self.coverage
    }

    /// The optimizer's standard deviations when this sample was accepted
    #[must_use]
    pub fn stds(&self) -> &[f64] {
        &self.stds
    }

    /// The generation that produced this sample
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The population size of the producing run
    #[must_use]
    pub fn popsize(&self) -> usize {
        self.popsize
    }
}

/// Accumulates the samples that raised coverage.
///
/// Accepted coverage is strictly increasing, and no two samples share an
/// input.
#[derive(Debug, Clone)]
pub struct SampleCollector {
    holders: Vec<SampleHolder>,
    inputs: Vec<EncodedInput>,
    keys: HashMap<String, usize>,
    best_coverage: f64,
    max_samples: usize,
    saturation: f64,
}

impl SampleCollector {
    /// Collects up to `max_samples`, coverage of `saturation` means done
    #[must_use]
    pub fn new(max_samples: usize, saturation: f64) -> Self {
        Self {
            holders: vec![],
            inputs: vec![],
            keys: HashMap::new(),
            best_coverage: 0.0,
            max_samples,
            saturation,
        }
    }

    /// Whether `coverage` beats everything seen so far. If it does, it becomes
    /// the new best.
    pub fn check_interesting(&mut self, coverage: f64) -> bool {
        if coverage > self.best_coverage {
            self.best_coverage = coverage;
            true
        } else {
            false
        }
    }

    /// Accepts `holder` into the suite.
    ///
    /// Returns `false` for an input that is already part of the suite, or
    /// for a coverage not above the last accepted one.
    pub fn add_best(&mut self, holder: SampleHolder) -> bool {
        let key = holder.input.key();
        if self.keys.contains_key(&key) {
            log::debug!("Input {key} is already part of the suite");
            return false;
        }
        if let Some(last) = self.holders.last() {
            if holder.coverage <= last.coverage {
                log::warn!(
                    "Rejecting {key}: coverage {} does not improve on {}",
                    holder.coverage,
                    last.coverage
                );
                return false;
            }
        }

        log::info!(
            "Accepted sample {} ({key}) with coverage {:.2}",
            self.holders.len(),
            holder.coverage
        );
        self.keys.insert(key, self.holders.len());
        self.inputs.push(holder.input.clone());
        self.holders.push(holder);
        true
    }

    /// Accepted inputs, in insertion order
    #[must_use]
    pub fn optimized_inputs(&self) -> &[EncodedInput] {
        &self.inputs
    }

    /// Accepted samples, in insertion order
    pub fn optimized_samples(&self) -> impl Iterator<Item = &Sample> {
        self.holders.iter().map(SampleHolder::sample)
    }

    /// Accepted holders, in insertion order
    #[must_use]
    pub fn holders(&self) -> &[SampleHolder] {
        &self.holders
    }

    /// The holder accepted for `input`, if any
    #[must_use]
    pub fn get(&self, input: &EncodedInput) -> Option<&SampleHolder> {
        self.keys.get(&input.key()).map(|idx| &self.holders[*idx])
    }

    /// Drops all accepted samples.
    ///
    /// The best coverage stays, a restarted search has to beat it again.
    pub fn reset(&mut self) {
        log::info!("Dropping {} accepted samples", self.holders.len());
        self.holders.clear();
        self.inputs.clear();
        self.keys.clear();
    }

    /// The best coverage ever accepted, `0.0` at the start
    #[must_use]
    pub fn best_coverage(&self) -> f64 {
        self.best_coverage
    }

    /// Number of accepted samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.holders.len()
    }

    /// `true` if nothing was accepted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }

    /// The configured maximum number of samples
    #[must_use]
    pub fn max_samples(&self) -> usize {
        self.max_samples
    }

    /// `true` once `max_samples` samples were accepted
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.holders.len() >= self.max_samples
    }

    /// `true` once the best coverage reached the saturation threshold
    #[must_use]
    pub fn is_saturated(&self) -> bool {
        self.best_coverage >= self.saturation
    }

    /// The suite built so far
    #[must_use]
    pub fn test_suite(&self) -> TestSuite {
        let mut suite = TestSuite::new();
        for holder in &self.holders {
            suite.insert(holder.input.key(), holder.coverage);
        }
        suite
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        corpus::{SampleCollector, SampleHolder},
        inputs::{encode, EncodedInput},
    };

    fn holder(sample: Vec<f64>, coverage: f64) -> SampleHolder {
        let input = encode(&sample);
        SampleHolder::new(sample, input, coverage, vec![64.0; 4], 1, 10)
    }

    #[test]
    fn test_check_interesting_is_strict() {
        let mut collector = SampleCollector::new(10, 100.0);
        assert!(!collector.check_interesting(0.0));
        assert!(collector.check_interesting(50.0));
        assert!(!collector.check_interesting(50.0));
        assert!(!collector.check_interesting(49.0));
        assert_eq!(collector.best_coverage(), 50.0);
    }

    #[test]
    fn test_add_best() {
        let mut collector = SampleCollector::new(2, 100.0);
        assert!(collector.check_interesting(50.0));
        assert!(collector.add_best(holder(vec![26.3, 0.0, 0.0, 0.0], 50.0)));
        // same bytes, different sample
        assert!(!collector.add_best(holder(vec![26.9, 0.5, 0.0, 0.0], 75.0)));
        // no improvement
        assert!(!collector.add_best(holder(vec![1.0, 0.0, 0.0, 0.0], 50.0)));
        assert_eq!(collector.len(), 1);
        assert!(!collector.is_full());

        assert!(collector.check_interesting(75.0));
        assert!(collector.add_best(holder(vec![0.0, 0.0, 1.0, 0.0], 75.0)));
        assert!(collector.is_full());

        assert_eq!(
            collector.optimized_inputs(),
            &[
                EncodedInput::new(vec![26, 0, 0, 0]),
                EncodedInput::new(vec![0, 0, 1, 0])
            ]
        );
        assert_eq!(collector.optimized_samples().count(), 2);
        let suite = collector.test_suite();
        assert_eq!(suite.get("1a000000"), Some(50.0));
        assert_eq!(suite.get("00000100"), Some(75.0));
        assert_eq!(
            collector
                .get(&EncodedInput::new(vec![0, 0, 1, 0]))
                .map(SampleHolder::coverage),
            Some(75.0)
        );
    }

    #[test]
    fn test_reset_keeps_best() {
        let mut collector = SampleCollector::new(10, 75.0);
        assert!(collector.check_interesting(75.0));
        assert!(collector.add_best(holder(vec![1.0; 4], 75.0)));
        assert!(collector.is_saturated());

        collector.reset();
        assert!(collector.is_empty());
        assert!(collector.optimized_inputs().is_empty());
        assert!(collector.test_suite().is_empty());
        assert_eq!(collector.best_coverage(), 75.0);
        assert!(!collector.check_interesting(75.0));
        // the key is free again
        assert!(collector.check_interesting(80.0));
        assert!(collector.add_best(holder(vec![1.0; 4], 80.0)));
    }
}
