//! The search driver: generations of ask, evaluate, tell.
//!
//! A search is a sequence of runs. Every run starts a fresh optimizer and
//! lasts until the optimizer stops (after more than `min_generations`) or
//! `max_generations` are done. A run that accepted nothing escalates: the
//! next run gets a ten times bigger population, until `max_popsize`.

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    corpus::{ResetMode, SampleCollector, SampleHolder},
    executors::Harness,
    inputs::encode,
    monitors::{PerfFeature, PerfStats},
    optimizers::{Optimizer, OptimizerFactory},
    Error,
};

/// Factor applied to the population size of a run that found nothing
pub const ESCALATION_FACTOR: usize = 10;

/// How a candidate is scored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum FitnessMode {
    /// Coverage of all accepted inputs followed by the candidate
    #[default]
    Cumulative,
    /// Coverage of the candidate alone
    Standalone,
}

/// Configuration of a [`SearchDriver`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct SearchConfig {
    /// Population size of the first run of every search
    #[builder(default = 10)]
    pub popsize: usize,
    /// Escalation never goes beyond this
    #[builder(default = 1000)]
    pub max_popsize: usize,
    /// An optimizer stop is ignored until more than this many generations ran
    #[builder(default = 10)]
    pub min_generations: u64,
    /// Hard limit of generations per run
    #[builder(default = 100)]
    pub max_generations: u64,
    /// Whether a run without improvement escalates the population size
    #[builder(default = true)]
    pub escalate: bool,
    /// What escalation does to the accepted samples
    #[builder(default)]
    pub reset_mode: ResetMode,
    /// How candidates are scored
    #[builder(default)]
    pub fitness_mode: FitnessMode,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Where the driver is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SearchPhase {
    /// No run started yet
    #[default]
    Initialized,
    /// Inside a run
    Running,
    /// The last run ended and accepted samples
    Converged,
    /// The collector is full or saturated
    ThresholdReached,
    /// The largest population found nothing
    PopsizeExhausted,
    /// An error ended the last run
    Interrupted,
}

/// How a search ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchOutcome {
    /// A run accepted samples and stopped
    Converged,
    /// The collector is full or saturated
    ThresholdReached,
    /// The largest population found nothing, or escalation is off
    PopsizeExhausted,
}

/// The mutable state of the current run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchState {
    /// Population size of the current run
    pub popsize: usize,
    /// Generations done in the current run
    pub generation: u64,
    /// Best coverage seen in the current run
    pub run_best: f64,
    /// Samples accepted in the current run
    pub improvements: usize,
    /// Runs started so far, over all searches
    pub runs: u64,
    /// Current phase
    pub phase: SearchPhase,
}

impl SearchState {
    fn new(popsize: usize) -> Self {
        Self {
            popsize,
            generation: 0,
            run_best: f64::NEG_INFINITY,
            improvements: 0,
            runs: 0,
            phase: SearchPhase::Initialized,
        }
    }
}

/// Runs the optimizer against a [`Harness`], feeding a [`SampleCollector`]
#[derive(Debug, Clone)]
pub struct SearchDriver {
    config: SearchConfig,
    state: SearchState,
}

impl SearchDriver {
    /// Create a new driver
    pub fn new(config: SearchConfig) -> Result<Self, Error> {
        if config.popsize == 0 || config.max_popsize < config.popsize {
            return Err(Error::illegal_argument(format!(
                "popsize {} must be in 1..={}",
                config.popsize, config.max_popsize
            )));
        }
        if config.max_generations < config.min_generations {
            return Err(Error::illegal_argument(format!(
                "max_generations {} below min_generations {}",
                config.max_generations, config.min_generations
            )));
        }
        let state = SearchState::new(config.popsize);
        Ok(Self { config, state })
    }

    /// The configuration
    #[must_use]
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// The state of the current, or last, run
    #[must_use]
    pub fn state(&self) -> &SearchState {
        &self.state
    }

    /// Records that an error ended the last run
    pub fn interrupt(&mut self) {
        self.state.phase = SearchPhase::Interrupted;
    }

    /// Runs until a run accepts samples, the collector is done, or the
    /// population cannot grow anymore.
    pub fn search<H, OF>(
        &mut self,
        harness: &mut H,
        factory: &mut OF,
        collector: &mut SampleCollector,
        perf: &mut PerfStats,
    ) -> Result<SearchOutcome, Error>
    where
        H: Harness,
        OF: OptimizerFactory,
    {
        self.state.popsize = self.config.popsize;

        loop {
            if let Some(outcome) = self.run(harness, factory, collector, perf)? {
                return Ok(outcome);
            }

            if !self.config.escalate || self.state.popsize >= self.config.max_popsize {
                log::info!(
                    "No improvement with popsize {}, giving up",
                    self.state.popsize
                );
                self.state.phase = SearchPhase::PopsizeExhausted;
                return Ok(SearchOutcome::PopsizeExhausted);
            }

            if self.config.reset_mode == ResetMode::Reset {
                collector.reset();
            }
            let popsize = self
                .state
                .popsize
                .saturating_mul(ESCALATION_FACTOR)
                .min(self.config.max_popsize);
            log::info!("Increasing popsize to {popsize}");
            self.state.popsize = popsize;
        }
    }

    /// One run at the current population size. `None` if it accepted nothing.
    fn run<H, OF>(
        &mut self,
        harness: &mut H,
        factory: &mut OF,
        collector: &mut SampleCollector,
        perf: &mut PerfStats,
    ) -> Result<Option<SearchOutcome>, Error>
    where
        H: Harness,
        OF: OptimizerFactory,
    {
        let mut optimizer = factory.create(self.state.popsize)?;
        self.state.generation = 0;
        self.state.run_best = f64::NEG_INFINITY;
        self.state.improvements = 0;
        self.state.runs += 1;
        self.state.phase = SearchPhase::Running;
        log::info!(
            "Run {} with popsize {}, {} samples accepted so far",
            self.state.runs,
            self.state.popsize,
            collector.len()
        );

        let res = self.generations(harness, &mut optimizer, collector, perf);
        if res.is_err() {
            self.state.phase = SearchPhase::Interrupted;
        }
        let outcome = res?;

        log::info!(
            "Run {} ended after {} generations ({} evaluations), best coverage {:.2}, {} accepted",
            self.state.runs,
            self.state.generation,
            optimizer.result().evaluations,
            self.state.run_best,
            self.state.improvements
        );
        self.state.phase = match outcome {
            Some(SearchOutcome::ThresholdReached) => SearchPhase::ThresholdReached,
            Some(_) => SearchPhase::Converged,
            None => SearchPhase::Initialized,
        };
        Ok(outcome)
    }

    fn generations<H, O>(
        &mut self,
        harness: &mut H,
        optimizer: &mut O,
        collector: &mut SampleCollector,
        perf: &mut PerfStats,
    ) -> Result<Option<SearchOutcome>, Error>
    where
        H: Harness,
        O: Optimizer,
    {
        loop {
            if self.state.generation >= self.config.max_generations {
                break;
            }
            if optimizer.stop() && self.state.generation > self.config.min_generations {
                break;
            }

            perf.start_timer();
            let population = optimizer.ask();
            perf.mark_feature_time(PerfFeature::Ask);

            let mut fitness = Vec::with_capacity(population.len());
            let mut best: Option<(usize, f64)> = None;
            for (idx, sample) in population.iter().enumerate() {
                let input = encode(sample);
                let coverage = match self.config.fitness_mode {
                    FitnessMode::Cumulative => {
                        harness.measure_cumulative(collector.optimized_inputs(), &input, perf)?
                    }
                    FitnessMode::Standalone => harness.measure(&input, perf)?,
                };
                fitness.push(-coverage);
                if best.map_or(true, |(_, cov)| coverage > cov) {
                    best = Some((idx, coverage));
                }
            }

            perf.start_timer();
            let told = optimizer.tell(&population, &fitness);
            perf.mark_feature_time(PerfFeature::Tell);
            told?;
            self.state.generation += 1;

            let Some((idx, coverage)) = best else {
                continue;
            };
            log::debug!(
                "Generation {}: best coverage {coverage:.2}, run best {:.2}",
                self.state.generation,
                self.state.run_best
            );

            if coverage > self.state.run_best {
                self.state.run_best = coverage;
                if collector.check_interesting(coverage) {
                    let sample = &population[idx];
                    let holder = SampleHolder::new(
                        sample.clone(),
                        encode(sample),
                        coverage,
                        optimizer.result().stds.clone(),
                        self.state.generation,
                        self.state.popsize,
                    );
                    if collector.add_best(holder) {
                        self.state.improvements += 1;
                    }
                }
            }

            if collector.is_full() || collector.is_saturated() {
                return Ok(Some(SearchOutcome::ThresholdReached));
            }
        }

        Ok((self.state.improvements > 0).then_some(SearchOutcome::Converged))
    }
}
