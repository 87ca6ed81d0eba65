//! Command line options shared by `cmafuzz` based fuzzers
//!
//! ```ignore
//! use cmafuzz::cli::parse_args;
//!
//! fn main() {
//!     let options = parse_args();
//!     let harness = options.harness_builder().build().unwrap();
//!     // ...
//! }
//! ```

use core::time::Duration;
use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::{
    corpus::ResetMode,
    driver::{FitnessMode, SearchConfig},
    executors::GcovHarnessBuilder,
    fuzzer::FuzzerConfig,
    observers::CoverageKind,
    optimizers::CmaEsConfig,
    Error,
};

/// helper function to go from a parsed cli string to a `Duration`
fn parse_timeout(src: &str) -> Result<Duration, Error> {
    Ok(Duration::from_millis(src.parse()?))
}

/// Top-level container for cli options
#[derive(Parser, Clone, Debug, Serialize, Deserialize)]
#[command(arg_required_else_help(true))]
pub struct FuzzerOptions {
    /// The C source of the target
    #[arg(short, long, help_heading = "Target Options")]
    pub program: PathBuf,

    /// The source implementing the input functions of the target
    #[arg(short, long, help_heading = "Target Options")]
    pub shim: Option<PathBuf>,

    /// Where the instrumented binary goes
    #[arg(long, default_value = "build", help_heading = "Target Options")]
    pub build_dir: PathBuf,

    /// Where the target runs and leaves its coverage data
    #[arg(long, default_value = ".", help_heading = "Target Options")]
    pub work_dir: PathBuf,

    /// The C compiler
    #[arg(long, default_value = "gcc", help_heading = "Target Options")]
    pub cc: String,

    /// The coverage tool
    #[arg(long, default_value = "gcov", help_heading = "Target Options")]
    pub coverage_tool: String,

    /// Which coverage to maximize
    #[arg(short, long, value_enum, default_value_t = CoverageKind::Line, help_heading = "Target Options")]
    pub coverage: CoverageKind,

    /// Timeout for each target execution (milliseconds)
    #[arg(short, long, value_parser = parse_timeout, help_heading = "Target Options")]
    pub timeout: Option<Duration>,

    /// Initial mean of every component
    #[arg(long, default_value = "128", help_heading = "Optimizer Options")]
    pub mean: f64,

    /// Initial step size
    #[arg(long, default_value = "64", help_heading = "Optimizer Options")]
    pub sigma: f64,

    /// Bytes per sample
    #[arg(short, long, default_value = "4", help_heading = "Optimizer Options")]
    pub dim: usize,

    /// Samples concatenated into one input
    #[arg(long, default_value = "1", help_heading = "Optimizer Options")]
    pub sample_size: usize,

    /// Lower bound of every component
    #[arg(long, default_value = "0", help_heading = "Optimizer Options")]
    pub lower: f64,

    /// Upper bound of every component
    #[arg(long, default_value = "255.99", help_heading = "Optimizer Options")]
    pub upper: f64,

    /// Seed of the first optimizer, random if not given
    #[arg(long, help_heading = "Optimizer Options")]
    pub seed: Option<u64>,

    /// Population size of the first run
    #[arg(long, default_value = "10", help_heading = "Search Options")]
    pub popsize: usize,

    /// Escalation never goes beyond this population size
    #[arg(long, default_value = "1000", help_heading = "Search Options")]
    pub max_popsize: usize,

    /// An optimizer stop is ignored until more than this many generations ran
    #[arg(long, default_value = "10", help_heading = "Search Options")]
    pub min_generations: u64,

    /// Hard limit of generations per run
    #[arg(long, default_value = "100", help_heading = "Search Options")]
    pub max_generations: u64,

    /// Do not grow the population of a run without improvement
    #[arg(long, help_heading = "Search Options")]
    pub no_escalation: bool,

    /// How a candidate is scored
    #[arg(long, value_enum, default_value_t = FitnessMode::Cumulative, help_heading = "Search Options")]
    pub fitness: FitnessMode,

    /// What escalation does to the accepted samples
    #[arg(long, value_enum, default_value_t = ResetMode::Keep, help_heading = "Search Options")]
    pub reset: ResetMode,

    /// The suite is done with this many samples
    #[arg(short, long, default_value = "10", help_heading = "Suite Options")]
    pub max_sample_size: usize,

    /// The suite is done once coverage reaches this
    #[arg(long, default_value = "100", help_heading = "Suite Options")]
    pub saturation: f64,

    /// Where to write the suite, the inputs and the report
    #[arg(short, long, help_heading = "Suite Options")]
    pub output: Option<PathBuf>,

    /// Whether or not to print debug info
    #[arg(short, long)]
    pub verbose: bool,

    /// Keep the output of the compiler and the target
    #[arg(long)]
    pub debug_child: bool,
}

impl FuzzerOptions {
    /// The length of the searched vectors
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dim * self.sample_size
    }

    /// The optimizer configuration
    #[must_use]
    pub fn cmaes_config(&self) -> CmaEsConfig {
        let mut config = CmaEsConfig::builder()
            .mean(vec![self.mean; self.dimension()])
            .sigma(self.sigma)
            .lower(self.lower)
            .upper(self.upper)
            .build();
        config.seed = self.seed;
        config
    }

    /// The search loop configuration
    #[must_use]
    pub fn search_config(&self) -> SearchConfig {
        SearchConfig::builder()
            .popsize(self.popsize)
            .max_popsize(self.max_popsize)
            .min_generations(self.min_generations)
            .max_generations(self.max_generations)
            .escalate(!self.no_escalation)
            .reset_mode(self.reset)
            .fitness_mode(self.fitness)
            .build()
    }

    /// The fuzzer configuration
    #[must_use]
    pub fn fuzzer_config(&self) -> FuzzerConfig {
        FuzzerConfig {
            max_sample_size: self.max_sample_size,
            saturation: self.saturation,
            search: self.search_config(),
            log_dir: self.output.clone(),
        }
    }

    /// A builder for the target's harness
    #[must_use]
    pub fn harness_builder(&self) -> GcovHarnessBuilder {
        let mut builder = GcovHarnessBuilder::new()
            .program(&self.program)
            .build_dir(&self.build_dir)
            .work_dir(&self.work_dir)
            .cc(self.cc.as_str())
            .coverage_tool(self.coverage_tool.as_str())
            .coverage_kind(self.coverage)
            .timeout(self.timeout)
            .debug_child(self.debug_child);
        if let Some(shim) = &self.shim {
            builder = builder.shim(shim);
        }
        builder
    }
}

/// Parse from `std::env::args_os()`, exit on error
#[must_use]
pub fn parse_args() -> FuzzerOptions {
    FuzzerOptions::parse()
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use clap::Parser;

    use super::{parse_timeout, FuzzerOptions};
    use crate::{corpus::ResetMode, driver::FitnessMode, observers::CoverageKind};

    #[test]
    fn test_defaults() {
        let options = FuzzerOptions::parse_from(["cmafuzz", "-p", "programs/test.c"]);
        assert_eq!(options.dimension(), 4);
        assert_eq!(options.coverage, CoverageKind::Line);
        assert_eq!(options.timeout, None);

        let cmaes = options.cmaes_config();
        assert_eq!(cmaes.mean, vec![128.0; 4]);
        assert_eq!(cmaes.sigma, 64.0);
        assert_eq!(cmaes.upper, 255.99);
        assert_eq!(cmaes.seed, None);

        let fuzzer = options.fuzzer_config();
        assert_eq!(fuzzer.max_sample_size, 10);
        assert_eq!(fuzzer.saturation, 100.0);
        assert_eq!(fuzzer.search.popsize, 10);
        assert_eq!(fuzzer.search.max_popsize, 1000);
        assert!(fuzzer.search.escalate);
        assert_eq!(fuzzer.search.reset_mode, ResetMode::Keep);
        assert_eq!(fuzzer.search.fitness_mode, FitnessMode::Cumulative);
        assert!(fuzzer.log_dir.is_none());
    }

    #[test]
    fn test_options() {
        let options = FuzzerOptions::parse_from([
            "cmafuzz",
            "--program",
            "test.c",
            "--shim",
            "__VERIFIER.c",
            "--coverage",
            "branch",
            "--dim",
            "2",
            "--sample-size",
            "3",
            "--seed",
            "5",
            "--timeout",
            "250",
            "--reset",
            "reset",
            "--fitness",
            "standalone",
            "--no-escalation",
            "-o",
            "out",
        ]);
        assert_eq!(options.dimension(), 6);
        assert_eq!(options.coverage, CoverageKind::Branch);
        assert_eq!(options.timeout, Some(Duration::from_millis(250)));
        assert_eq!(options.cmaes_config().seed, Some(5));

        let search = options.search_config();
        assert!(!search.escalate);
        assert_eq!(search.reset_mode, ResetMode::Reset);
        assert_eq!(search.fitness_mode, FitnessMode::Standalone);

        let harness = options.harness_builder().build().unwrap();
        assert_eq!(harness.name(), "test");
        assert_eq!(harness.coverage_kind(), CoverageKind::Branch);
    }

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout("1000").unwrap(), Duration::from_secs(1));
        assert!(parse_timeout("1s").is_err());
    }
}
