//! Optimizers propose [`Sample`]s and learn from their fitness.
//!
//! The search loop only talks to the ask/tell [`Optimizer`] interface, every
//! run gets a fresh instance from an [`OptimizerFactory`].

pub mod cmaes;
pub use cmaes::{CmaEsConfig, SepCmaEs, Termination};

use serde::{Deserialize, Serialize};

use crate::{inputs::Sample, Error};

/// What an [`Optimizer`] found so far
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizerResult {
    /// Best sample evaluated, empty before the first `tell`
    pub xbest: Sample,
    /// Fitness of `xbest`, lower is better
    pub fbest: f64,
    /// Number of completed generations
    pub iterations: u64,
    /// Number of fitness values told
    pub evaluations: u64,
    /// Current per-dimension standard deviations
    pub stds: Vec<f64>,
}

/// A population-based minimizer over a bounded box.
pub trait Optimizer {
    /// Proposes the next generation, every component inside the bounds
    fn ask(&mut self) -> Vec<Sample>;

    /// Reports the fitness of a generation, `fitness[i]` belonging to `samples[i]`
    fn tell(&mut self, samples: &[Sample], fitness: &[f64]) -> Result<(), Error>;

    /// `true` once the optimizer considers itself converged or out of budget
    fn stop(&self) -> bool;

    /// Best solution and bookkeeping
    fn result(&self) -> &OptimizerResult;
}

/// Creates fresh [`Optimizer`]s sharing one configuration
pub trait OptimizerFactory {
    /// The optimizer this factory creates
    type Optimizer: Optimizer;

    /// A new optimizer with `popsize` samples per generation
    fn create(&mut self, popsize: usize) -> Result<Self::Optimizer, Error>;
}
