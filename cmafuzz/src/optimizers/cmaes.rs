//! Separable CMA-ES.
//!
//! The covariance matrix is kept diagonal, so a generation costs
//! `O(popsize * dim)`. Samples are clipped into the box `[lower, upper]`, and
//! the update uses the clipped points, which keeps the mean inside the box.

use core::cmp::Ordering;
use std::collections::VecDeque;

use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    inputs::Sample,
    optimizers::{Optimizer, OptimizerFactory, OptimizerResult},
    Error,
};

/// Floor for the diagonal of the covariance, keeps the `ps` update finite
const MIN_VARIANCE: f64 = 1e-20;

/// Configuration shared by all [`SepCmaEs`] instances of a search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct CmaEsConfig {
    /// Initial mean, its length is the search dimension
    pub mean: Vec<f64>,
    /// Initial step size
    #[builder(default = 64.0)]
    pub sigma: f64,
    /// Lower bound of every component
    #[builder(default = 0.0)]
    pub lower: f64,
    /// Upper bound of every component
    #[builder(default = 255.99)]
    pub upper: f64,
    /// Seed of the first instance, the n-th one uses `seed + n`. Random if `None`.
    #[builder(default = None, setter(strip_option))]
    pub seed: Option<u64>,
    /// Stop once recent best fitness values stay within this range
    #[builder(default = 1e-11)]
    pub tolfun: f64,
    /// Stop once every step in sample space is below this
    #[builder(default = 1e-11)]
    pub tolx: f64,
    /// Generation budget, derived from dimension and popsize if `None`
    #[builder(default = None, setter(strip_option))]
    pub max_iterations: Option<u64>,
    #[builder(default, setter(skip))]
    #[serde(skip)]
    instances: u64,
}

impl CmaEsConfig {
    /// The dimension of the search space
    #[must_use]
    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    fn validate(&self, popsize: usize) -> Result<(), Error> {
        if self.mean.is_empty() {
            return Err(Error::illegal_argument("the initial mean is empty"));
        }
        if !(self.sigma.is_finite() && self.sigma > 0.0) {
            return Err(Error::illegal_argument(format!(
                "sigma must be positive, got {}",
                self.sigma
            )));
        }
        if self.lower.partial_cmp(&self.upper) != Some(Ordering::Less) {
            return Err(Error::illegal_argument(format!(
                "empty bounds [{}, {}]",
                self.lower, self.upper
            )));
        }
        if popsize < 2 {
            return Err(Error::illegal_argument(format!(
                "popsize must be at least 2, got {popsize}"
            )));
        }
        Ok(())
    }
}

impl OptimizerFactory for CmaEsConfig {
    type Optimizer = SepCmaEs;

    fn create(&mut self, popsize: usize) -> Result<SepCmaEs, Error> {
        let seed = match self.seed {
            Some(seed) => seed.wrapping_add(self.instances),
            None => rand::random(),
        };
        self.instances += 1;
        SepCmaEs::new(self, popsize, seed)
    }
}

/// Why a [`SepCmaEs`] stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// The generation budget is used up
    MaxIter,
    /// The best fitness values of the last generations are all equal
    TolFun,
    /// The distribution collapsed to a point
    TolX,
    /// Step size or covariance stopped being finite
    Degenerate,
}

/// CMA-ES with a diagonal covariance matrix, minimizing.
#[derive(Debug, Clone)]
pub struct SepCmaEs {
    dim: usize,
    lambda: usize,
    mu: usize,
    weights: Vec<f64>,
    mueff: f64,

    cs: f64,
    ds: f64,
    cc: f64,
    c1: f64,
    cmu: f64,
    /// Expectation of `||N(0, I)||`
    chi_n: f64,

    lower: f64,
    upper: f64,
    tolfun: f64,
    tolx: f64,
    max_iterations: u64,
    hist_len: usize,

    mean: Vec<f64>,
    sigma: f64,
    diag_c: Vec<f64>,
    ps: Vec<f64>,
    pc: Vec<f64>,

    rng: StdRng,
    /// Best fitness per generation, newest first
    best_history: VecDeque<f64>,
    last_fitness: Vec<f64>,
    result: OptimizerResult,
}

impl SepCmaEs {
    /// A fresh optimizer drawing `popsize` samples per generation
    pub fn new(config: &CmaEsConfig, popsize: usize, seed: u64) -> Result<Self, Error> {
        config.validate(popsize)?;

        let dim = config.dim();
        let n = dim as f64;
        let lambda = popsize;
        let mu = lambda / 2;

        let mut weights: Vec<f64> = (0..mu)
            .map(|i| (mu as f64 + 0.5).ln() - ((i + 1) as f64).ln())
            .collect();
        let weight_sum: f64 = weights.iter().sum();
        for w in &mut weights {
            *w /= weight_sum;
        }
        let mueff = 1.0 / weights.iter().map(|w| w * w).sum::<f64>();

        let cs = (mueff + 2.0) / (n + mueff + 5.0);
        let ds = 1.0 + 2.0 * (((mueff - 1.0) / (n + 1.0)).sqrt() - 1.0).max(0.0) + cs;
        let cc = (4.0 + mueff / n) / (n + 4.0 + 2.0 * mueff / n);
        // the diagonal model learns faster than the full one
        let c1_full = 2.0 / ((n + 1.3).powi(2) + mueff);
        let cmu_full = (1.0 - c1_full)
            .min(2.0 * (mueff - 2.0 + 1.0 / mueff) / ((n + 2.0).powi(2) + mueff));
        let c1 = (c1_full * (n + 2.0) / 3.0).min(1.0);
        let cmu = (cmu_full * (n + 2.0) / 3.0).min(1.0 - c1);
        let chi_n = n.sqrt() * (1.0 - 1.0 / (4.0 * n) + 1.0 / (21.0 * n * n));

        let max_iterations = config.max_iterations.unwrap_or_else(|| {
            (100.0 + 150.0 * (n + 3.0).powi(2) / (lambda as f64).sqrt()).ceil() as u64
        });
        let hist_len = 10 + (30.0 * n / lambda as f64).ceil() as usize;

        let mean: Vec<f64> = config
            .mean
            .iter()
            .map(|m| m.clamp(config.lower, config.upper))
            .collect();

        Ok(Self {
            dim,
            lambda,
            mu,
            weights,
            mueff,
            cs,
            ds,
            cc,
            c1,
            cmu,
            chi_n,
            lower: config.lower,
            upper: config.upper,
            tolfun: config.tolfun,
            tolx: config.tolx,
            max_iterations,
            hist_len,
            mean,
            sigma: config.sigma,
            diag_c: vec![1.0; dim],
            ps: vec![0.0; dim],
            pc: vec![0.0; dim],
            rng: StdRng::seed_from_u64(seed),
            best_history: VecDeque::with_capacity(hist_len),
            last_fitness: vec![],
            result: OptimizerResult {
                fbest: f64::INFINITY,
                stds: vec![config.sigma; dim],
                ..OptimizerResult::default()
            },
        })
    }

    /// Samples per generation
    #[must_use]
    pub fn popsize(&self) -> usize {
        self.lambda
    }

    /// The dimension of the search space
    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// The current step size
    #[must_use]
    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// The current mean
    #[must_use]
    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    /// The first stop condition that holds, if any
    #[must_use]
    pub fn termination(&self) -> Option<Termination> {
        let iterations = self.result.iterations;
        if iterations >= self.max_iterations {
            return Some(Termination::MaxIter);
        }
        if !self.sigma.is_finite() || self.diag_c.iter().any(|c| !c.is_finite()) {
            return Some(Termination::Degenerate);
        }
        if iterations as usize >= self.hist_len {
            let (lo, hi) = self
                .best_history
                .iter()
                .chain(&self.last_fitness)
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), f| {
                    (lo.min(*f), hi.max(*f))
                });
            if hi - lo < self.tolfun {
                return Some(Termination::TolFun);
            }
        }
        if iterations > 0
            && self
                .diag_c
                .iter()
                .zip(&self.pc)
                .all(|(c, pc)| self.sigma * c.sqrt().max(pc.abs()) < self.tolx)
        {
            return Some(Termination::TolX);
        }
        None
    }
}

impl Optimizer for SepCmaEs {
    fn ask(&mut self) -> Vec<Sample> {
        (0..self.lambda)
            .map(|_| {
                (0..self.dim)
                    .map(|i| {
                        let z: f64 = self.rng.sample(StandardNormal);
                        (self.mean[i] + self.sigma * self.diag_c[i].sqrt() * z)
                            .clamp(self.lower, self.upper)
                    })
                    .collect()
            })
            .collect()
    }

    fn tell(&mut self, samples: &[Sample], fitness: &[f64]) -> Result<(), Error> {
        if samples.len() != fitness.len() {
            return Err(Error::illegal_argument(format!(
                "{} samples but {} fitness values",
                samples.len(),
                fitness.len()
            )));
        }
        if samples.len() != self.lambda {
            return Err(Error::illegal_argument(format!(
                "expected a generation of {}, got {}",
                self.lambda,
                samples.len()
            )));
        }
        if let Some(sample) = samples.iter().find(|s| s.len() != self.dim) {
            return Err(Error::illegal_argument(format!(
                "sample of dimension {} in a {}-dimensional search",
                sample.len(),
                self.dim
            )));
        }

        let mut order: Vec<usize> = (0..samples.len()).collect();
        order.sort_by(|a, b| fitness[*a].total_cmp(&fitness[*b]));

        let n = self.dim as f64;

        // steps of the selected samples, in units of sigma
        let steps: Vec<Vec<f64>> = order[..self.mu]
            .iter()
            .map(|k| {
                samples[*k]
                    .iter()
                    .zip(&self.mean)
                    .map(|(x, m)| (x - m) / self.sigma)
                    .collect()
            })
            .collect();
        let mut y_w = vec![0.0; self.dim];
        for (w, y) in self.weights.iter().zip(&steps) {
            for (acc, yi) in y_w.iter_mut().zip(y) {
                *acc += w * yi;
            }
        }

        for (m, y) in self.mean.iter_mut().zip(&y_w) {
            *m += self.sigma * y;
        }

        let cs = self.cs;
        let ps_scale = (cs * (2.0 - cs) * self.mueff).sqrt();
        for ((p, y), c) in self.ps.iter_mut().zip(&y_w).zip(&self.diag_c) {
            *p = (1.0 - cs) * *p + ps_scale * y / c.sqrt();
        }
        let ps_norm = self.ps.iter().map(|p| p * p).sum::<f64>().sqrt();

        let generation = (self.result.iterations + 1) as f64;
        let hsig = ps_norm / (1.0 - (1.0 - self.cs).powf(2.0 * generation)).sqrt()
            < (1.4 + 2.0 / (n + 1.0)) * self.chi_n;
        let hsig = if hsig { 1.0 } else { 0.0 };

        let pc_scale = (self.cc * (2.0 - self.cc) * self.mueff).sqrt();
        for (pc, y) in self.pc.iter_mut().zip(&y_w) {
            *pc = (1.0 - self.cc) * *pc + hsig * pc_scale * y;
        }

        let decay =
            1.0 - self.c1 - self.cmu + (1.0 - hsig) * self.c1 * self.cc * (2.0 - self.cc);
        let (c1, cmu) = (self.c1, self.cmu);
        for (i, (c, pc)) in self.diag_c.iter_mut().zip(&self.pc).enumerate() {
            let rank_mu: f64 = self
                .weights
                .iter()
                .zip(&steps)
                .map(|(w, y)| w * y[i] * y[i])
                .sum();
            *c = (decay * *c + c1 * pc * pc + cmu * rank_mu).max(MIN_VARIANCE);
        }

        self.sigma *= ((self.cs / self.ds) * (ps_norm / self.chi_n - 1.0))
            .min(1.0)
            .exp();

        let best = order[0];
        self.result.iterations += 1;
        self.result.evaluations += samples.len() as u64;
        if fitness[best] < self.result.fbest {
            self.result.fbest = fitness[best];
            self.result.xbest.clone_from(&samples[best]);
        }
        self.result.stds = self
            .diag_c
            .iter()
            .map(|c| self.sigma * c.sqrt())
            .collect();

        self.best_history.push_front(fitness[best]);
        self.best_history.truncate(self.hist_len);
        self.last_fitness = fitness.to_vec();

        Ok(())
    }

    fn stop(&self) -> bool {
        self.termination().is_some()
    }

    fn result(&self) -> &OptimizerResult {
        &self.result
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        optimizers::{CmaEsConfig, Optimizer, OptimizerFactory, SepCmaEs, Termination},
        Error,
    };

    fn config(dim: usize) -> CmaEsConfig {
        CmaEsConfig::builder()
            .mean(vec![128.0; dim])
            .seed(1337)
            .build()
    }

    #[test]
    fn test_ask_in_bounds() {
        let mut config = CmaEsConfig::builder()
            .mean(vec![128.0; 8])
            .sigma(1000.0)
            .seed(3)
            .build();
        let mut es = config.create(50).unwrap();
        let population = es.ask();
        assert_eq!(population.len(), 50);
        for sample in &population {
            assert_eq!(sample.len(), 8);
            assert!(sample.iter().all(|x| (0.0..=255.99).contains(x)));
        }
    }

    #[test]
    fn test_seeded_instances() {
        let a = SepCmaEs::new(&config(4), 10, 42).unwrap().ask();
        let b = SepCmaEs::new(&config(4), 10, 42).unwrap().ask();
        assert_eq!(a, b);

        // every instance of a factory gets its own seed
        let mut factory = config(4);
        let first = factory.create(10).unwrap().ask();
        let second = factory.create(10).unwrap().ask();
        assert_ne!(first, second);
    }

    #[test]
    fn test_sphere() {
        let mut es = CmaEsConfig::builder()
            .mean(vec![128.0; 4])
            .sigma(20.0)
            .seed(1)
            .build()
            .create(10)
            .unwrap();

        let sphere = |x: &Vec<f64>| x.iter().map(|xi| (xi - 100.0).powi(2)).sum::<f64>();
        for _ in 0..1000 {
            if es.stop() {
                break;
            }
            let population = es.ask();
            let fitness: Vec<f64> = population.iter().map(sphere).collect();
            es.tell(&population, &fitness).unwrap();
        }

        assert!(es.result().fbest < 1e-2);
        assert!(es.mean().iter().all(|m| (m - 100.0).abs() < 1.0));
        assert_eq!(es.result().evaluations, es.result().iterations * 10);
    }

    #[test]
    fn test_flat_fitness_stops() {
        let mut es = config(4).create(10).unwrap();
        // history window for dim 4 and popsize 10
        let hist_len = 10 + 12;
        for _ in 0..hist_len - 1 {
            let population = es.ask();
            es.tell(&population, &[-50.0; 10]).unwrap();
            assert!(!es.stop());
        }
        let population = es.ask();
        es.tell(&population, &[-50.0; 10]).unwrap();
        assert_eq!(es.termination(), Some(Termination::TolFun));
    }

    #[test]
    fn test_max_iterations() {
        let mut es = CmaEsConfig::builder()
            .mean(vec![10.0, 20.0])
            .max_iterations(3)
            .seed(0)
            .build()
            .create(6)
            .unwrap();
        for i in 0..3 {
            assert!(!es.stop());
            let population = es.ask();
            let fitness: Vec<f64> = (0..6).map(|k| f64::from(k * (i + 1))).collect();
            es.tell(&population, &fitness).unwrap();
        }
        assert_eq!(es.termination(), Some(Termination::MaxIter));
    }

    #[test]
    fn test_invalid_use() {
        assert!(matches!(
            config(2).create(1),
            Err(Error::IllegalArgument(_, _))
        ));
        assert!(CmaEsConfig::builder().mean(vec![]).build().create(10).is_err());

        let mut es = config(2).create(4).unwrap();
        let population = es.ask();
        assert!(es.tell(&population, &[0.0; 3]).is_err());
        assert!(es.tell(&population[..2], &[0.0; 2]).is_err());
        assert!(es.tell(&vec![vec![1.0]; 4], &[0.0; 4]).is_err());
    }
}
