//! Gibbs sampler over the feasible occupancy polytope with parallel chains.
//!
//! State: null-space coordinates z, with x = x0 + Σ_k z_k·d_k.
//! Step:  pick direction d_k, compute the feasible interval of t in closed
//!        form, draw t uniformly, move x ← x + t·d_k.
//! Sweep: one step along every direction; x is then re-derived from z.
//!
//! Uniform draws along fixed spanning directions leave the uniform density
//! on the polytope invariant. Chains run on Rayon with one seeded stream each.

use log::{debug, info, warn};
use ndarray::{Array2, Array3, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::affinity::{validate_grid, BindingParameters};
use super::constraint::{ConstraintBuilder, FeasiblePolytope};
use super::occupancy::{ProbabilityVector, N_CONFIGS, N_SITES};
use crate::error::{LinkerError, Result};

/// An interval is empty when its lower end exceeds the upper by more than this.
const INTERVAL_TOL: f64 = 1e-12;

/// Sum drift tolerated before a sampled vector is renormalized.
const DRIFT_TOL: f64 = 1e-12;

/// Configuration for a sampling run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Samples kept per chain after burn-in.
    pub n_samples: usize,
    /// Emitted samples discarded at the start of each chain.
    pub burn_in: usize,
    /// Independent chains per concentration.
    pub n_chains: usize,
    /// Full sweeps per emitted sample.
    pub thin: usize,
    /// Base seed; chain streams are derived from it (see `chain_seed`).
    pub seed: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            n_samples: 12_500,
            burn_in: 2_500,
            n_chains: 4,
            thin: 1,
            seed: 0,
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_samples == 0 {
            return Err(LinkerError::invalid("n_samples must be at least 1"));
        }
        if self.n_chains == 0 {
            return Err(LinkerError::invalid("n_chains must be at least 1"));
        }
        if self.thin == 0 {
            return Err(LinkerError::invalid("thin must be at least 1"));
        }
        Ok(())
    }

    /// Seed of chain `chain_index` at grid position `concentration_index`.
    ///
    /// Distinct for every (concentration, chain) pair of one run.
    pub fn chain_seed(&self, concentration_index: usize, chain_index: usize) -> u64 {
        let offset = (concentration_index as u64)
            .wrapping_mul(self.n_chains as u64)
            .wrapping_add(chain_index as u64);
        self.seed.wrapping_add(offset)
    }
}

/// Post-burn-in output of one chain.
#[derive(Clone, Debug)]
pub struct Chain {
    pub chain_index: usize,
    /// Seed the chain's stream was built from.
    pub seed: u64,
    /// (n_samples, 8) sample matrix.
    pub samples: Array2<f64>,
}

impl Chain {
    pub fn len(&self) -> usize {
        self.samples.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.nrows() == 0
    }

    /// Sample `i` as a probability vector.
    pub fn vector(&self, i: usize) -> ProbabilityVector {
        let mut p = [0.0; N_CONFIGS];
        for (pj, &v) in p.iter_mut().zip(self.samples.row(i).iter()) {
            *pj = v;
        }
        p
    }
}

/// Gibbs sampler for one concentration.
pub struct PolytopeGibbsSampler {
    concentration: f64,
    polytope: FeasiblePolytope,
    config: SamplerConfig,
}

impl PolytopeGibbsSampler {
    /// Create a new sampler.
    pub fn new(concentration: f64, polytope: FeasiblePolytope, config: SamplerConfig) -> Self {
        Self {
            concentration,
            polytope,
            config,
        }
    }

    pub fn polytope(&self) -> &FeasiblePolytope {
        &self.polytope
    }

    /// Run one chain from the polytope origin.
    ///
    /// Returns `DegenerateStep` as soon as a transfer interval is empty or
    /// non-finite; no partial samples are returned.
    pub fn run_chain(&self, chain_index: usize, seed: u64) -> Result<Chain> {
        let mut rng = StdRng::seed_from_u64(seed);
        let directions = self.polytope.directions();
        let origin = *self.polytope.origin();

        let mut z = vec![0.0; directions.len()];
        let mut x = origin;
        let total = self.config.burn_in + self.config.n_samples;
        let mut samples = Array2::zeros((self.config.n_samples, N_CONFIGS));
        let mut sweep = 0;

        for emitted in 0..total {
            for _ in 0..self.config.thin {
                for (k, d) in directions.iter().enumerate() {
                    let (lower, upper) = self.polytope.transfer_interval(&x, d);
                    if !(lower.is_finite() && upper.is_finite()) || lower > upper + INTERVAL_TOL {
                        warn!(
                            "chain {} at concentration {}: empty interval [{}, {}] at sweep {}",
                            chain_index, self.concentration, lower, upper, sweep
                        );
                        return Err(LinkerError::DegenerateStep {
                            concentration: self.concentration,
                            chain: chain_index,
                            sweep,
                            lower,
                            upper,
                        });
                    }

                    let t = if upper > lower {
                        lower + (upper - lower) * rng.gen::<f64>()
                    } else {
                        0.5 * (lower + upper)
                    };
                    z[k] += t;
                    for (xi, di) in x.iter_mut().zip(d.iter()) {
                        *xi += t * di;
                    }
                }
                x = rederive(&origin, directions, &z);
                sweep += 1;
            }

            if emitted >= self.config.burn_in {
                let row = emitted - self.config.burn_in;
                for (j, &v) in x.iter().enumerate() {
                    samples[[row, j]] = v;
                }
            }
        }

        debug!(
            "chain {} (seed {}) at concentration {}: {} sweeps",
            chain_index, seed, self.concentration, sweep
        );

        Ok(Chain {
            chain_index,
            seed,
            samples,
        })
    }
}

/// Rebuild x from the origin and null-space coordinates.
///
/// Negative round-off is clamped to zero; the vector is renormalized only
/// when its sum drifts past `DRIFT_TOL`.
fn rederive(
    origin: &ProbabilityVector,
    directions: &[[f64; N_CONFIGS]],
    z: &[f64],
) -> ProbabilityVector {
    let mut x = *origin;
    for (d, &zk) in directions.iter().zip(z.iter()) {
        for (xi, di) in x.iter_mut().zip(d.iter()) {
            *xi += zk * di;
        }
    }
    for xi in x.iter_mut() {
        if *xi < 0.0 {
            *xi = 0.0;
        }
    }
    let sum: f64 = x.iter().sum();
    if (sum - 1.0).abs() > DRIFT_TOL && sum > 0.0 {
        for xi in x.iter_mut() {
            *xi /= sum;
        }
    }
    x
}

/// All chains of one concentration.
#[derive(Clone, Debug)]
pub struct ConcentrationSamples {
    pub concentration: f64,
    /// Position in the grid.
    pub index: usize,
    pub marginals: [f64; N_SITES],
    pub tau: f64,
    /// Chains that ran to completion, in chain order.
    pub chains: Vec<Chain>,
    /// Errors of the chains that aborted; their samples are discarded.
    pub failed_chains: Vec<LinkerError>,
}

impl ConcentrationSamples {
    /// Post-burn-in samples of every completed chain, concatenated chain-major.
    pub fn pooled(&self) -> Array2<f64> {
        let views: Vec<ArrayView2<f64>> = self.chains.iter().map(|c| c.samples.view()).collect();
        if views.is_empty() {
            return Array2::zeros((0, N_CONFIGS));
        }
        // Every chain has the same shape, so concatenation cannot fail.
        ndarray::concatenate(Axis(0), &views).unwrap_or_else(|_| Array2::zeros((0, N_CONFIGS)))
    }

    /// Seeds of the completed chains, in chain order.
    pub fn seeds(&self) -> Vec<u64> {
        self.chains.iter().map(|c| c.seed).collect()
    }

    /// Per-chain sample matrices.
    pub fn chain_samples(&self) -> Vec<ArrayView2<f64>> {
        self.chains.iter().map(|c| c.samples.view()).collect()
    }
}

/// Sample every chain at one concentration.
///
/// Fails with the polytope error, or with the first chain's error when no
/// chain completes. A chain that aborts is recorded in `failed_chains` and
/// does not affect its siblings.
pub fn sample_concentration(
    params: &BindingParameters,
    concentration: f64,
    index: usize,
    config: &SamplerConfig,
) -> Result<ConcentrationSamples> {
    config.validate()?;
    let polytope = ConstraintBuilder::from_parameters(params, concentration)?.build()?;
    let marginals = polytope.marginals();
    let sampler = PolytopeGibbsSampler::new(concentration, polytope, config.clone());

    let results: Vec<Result<Chain>> = (0..config.n_chains)
        .into_par_iter()
        .map(|i| sampler.run_chain(i, config.chain_seed(index, i)))
        .collect();

    collect_chains(concentration, index, marginals, params.tau(), results)
}

fn collect_chains(
    concentration: f64,
    index: usize,
    marginals: [f64; N_SITES],
    tau: f64,
    results: Vec<Result<Chain>>,
) -> Result<ConcentrationSamples> {
    let mut chains = Vec::with_capacity(results.len());
    let mut failed_chains = Vec::new();
    for result in results {
        match result {
            Ok(chain) => chains.push(chain),
            Err(e) => failed_chains.push(e),
        }
    }

    if chains.is_empty() {
        if let Some(first) = failed_chains.first() {
            return Err(first.clone());
        }
    } else if !failed_chains.is_empty() {
        warn!(
            "concentration {}: {} of {} chains aborted",
            concentration,
            failed_chains.len(),
            chains.len() + failed_chains.len()
        );
    }

    Ok(ConcentrationSamples {
        concentration,
        index,
        marginals,
        tau,
        chains,
        failed_chains,
    })
}

/// Outcome of sampling a whole concentration grid.
#[derive(Clone, Debug)]
pub struct GridRun {
    pub concentrations: Vec<f64>,
    pub config: SamplerConfig,
    /// One outcome per grid point, in grid order.
    pub outcomes: Vec<Result<ConcentrationSamples>>,
}

impl GridRun {
    /// Grid points that failed, with their errors.
    pub fn failures(&self) -> Vec<(f64, &LinkerError)> {
        self.concentrations
            .iter()
            .zip(self.outcomes.iter())
            .filter_map(|(&c, outcome)| outcome.as_ref().err().map(|e| (c, e)))
            .collect()
    }

    /// Successful grid points.
    pub fn successes(&self) -> impl Iterator<Item = &ConcentrationSamples> {
        self.outcomes.iter().filter_map(|o| o.as_ref().ok())
    }

    /// Aborted chains of otherwise successful grid points, as (concentration, error).
    pub fn chain_failures(&self) -> Vec<(f64, &LinkerError)> {
        self.successes()
            .flat_map(|s| s.failed_chains.iter().map(move |e| (s.concentration, e)))
            .collect()
    }

    /// (concentration, sample, config) array of pooled samples.
    ///
    /// Rows of a failed grid point, and the rows of aborted chains at the
    /// end of a slab, are NaN.
    pub fn pooled_array(&self) -> Array3<f64> {
        let n_pooled = self.config.n_chains * self.config.n_samples;
        let mut array = Array3::from_elem((self.outcomes.len(), n_pooled, N_CONFIGS), f64::NAN);
        for (ci, outcome) in self.outcomes.iter().enumerate() {
            if let Ok(samples) = outcome {
                let pool = samples.pooled();
                let rows = pool.nrows().min(n_pooled);
                array
                    .index_axis_mut(Axis(0), ci)
                    .slice_mut(ndarray::s![..rows, ..])
                    .assign(&pool.slice(ndarray::s![..rows, ..]));
            }
        }
        array
    }
}

/// Sample every concentration of the grid in parallel.
///
/// Invalid parameters abort before any sampling. Infeasible or degenerate
/// grid points are reported in their own slot of `GridRun::outcomes`.
pub fn sample_grid(
    params: &BindingParameters,
    grid: &[f64],
    config: &SamplerConfig,
) -> Result<GridRun> {
    validate_grid(grid)?;
    config.validate()?;

    info!(
        "sampling {} concentrations x {} chains x {} samples (burn-in {}, thin {})",
        grid.len(),
        config.n_chains,
        config.n_samples,
        config.burn_in,
        config.thin
    );

    let outcomes: Vec<Result<ConcentrationSamples>> = grid
        .par_iter()
        .enumerate()
        .map(|(index, &c)| {
            let outcome = sample_concentration(params, c, index, config);
            if let Err(e) = &outcome {
                warn!("concentration {} failed: {}", c, e);
            }
            outcome
        })
        .collect();

    Ok(GridRun {
        concentrations: grid.to_vec(),
        config: config.clone(),
        outcomes,
    })
}
