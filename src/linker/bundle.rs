//! Bundle-level occupancy from pooled linker samples.
//!
//! Two-level sampling per draw:
//!     p     ~ uniform over the pooled posterior vectors (parameter uncertainty)
//!     count ~ Binomial(NM·NL, p_target)          (occupancy stochasticity)
//!
//! By the law of total variance,
//!     Var(count) = Var(n·p) + E[n·p·(1−p)]
//! and both terms are estimated from the same outer draws.

use ndarray::{Array2, ArrayView2, ArrayView3, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Binomial, Distribution};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::occupancy::{OccupancyConfig, N_CONFIGS};
use crate::error::{LinkerError, Result};

/// Bundle geometry: monomers per bundle and linker regions per monomer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleAggregator {
    n_monomers: u64,
    n_linkers_per_monomer: u64,
}

/// Mean and variance of the count of linkers in one configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BundleStats {
    pub target: OccupancyConfig,
    /// NM·NL.
    pub n_linkers: u64,
    pub n_draws: usize,
    pub mean_count: f64,
    /// Unbiased sample variance of the drawn counts.
    pub var_count: f64,
    pub mean_fraction: f64,
    pub var_fraction: f64,
    /// Var(n·p) over the outer draws.
    pub parameter_variance: f64,
    /// Mean of n·p·(1−p) over the outer draws.
    pub occupancy_variance: f64,
}

/// Bundle statistics over a grid: rows are concentrations, columns targets.
#[derive(Clone, Debug)]
pub struct BundleGrid {
    pub targets: Vec<OccupancyConfig>,
    pub mean: Array2<f64>,
    pub variance: Array2<f64>,
}

impl BundleAggregator {
    pub fn new(n_monomers: u64, n_linkers_per_monomer: u64) -> Result<Self> {
        if n_monomers == 0 || n_linkers_per_monomer == 0 {
            return Err(LinkerError::invalid(format!(
                "bundle needs at least one monomer and one linker, got NM={} NL={}",
                n_monomers, n_linkers_per_monomer
            )));
        }
        if n_monomers.checked_mul(n_linkers_per_monomer).is_none() {
            return Err(LinkerError::invalid(format!(
                "bundle size NM={} x NL={} overflows u64",
                n_monomers, n_linkers_per_monomer
            )));
        }
        Ok(Self {
            n_monomers,
            n_linkers_per_monomer,
        })
    }

    /// Total linkers in the bundle.
    pub fn n_linkers(&self) -> u64 {
        self.n_monomers * self.n_linkers_per_monomer
    }

    /// Large-draw limit of the mean count: NM·NL times the pooled mean.
    pub fn expected_count(&self, pool: ArrayView2<f64>, target: OccupancyConfig) -> Result<f64> {
        check_pool(&pool)?;
        let mean = pool.column(target.index()).mean().unwrap_or(0.0);
        Ok(self.n_linkers() as f64 * mean)
    }

    /// Draw `n_draws` (vector, count) pairs and summarize the counts.
    pub fn aggregate<R: Rng + ?Sized>(
        &self,
        pool: ArrayView2<f64>,
        target: OccupancyConfig,
        n_draws: usize,
        rng: &mut R,
    ) -> Result<BundleStats> {
        check_pool(&pool)?;
        if n_draws < 2 {
            return Err(LinkerError::invalid(format!(
                "bundle aggregation needs at least 2 draws, got {}",
                n_draws
            )));
        }

        let n = self.n_linkers();
        let nf = n as f64;
        let column = pool.column(target.index());

        let mut counts = Vec::with_capacity(n_draws);
        let mut expected = Vec::with_capacity(n_draws);
        let mut conditional_var_sum = 0.0;
        for _ in 0..n_draws {
            let p = column[rng.gen_range(0..pool.nrows())].clamp(0.0, 1.0);
            let binomial = Binomial::new(n, p)
                .map_err(|e| LinkerError::invalid(format!("binomial({}, {}): {:?}", n, p, e)))?;
            counts.push(binomial.sample(rng) as f64);
            expected.push(nf * p);
            conditional_var_sum += nf * p * (1.0 - p);
        }

        let (mean_count, var_count) = mean_and_variance(&counts);
        let (_, parameter_variance) = mean_and_variance(&expected);

        Ok(BundleStats {
            target,
            n_linkers: n,
            n_draws,
            mean_count,
            var_count,
            mean_fraction: mean_count / nf,
            var_fraction: var_count / (nf * nf),
            parameter_variance,
            occupancy_variance: conditional_var_sum / n_draws as f64,
        })
    }

    /// Aggregate every (concentration, target) cell of a pooled sample array.
    ///
    /// Cell `(c, t)` uses its own stream seeded `seed + c·len(targets) + t`,
    /// so results do not depend on scheduling.
    pub fn aggregate_grid(
        &self,
        pooled: ArrayView3<f64>,
        targets: &[OccupancyConfig],
        n_draws: usize,
        seed: u64,
    ) -> Result<BundleGrid> {
        let n_conc = pooled.len_of(Axis(0));
        let n_targets = targets.len();

        let cells: Vec<Result<BundleStats>> = (0..n_conc * n_targets)
            .into_par_iter()
            .map(|cell| {
                let (ci, ti) = (cell / n_targets, cell % n_targets);
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(cell as u64));
                self.aggregate(pooled.index_axis(Axis(0), ci), targets[ti], n_draws, &mut rng)
            })
            .collect();

        let mut mean = Array2::zeros((n_conc, n_targets));
        let mut variance = Array2::zeros((n_conc, n_targets));
        for (cell, stats) in cells.into_iter().enumerate() {
            let stats = stats?;
            let (ci, ti) = (cell / n_targets, cell % n_targets);
            mean[[ci, ti]] = stats.mean_count;
            variance[[ci, ti]] = stats.var_count;
        }

        Ok(BundleGrid {
            targets: targets.to_vec(),
            mean,
            variance,
        })
    }
}

fn check_pool(pool: &ArrayView2<f64>) -> Result<()> {
    if pool.nrows() == 0 || pool.ncols() != N_CONFIGS {
        return Err(LinkerError::invalid(format!(
            "pooled samples must be non-empty with {} columns, got {} x {}",
            N_CONFIGS,
            pool.nrows(),
            pool.ncols()
        )));
    }
    Ok(())
}

fn mean_and_variance(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|&v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array3;

    fn two_point_pool() -> Array2<f64> {
        // Half the vectors put 0.2 on 011, half put 0.6.
        let mut pool = Array2::zeros((100, N_CONFIGS));
        for (i, mut row) in pool.rows_mut().into_iter().enumerate() {
            let p = if i % 2 == 0 { 0.2 } else { 0.6 };
            row[3] = p;
            row[0] = 1.0 - p;
        }
        pool
    }

    #[test]
    fn test_mean_approaches_expected_count() {
        let pool = two_point_pool();
        let bundle = BundleAggregator::new(20, 5).unwrap();
        let target = OccupancyConfig::from_label("011").unwrap();
        let mut rng = StdRng::seed_from_u64(42);

        let stats = bundle.aggregate(pool.view(), target, 20_000, &mut rng).unwrap();
        let expected = bundle.expected_count(pool.view(), target).unwrap();
        assert_relative_eq!(expected, 40.0, epsilon = 1e-9);
        assert_relative_eq!(stats.mean_count, expected, max_relative = 0.02);
        assert_relative_eq!(stats.mean_fraction, 0.4, max_relative = 0.02);
    }

    #[test]
    fn test_total_variance_decomposition() {
        let pool = two_point_pool();
        let bundle = BundleAggregator::new(20, 5).unwrap();
        let target = OccupancyConfig::from_label("011").unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        let stats = bundle.aggregate(pool.view(), target, 40_000, &mut rng).unwrap();
        // Var(n·p) = 100² · 0.04 = 400; E[n·p(1−p)] = 100 · (0.16 + 0.24)/2 = 20.
        assert_relative_eq!(stats.parameter_variance, 400.0, max_relative = 0.05);
        assert_relative_eq!(stats.occupancy_variance, 20.0, max_relative = 0.02);
        assert_relative_eq!(
            stats.var_count,
            stats.parameter_variance + stats.occupancy_variance,
            max_relative = 0.08
        );
    }

    #[test]
    fn test_fixed_vector_is_pure_binomial() {
        let mut pool = Array2::zeros((1, N_CONFIGS));
        pool[[0, 7]] = 0.3;
        pool[[0, 0]] = 0.7;
        let bundle = BundleAggregator::new(10, 10).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let stats = bundle
            .aggregate(pool.view(), OccupancyConfig::from_label("111").unwrap(), 20_000, &mut rng)
            .unwrap();
        assert_eq!(stats.parameter_variance, 0.0);
        assert_relative_eq!(stats.var_count, 21.0, max_relative = 0.05);
    }

    #[test]
    fn test_deterministic_for_fixed_stream() {
        let pool = two_point_pool();
        let bundle = BundleAggregator::new(4, 3).unwrap();
        let target = OccupancyConfig::from_label("011").unwrap();
        let a = bundle
            .aggregate(pool.view(), target, 500, &mut StdRng::seed_from_u64(99))
            .unwrap();
        let b = bundle
            .aggregate(pool.view(), target, 500, &mut StdRng::seed_from_u64(99))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_grid_shapes() {
        let pool = two_point_pool();
        let mut pooled = Array3::zeros((3, pool.nrows(), N_CONFIGS));
        for mut slab in pooled.axis_iter_mut(Axis(0)) {
            slab.assign(&pool);
        }
        let bundle = BundleAggregator::new(4, 3).unwrap();
        let targets = [
            OccupancyConfig::from_label("000").unwrap(),
            OccupancyConfig::from_label("011").unwrap(),
        ];
        let grid = bundle.aggregate_grid(pooled.view(), &targets, 200, 5).unwrap();
        assert_eq!(grid.mean.dim(), (3, 2));
        assert_eq!(grid.variance.dim(), (3, 2));
        assert!(grid.mean.iter().all(|&m| m > 0.0 && m < 12.0));
    }

    #[test]
    fn test_rejects_bad_inputs() {
        assert!(BundleAggregator::new(0, 3).is_err());
        assert!(matches!(
            BundleAggregator::new(u64::MAX, 2),
            Err(LinkerError::InvalidParameters(_))
        ));
        assert_eq!(BundleAggregator::new(u64::MAX, 1).unwrap().n_linkers(), u64::MAX);
        let bundle = BundleAggregator::new(2, 3).unwrap();
        let empty = Array2::<f64>::zeros((0, N_CONFIGS));
        let target = OccupancyConfig::from_label("001").unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        assert!(bundle.aggregate(empty.view(), target, 10, &mut rng).is_err());
        let pool = two_point_pool();
        assert!(bundle.aggregate(pool.view(), target, 1, &mut rng).is_err());
    }
}
