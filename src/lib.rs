//! Occupancy of three-site calcium-binding linkers.
//!
//! Samples the eight-configuration occupancy distribution of a linker under
//! affinity and atypical-mass constraints, checks chain convergence, and
//! propagates the samples to bundle-level occupancy statistics. With the
//! `python` feature the crate builds as a Python extension module.

pub mod error;
pub mod linker;

pub use error::{LinkerError, Result};
pub use linker::*;

#[cfg(feature = "python")]
mod bindings {
    use ndarray::{Array2, Axis};
    use numpy::{PyArray1, PyArray2, PyArray3, PyReadonlyArray1, PyReadonlyArray2, PyReadonlyArray3};
    use pyo3::exceptions::PyValueError;
    use pyo3::prelude::*;
    use pyo3::types::PyDict;
    use pyo3::wrap_pyfunction;

    use crate::error::LinkerError;
    use crate::linker::affinity::{check_concentration, check_dissociation_constants};
    use crate::linker::{
        gelman_rubin, gelman_rubin_grid, ordering_probabilities, sample_grid, site_occupancy,
        to_export_table, BindingParameters, BundleAggregator, OccupancyConfig, SamplerConfig,
    };

    fn to_py_err(e: LinkerError) -> PyErr {
        PyValueError::new_err(e.to_string())
    }

    /// Site occupancy marginals on a concentration grid.
    ///
    /// # Arguments
    /// * `k1`, `k2`, `k3` - Dissociation constants (K1 >= K2 >= K3 > 0)
    /// * `concentrations` - Calcium concentrations
    ///
    /// # Returns
    /// * (n_concentrations, 3) array of [h1, h2, h3]
    #[pyfunction]
    fn binding_probabilities<'py>(
        py: Python<'py>,
        k1: f64,
        k2: f64,
        k3: f64,
        concentrations: PyReadonlyArray1<f64>,
    ) -> PyResult<&'py PyArray2<f64>> {
        let k = [k1, k2, k3];
        check_dissociation_constants(&k).map_err(to_py_err)?;
        let grid = concentrations.as_array();
        for &c in grid.iter() {
            check_concentration(c).map_err(to_py_err)?;
        }
        let h = Array2::from_shape_fn((grid.len(), 3), |(i, s)| site_occupancy(k[s], grid[i]));
        Ok(PyArray2::from_owned_array(py, h))
    }

    /// Sample linker occupancy distributions on a concentration grid.
    ///
    /// # Arguments
    /// * `k1`, `k2`, `k3` - Dissociation constants (K1 >= K2 >= K3 > 0)
    /// * `tau` - Bound on total atypical probability, in (0, 1)
    /// * `concentrations` - Calcium concentrations
    /// * `n_samples` - Post-burn-in samples per chain
    /// * `burn_in` - Samples discarded at the start of each chain
    /// * `n_chains` - Independent chains per concentration
    /// * `thin` - Sweeps per emitted sample
    /// * `seed` - Base RNG seed
    ///
    /// # Returns
    /// * Dict with "samples" (n_conc, n_chains*n_samples, 8), "r_hat"
    ///   (n_conc, 8), "seeds" (per-concentration chain seeds), "failures"
    ///   (concentration -> message) and "chain_failures" ((concentration,
    ///   message) per aborted chain). Failed rows are NaN.
    #[pyfunction]
    #[pyo3(signature = (k1, k2, k3, tau, concentrations, n_samples=12500, burn_in=2500, n_chains=4, thin=1, seed=0))]
    #[allow(clippy::too_many_arguments)]
    fn sample_linker_occupancy<'py>(
        py: Python<'py>,
        k1: f64,
        k2: f64,
        k3: f64,
        tau: f64,
        concentrations: PyReadonlyArray1<f64>,
        n_samples: usize,
        burn_in: usize,
        n_chains: usize,
        thin: usize,
        seed: u64,
    ) -> PyResult<PyObject> {
        let params = BindingParameters::new(k1, k2, k3, tau).map_err(to_py_err)?;
        let config = SamplerConfig {
            n_samples,
            burn_in,
            n_chains,
            thin,
            seed,
        };
        let grid = concentrations.as_array().to_vec();

        let run = py
            .allow_threads(|| sample_grid(&params, &grid, &config))
            .map_err(to_py_err)?;

        let samples = run.pooled_array();
        let r_hat = gelman_rubin_grid(&run).map_err(to_py_err)?;
        let seeds: Vec<Vec<u64>> = run
            .outcomes
            .iter()
            .map(|o| o.as_ref().map(|s| s.seeds()).unwrap_or_default())
            .collect();

        let failures = PyDict::new(py);
        for (c, e) in run.failures() {
            failures.set_item(c, e.to_string())?;
        }
        let chain_failures: Vec<(f64, String)> = run
            .chain_failures()
            .into_iter()
            .map(|(c, e)| (c, e.to_string()))
            .collect();

        let result = PyDict::new(py);
        result.set_item("samples", PyArray3::from_owned_array(py, samples))?;
        result.set_item("r_hat", PyArray2::from_owned_array(py, r_hat))?;
        result.set_item("seeds", seeds)?;
        result.set_item("failures", failures)?;
        result.set_item("chain_failures", chain_failures)?;
        Ok(result.into())
    }

    /// Split-chain Gelman-Rubin statistic per configuration.
    ///
    /// # Arguments
    /// * `chains` - (n_chains, n_samples, 8) samples at one concentration
    ///
    /// # Returns
    /// * Tuple of (r_hat array of length 8, dropped_odd_sample)
    #[pyfunction]
    fn compute_gelman_rubin<'py>(
        py: Python<'py>,
        chains: PyReadonlyArray3<f64>,
    ) -> PyResult<(&'py PyArray1<f64>, bool)> {
        let array = chains.as_array();
        let views: Vec<_> = array.axis_iter(Axis(0)).collect();
        let result = gelman_rubin(&views).map_err(to_py_err)?;
        Ok((PyArray1::from_slice(py, &result.r_hat), result.dropped_odd_sample))
    }

    /// Bundle-level occupancy mean and variance.
    ///
    /// # Arguments
    /// * `samples` - (n_conc, n_pooled, 8) pooled samples
    /// * `n_monomers` - Monomers per bundle (NM)
    /// * `n_linkers` - Linker regions per monomer (NL)
    /// * `targets` - Configuration labels such as "011"
    /// * `n_draws` - Outer draws per (concentration, target)
    /// * `seed` - Base RNG seed
    ///
    /// # Returns
    /// * Tuple of (mean, variance), each (n_conc, n_targets)
    #[pyfunction]
    #[pyo3(signature = (samples, n_monomers, n_linkers, targets, n_draws=10000, seed=0))]
    fn bundle_statistics<'py>(
        py: Python<'py>,
        samples: PyReadonlyArray3<f64>,
        n_monomers: u64,
        n_linkers: u64,
        targets: Vec<String>,
        n_draws: usize,
        seed: u64,
    ) -> PyResult<(&'py PyArray2<f64>, &'py PyArray2<f64>)> {
        let bundle = BundleAggregator::new(n_monomers, n_linkers).map_err(to_py_err)?;
        let targets = targets
            .iter()
            .map(|t| OccupancyConfig::from_label(t))
            .collect::<crate::Result<Vec<_>>>()
            .map_err(to_py_err)?;
        let grid = bundle
            .aggregate_grid(samples.as_array(), &targets, n_draws, seed)
            .map_err(to_py_err)?;
        Ok((
            PyArray2::from_owned_array(py, grid.mean),
            PyArray2::from_owned_array(py, grid.variance),
        ))
    }

    /// Pairwise ordering probabilities P(p_i <= p_j) of a pooled sample matrix.
    #[pyfunction]
    fn compute_ordering_probabilities<'py>(
        py: Python<'py>,
        pool: PyReadonlyArray2<f64>,
    ) -> PyResult<&'py PyArray2<f64>> {
        let probs = ordering_probabilities(pool.as_array()).map_err(to_py_err)?;
        Ok(PyArray2::from_owned_array(py, probs))
    }

    /// Flatten (n_conc, n_pooled, 8) samples to the export table layout.
    #[pyfunction]
    fn export_table<'py>(
        py: Python<'py>,
        samples: PyReadonlyArray3<f64>,
    ) -> PyResult<&'py PyArray2<f64>> {
        Ok(PyArray2::from_owned_array(py, to_export_table(samples.as_array())))
    }

    /// Python module definition
    #[pymodule]
    fn linker_occupancy(_py: Python, m: &PyModule) -> PyResult<()> {
        m.add_function(wrap_pyfunction!(binding_probabilities, m)?)?;
        m.add_function(wrap_pyfunction!(sample_linker_occupancy, m)?)?;
        m.add_function(wrap_pyfunction!(compute_gelman_rubin, m)?)?;
        m.add_function(wrap_pyfunction!(bundle_statistics, m)?)?;
        m.add_function(wrap_pyfunction!(compute_ordering_probabilities, m)?)?;
        m.add_function(wrap_pyfunction!(export_table, m)?)?;
        Ok(())
    }
}
