//! Summary tables and the flat exchange shape for pooled samples.

use ndarray::{Array2, Array3, ArrayView2, ArrayView3};
use serde::{Deserialize, Serialize};

use super::occupancy::N_CONFIGS;
use crate::error::{LinkerError, Result};

/// Spread of one configuration's R̂ across a concentration grid.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RhatSummary {
    pub min: f64,
    pub q25: f64,
    pub median: f64,
    pub q75: f64,
    pub max: f64,
}

/// Quantile summary per configuration of an R̂ matrix (concentration × config).
///
/// NaN entries (failed grid points) are skipped.
pub fn summarize_rhat(matrix: ArrayView2<f64>) -> [RhatSummary; N_CONFIGS] {
    let nan = RhatSummary {
        min: f64::NAN,
        q25: f64::NAN,
        median: f64::NAN,
        q75: f64::NAN,
        max: f64::NAN,
    };
    let mut out = [nan; N_CONFIGS];
    for (j, summary) in out.iter_mut().enumerate().take(matrix.ncols()) {
        let mut values: Vec<f64> = matrix.column(j).iter().cloned().filter(|v| !v.is_nan()).collect();
        if values.is_empty() {
            continue;
        }
        values.sort_by(|a, b| a.total_cmp(b));
        *summary = RhatSummary {
            min: values[0],
            q25: quantile_sorted(&values, 0.25),
            median: quantile_sorted(&values, 0.5),
            q75: quantile_sorted(&values, 0.75),
            max: values[values.len() - 1],
        };
    }
    out
}

/// Linear-interpolated quantile of sorted, non-empty data.
fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// `P(p_i ≤ p_j)` over the rows of a pooled sample matrix.
pub fn ordering_probabilities(pool: ArrayView2<f64>) -> Result<Array2<f64>> {
    if pool.nrows() == 0 || pool.ncols() != N_CONFIGS {
        return Err(LinkerError::invalid(format!(
            "pooled samples must be non-empty with {} columns, got {} x {}",
            N_CONFIGS,
            pool.nrows(),
            pool.ncols()
        )));
    }
    let mut counts = Array2::<f64>::zeros((N_CONFIGS, N_CONFIGS));
    for row in pool.rows() {
        for i in 0..N_CONFIGS {
            for j in 0..N_CONFIGS {
                if row[i] <= row[j] {
                    counts[[i, j]] += 1.0;
                }
            }
        }
    }
    Ok(counts / pool.nrows() as f64)
}

/// Flatten a (concentration, sample, config) array for export.
///
/// Rows are config-major blocks of the pooled (chain × sample) axis; columns
/// are concentrations: `table[k·S + s, c] = array[c, s, k]`.
pub fn to_export_table(array: ArrayView3<f64>) -> Array2<f64> {
    let (n_conc, n_samples, n_configs) = array.dim();
    Array2::from_shape_fn((n_configs * n_samples, n_conc), |(row, c)| {
        array[[c, row % n_samples, row / n_samples]]
    })
}

/// Inverse of `to_export_table`.
pub fn from_export_table(table: ArrayView2<f64>) -> Result<Array3<f64>> {
    let (n_rows, n_conc) = table.dim();
    if n_rows % N_CONFIGS != 0 {
        return Err(LinkerError::invalid(format!(
            "export table has {} rows, not a multiple of {}",
            n_rows, N_CONFIGS
        )));
    }
    let n_samples = n_rows / N_CONFIGS;
    Ok(Array3::from_shape_fn((n_conc, n_samples, N_CONFIGS), |(c, s, k)| {
        table[[k * n_samples + s, c]]
    }))
}
