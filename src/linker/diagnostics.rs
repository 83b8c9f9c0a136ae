//! Split-chain Gelman–Rubin convergence diagnostic.
//!
//! Following Gelman & Rubin (1992) with split chains:
//! 1. Split each of M chains in half, giving 2M chains of length n
//! 2. W = mean of half-chain variances
//! 3. B = n × variance of half-chain means
//! 4. V̂ = (n−1)/n · W + B/n
//! 5. R̂ = sqrt(V̂ / W)
//!
//! Values near 1 indicate convergence. No threshold is applied here.

use log::debug;
use ndarray::{Array2, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::gibbs::GridRun;
use super::occupancy::N_CONFIGS;
use crate::error::{LinkerError, Result};

/// R̂ per configuration at one concentration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GelmanRubin {
    pub r_hat: [f64; N_CONFIGS],
    /// Length of each half chain.
    pub half_length: usize,
    /// Number of half chains (2M).
    pub n_half_chains: usize,
    /// True when chains had odd length and their final sample was dropped.
    pub dropped_odd_sample: bool,
}

impl GelmanRubin {
    /// Largest R̂ over all configurations.
    pub fn max(&self) -> f64 {
        self.r_hat.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
    }
}

/// Compute split-chain R̂ for each configuration.
///
/// All chains must have the same length N with 8 columns and at least
/// four samples, so every half chain has n ≥ 2.
pub fn gelman_rubin(chains: &[ArrayView2<f64>]) -> Result<GelmanRubin> {
    let first = chains
        .first()
        .ok_or_else(|| LinkerError::invalid("Gelman-Rubin needs at least one chain"))?;
    let n_total = first.nrows();
    for chain in chains {
        if chain.nrows() != n_total || chain.ncols() != N_CONFIGS {
            return Err(LinkerError::invalid(format!(
                "chains must all be {} x {}, got {} x {}",
                n_total,
                N_CONFIGS,
                chain.nrows(),
                chain.ncols()
            )));
        }
    }

    let half = n_total / 2;
    if half < 2 {
        return Err(LinkerError::invalid(format!(
            "Gelman-Rubin needs at least 4 samples per chain, got {}",
            n_total
        )));
    }
    let dropped_odd_sample = n_total % 2 == 1;
    if dropped_odd_sample {
        debug!("dropping final sample of {} chains with odd length {}", chains.len(), n_total);
    }

    let halves: Vec<ArrayView2<f64>> = chains
        .iter()
        .flat_map(|c| {
            [
                c.slice(ndarray::s![..half, ..]),
                c.slice(ndarray::s![half..2 * half, ..]),
            ]
        })
        .collect();
    let m = halves.len();
    let n = half as f64;

    let mut r_hat = [0.0; N_CONFIGS];
    for (j, r) in r_hat.iter_mut().enumerate() {
        let mut means = Vec::with_capacity(m);
        let mut vars = Vec::with_capacity(m);
        for h in &halves {
            let column = h.column(j);
            let mean = column.sum() / n;
            let var = column.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
            means.push(mean);
            vars.push(var);
        }

        let w = vars.iter().sum::<f64>() / m as f64;
        let grand = means.iter().sum::<f64>() / m as f64;
        let b = if m > 1 {
            n * means.iter().map(|&mu| (mu - grand).powi(2)).sum::<f64>() / (m - 1) as f64
        } else {
            0.0
        };

        *r = split_r_hat(w, b, n);
    }

    Ok(GelmanRubin {
        r_hat,
        half_length: half,
        n_half_chains: m,
        dropped_odd_sample,
    })
}

/// R̂ from within (W) and between (B) variances and half-chain length n.
///
/// A coordinate that never moves (W = 0) reports 1 when the chains agree
/// and +∞ when they sit at different values. Otherwise, chains with identical
/// half means give sqrt((n−1)/n), slightly below 1, not exactly 1.
fn split_r_hat(w: f64, b: f64, n: f64) -> f64 {
    if w <= 0.0 {
        return if b <= 0.0 { 1.0 } else { f64::INFINITY };
    }
    let var_plus = ((n - 1.0) * w + b) / n;
    (var_plus / w).sqrt()
}

/// (concentration, configuration) matrix of R̂ over a grid run.
///
/// Failed grid points get NaN rows.
pub fn gelman_rubin_grid(run: &GridRun) -> Result<Array2<f64>> {
    let rows: Vec<Result<[f64; N_CONFIGS]>> = run
        .outcomes
        .par_iter()
        .map(|outcome| match outcome {
            Ok(samples) => gelman_rubin(&samples.chain_samples()).map(|g| g.r_hat),
            Err(_) => Ok([f64::NAN; N_CONFIGS]),
        })
        .collect();

    let mut matrix = Array2::zeros((rows.len(), N_CONFIGS));
    for (mut out, row) in matrix.axis_iter_mut(Axis(0)).zip(rows) {
        for (o, v) in out.iter_mut().zip(row?.iter()) {
            *o = *v;
        }
    }
    Ok(matrix)
}
