//! Linear constraint system of the feasible occupancy polytope.
//!
//! A probability vector x over the eight configurations is admissible when
//!     Σ x = 1,  p(1**) = h1,  p(*1*) = h2,  p(**1) = h3
//!     p(010) + p(100) + p(101) + p(110) ≤ τ
//!     x ≥ 0
//!
//! The equalities fix a 4-dimensional affine subspace. Its direction space is
//! the null space of the equality matrix, derived here by row reduction. Every
//! null-space vector is a transfer of mass between configurations that leaves
//! all three marginals and the total unchanged.

use ndarray::{arr1, Array1, Array2};

use super::affinity::BindingParameters;
use super::occupancy::{
    atypical_indicator, atypical_mass, site_marginals, OccupancyConfig, ProbabilityVector,
    N_CONFIGS, N_SITES,
};
use crate::error::{LinkerError, Result};

/// Pivot tolerance for row reduction.
const PIVOT_EPS: f64 = 1e-12;

/// Direction components below this magnitude are treated as zero.
const DIRECTION_EPS: f64 = 1e-14;

/// Builder for the per-concentration constraint system.
#[derive(Clone, Debug)]
pub struct ConstraintBuilder {
    marginals: [f64; N_SITES],
    tau: f64,
}

impl ConstraintBuilder {
    /// Start from explicit site marginals and atypical-mass bound.
    pub fn new(marginals: [f64; N_SITES], tau: f64) -> Self {
        Self { marginals, tau }
    }

    /// Start from binding parameters evaluated at one concentration.
    pub fn from_parameters(params: &BindingParameters, concentration: f64) -> Result<Self> {
        Ok(Self::new(params.marginals(concentration)?, params.tau()))
    }

    /// Build the polytope, probing feasibility first.
    ///
    /// Fails with `InfeasiblePolytope` unless τ strictly exceeds the minimum
    /// atypical mass the marginals force.
    pub fn build(&self) -> Result<FeasiblePolytope> {
        for (i, &h) in self.marginals.iter().enumerate() {
            if !(h.is_finite() && (0.0..=1.0).contains(&h)) {
                return Err(LinkerError::invalid(format!(
                    "site {} marginal must lie in [0, 1], got {}",
                    i + 1,
                    h
                )));
            }
        }
        if !self.tau.is_finite() {
            return Err(LinkerError::invalid(format!(
                "atypical-mass bound must be finite, got {}",
                self.tau
            )));
        }

        let min_atypical = min_atypical_mass(&self.marginals);
        if self.tau <= min_atypical {
            return Err(LinkerError::InfeasiblePolytope {
                tau: self.tau,
                min_atypical,
                marginals: self.marginals,
            });
        }

        let equality = equality_matrix();
        let rhs = [1.0, self.marginals[0], self.marginals[1], self.marginals[2]];
        let directions = null_space(&equality)
            .into_iter()
            .map(|v| {
                let mut d = [0.0; N_CONFIGS];
                for (di, &vi) in d.iter_mut().zip(v.iter()) {
                    *di = vi;
                }
                d
            })
            .collect();

        let origin = interior_point(&self.marginals, self.tau, min_atypical);

        Ok(FeasiblePolytope {
            marginals: self.marginals,
            tau: self.tau,
            equality,
            rhs,
            atypical: atypical_indicator(),
            directions,
            origin,
            min_atypical,
        })
    }
}

/// Feasible region of probability vectors at one concentration.
#[derive(Clone, Debug)]
pub struct FeasiblePolytope {
    marginals: [f64; N_SITES],
    tau: f64,
    /// Rows: total, site 1, site 2, site 3.
    equality: Array2<f64>,
    rhs: [f64; 4],
    atypical: [f64; N_CONFIGS],
    /// Null-space basis of `equality`.
    directions: Vec<[f64; N_CONFIGS]>,
    /// Strictly interior starting point when the region has an interior.
    origin: ProbabilityVector,
    min_atypical: f64,
}

impl FeasiblePolytope {
    pub fn marginals(&self) -> [f64; N_SITES] {
        self.marginals
    }

    pub fn tau(&self) -> f64 {
        self.tau
    }

    pub fn equality_matrix(&self) -> &Array2<f64> {
        &self.equality
    }

    pub fn equality_rhs(&self) -> [f64; 4] {
        self.rhs
    }

    pub fn atypical_row(&self) -> &[f64; N_CONFIGS] {
        &self.atypical
    }

    /// Equality-preserving transfer directions.
    pub fn directions(&self) -> &[[f64; N_CONFIGS]] {
        &self.directions
    }

    pub fn origin(&self) -> &ProbabilityVector {
        &self.origin
    }

    /// Smallest atypical mass compatible with the marginals.
    pub fn min_atypical_mass(&self) -> f64 {
        self.min_atypical
    }

    /// Check every constraint within `tol`.
    pub fn contains(&self, x: &ProbabilityVector, tol: f64) -> bool {
        if x.iter().any(|&xi| !xi.is_finite() || xi < -tol) {
            return false;
        }
        if (x.iter().sum::<f64>() - 1.0).abs() > tol {
            return false;
        }
        let m = site_marginals(x);
        if m.iter().zip(self.marginals.iter()).any(|(a, b)| (a - b).abs() > tol) {
            return false;
        }
        atypical_mass(x) <= self.tau + tol
    }

    /// Same region data with the atypical bound replaced, bypassing the
    /// feasibility check.
    #[cfg(test)]
    pub(crate) fn with_unchecked_tau(mut self, tau: f64) -> Self {
        self.tau = tau;
        self
    }

    /// Closed-form range of `t` keeping `x + t·d` feasible.
    ///
    /// Bounded by non-negativity of every coordinate `d` touches and, when `d`
    /// changes the atypical mass, by the τ bound. The returned interval may be
    /// empty (`lower > upper`); the caller decides how to report it.
    pub fn transfer_interval(&self, x: &ProbabilityVector, d: &[f64; N_CONFIGS]) -> (f64, f64) {
        let mut lower = f64::NEG_INFINITY;
        let mut upper = f64::INFINITY;

        for (&xi, &di) in x.iter().zip(d.iter()) {
            if di > DIRECTION_EPS {
                lower = lower.max(-xi / di);
            } else if di < -DIRECTION_EPS {
                upper = upper.min(-xi / di);
            }
        }

        let slope: f64 = self.atypical.iter().zip(d.iter()).map(|(a, di)| a * di).sum();
        let slack = self.tau - atypical_mass(x);
        if slope > DIRECTION_EPS {
            upper = upper.min(slack / slope);
        } else if slope < -DIRECTION_EPS {
            lower = lower.max(slack / slope);
        }

        (lower, upper)
    }
}

/// Equality matrix: total-mass row followed by one row per site.
pub fn equality_matrix() -> Array2<f64> {
    let mut a = Array2::zeros((1 + N_SITES, N_CONFIGS));
    for config in OccupancyConfig::ALL {
        let j = config.index();
        a[[0, j]] = 1.0;
        for site in 1..=N_SITES {
            if config.is_bound(site) {
                a[[site, j]] = 1.0;
            }
        }
    }
    a
}

/// Null-space basis of `a` from its reduced row-echelon form.
///
/// One vector per free column: that column set to 1, pivot columns set to
/// minus the reduced entries.
pub fn null_space(a: &Array2<f64>) -> Vec<Array1<f64>> {
    let (n_rows, n_cols) = a.dim();
    let mut r = a.clone();
    let mut pivots: Vec<usize> = Vec::new();
    let mut row = 0;

    for col in 0..n_cols {
        if row == n_rows {
            break;
        }
        let (best, best_abs) = (row..n_rows)
            .map(|i| (i, r[[i, col]].abs()))
            .fold((row, 0.0), |acc, (i, v)| if v > acc.1 { (i, v) } else { acc });
        if best_abs < PIVOT_EPS {
            continue;
        }
        if best != row {
            for j in 0..n_cols {
                r.swap([best, j], [row, j]);
            }
        }
        let pivot = r[[row, col]];
        for j in 0..n_cols {
            r[[row, j]] /= pivot;
        }
        for i in 0..n_rows {
            if i != row {
                let factor = r[[i, col]];
                if factor != 0.0 {
                    for j in 0..n_cols {
                        r[[i, j]] -= factor * r[[row, j]];
                    }
                }
            }
        }
        pivots.push(col);
        row += 1;
    }

    (0..n_cols)
        .filter(|c| !pivots.contains(c))
        .map(|free| {
            let mut v = Array1::zeros(n_cols);
            v[free] = 1.0;
            for (pivot_row, &pivot_col) in pivots.iter().enumerate() {
                v[pivot_col] = -r[[pivot_row, free]];
            }
            v
        })
        .collect()
}

/// Minimum atypical mass over all vectors with the given marginals.
///
/// Atypical configurations are exactly those with b1 > b2 or b2 > b3, so the
/// mass is at least h1−h2, h2−h3 and h1−h3. The comonotone coupling attains
/// the largest of these.
pub fn min_atypical_mass(h: &[f64; N_SITES]) -> f64 {
    0.0_f64
        .max(h[0] - h[1])
        .max(h[1] - h[2])
        .max(h[0] - h[2])
}

/// Comonotone coupling: sites bound as `1{U < h_i}` for a shared uniform U.
pub fn comonotone_vector(h: &[f64; N_SITES]) -> ProbabilityVector {
    let mut cuts = vec![0.0, 1.0, h[0], h[1], h[2]];
    cuts.sort_by(|a, b| a.total_cmp(b));

    let mut p = [0.0; N_CONFIGS];
    for w in cuts.windows(2) {
        let width = w[1] - w[0];
        if width <= 0.0 {
            continue;
        }
        let u = 0.5 * (w[0] + w[1]);
        let config = OccupancyConfig::from_sites(u < h[0], u < h[1], u < h[2]);
        p[config.index()] += width;
    }
    p
}

/// Independent-sites vector: product of the marginals.
pub fn independent_vector(h: &[f64; N_SITES]) -> ProbabilityVector {
    let mut p = [0.0; N_CONFIGS];
    for config in OccupancyConfig::ALL {
        p[config.index()] = (1..=N_SITES)
            .map(|site| {
                if config.is_bound(site) {
                    h[site - 1]
                } else {
                    1.0 - h[site - 1]
                }
            })
            .product();
    }
    p
}

/// Starting point between the comonotone and independent vectors.
///
/// The mix weight keeps the atypical mass at most halfway between its minimum
/// and τ, so the point is off the τ face. Coordinates are positive wherever
/// the independent vector is.
fn interior_point(h: &[f64; N_SITES], tau: f64, min_atypical: f64) -> ProbabilityVector {
    let co = comonotone_vector(h);
    let ind = independent_vector(h);
    let excess = atypical_mass(&ind) - min_atypical;
    let lambda = if excess > 0.0 {
        (0.5 * (tau - min_atypical) / excess).min(1.0)
    } else {
        1.0
    };
    let mut x = [0.0; N_CONFIGS];
    for i in 0..N_CONFIGS {
        x[i] = (1.0 - lambda) * co[i] + lambda * ind[i];
    }
    x
}

/// Residual `A·x − b` of the equality system.
pub fn equality_residual(polytope: &FeasiblePolytope, x: &ProbabilityVector) -> Array1<f64> {
    polytope.equality_matrix().dot(&arr1(x)) - arr1(&polytope.equality_rhs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn reference_polytope() -> FeasiblePolytope {
        let params = BindingParameters::new(71.4, 44.3, 3.45, 0.375).unwrap();
        ConstraintBuilder::from_parameters(&params, 20.0)
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_null_space_preserves_marginals() {
        let a = equality_matrix();
        let basis = null_space(&a);
        assert_eq!(basis.len(), N_CONFIGS - 4);
        for v in &basis {
            let image = a.dot(v);
            for value in image.iter() {
                assert_abs_diff_eq!(*value, 0.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_null_space_is_independent() {
        // Stacked as rows, the basis has rank 4: its own null space is 8 - 4.
        let basis = null_space(&equality_matrix());
        let mut stacked = Array2::zeros((basis.len(), N_CONFIGS));
        for (i, v) in basis.iter().enumerate() {
            stacked.row_mut(i).assign(v);
        }
        assert_eq!(null_space(&stacked).len(), N_CONFIGS - basis.len());
    }

    #[test]
    fn test_origin_is_feasible_and_interior() {
        let polytope = reference_polytope();
        let x = polytope.origin();
        assert!(polytope.contains(x, 1e-12));
        assert!(x.iter().all(|&xi| xi > 0.0));
        assert!(atypical_mass(x) < polytope.tau());
        for r in equality_residual(&polytope, x).iter() {
            assert_abs_diff_eq!(*r, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_comonotone_attains_minimum() {
        let h = [0.2, 0.5, 0.4];
        let co = comonotone_vector(&h);
        assert_abs_diff_eq!(co.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        let m = site_marginals(&co);
        for (a, b) in m.iter().zip(h.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(atypical_mass(&co), min_atypical_mass(&h), epsilon = 1e-12);
        assert_abs_diff_eq!(min_atypical_mass(&h), 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_ordered_marginals_need_no_atypical_mass() {
        assert_eq!(min_atypical_mass(&[0.1, 0.3, 0.8]), 0.0);
        let co = comonotone_vector(&[0.1, 0.3, 0.8]);
        assert_eq!(atypical_mass(&co), 0.0);
    }

    #[test]
    fn test_zero_tau_is_infeasible() {
        let err = ConstraintBuilder::new([0.2, 0.3, 0.6], 0.0).build().unwrap_err();
        match err {
            LinkerError::InfeasiblePolytope { tau, min_atypical, .. } => {
                assert_eq!(tau, 0.0);
                assert_eq!(min_atypical, 0.0);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_tau_below_forced_mass_is_infeasible() {
        let result = ConstraintBuilder::new([0.6, 0.2, 0.9], 0.3).build();
        assert!(matches!(result, Err(LinkerError::InfeasiblePolytope { .. })));
        assert!(ConstraintBuilder::new([0.6, 0.2, 0.9], 0.45).build().is_ok());
    }

    #[test]
    fn test_rejects_marginals_outside_unit_interval() {
        let result = ConstraintBuilder::new([1.2, 0.2, 0.9], 0.3).build();
        assert!(matches!(result, Err(LinkerError::InvalidParameters(_))));
    }

    #[test]
    fn test_transfer_interval_contains_zero() {
        let polytope = reference_polytope();
        let x = *polytope.origin();
        for d in polytope.directions() {
            let (lo, hi) = polytope.transfer_interval(&x, d);
            assert!(lo < 0.0 && 0.0 < hi, "interval [{}, {}]", lo, hi);
            let mut end = x;
            for i in 0..N_CONFIGS {
                end[i] += hi * d[i];
            }
            assert!(polytope.contains(&end, 1e-9));
        }
    }
}
