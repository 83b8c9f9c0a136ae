//! Binding-affinity model for the three linker sites.
//!
//! Each site binds calcium independently following a single-site
//! Langmuir isotherm:
//!     h_i(c) = c / (c + K_i)
//!
//! K_i is the dissociation constant, so h_i(K_i) = 1/2.

use serde::{Deserialize, Serialize};

use crate::error::{LinkerError, Result};

/// Dissociation constants and the atypical-mass bound for one run.
///
/// Sites are numbered by decreasing dissociation constant, so site 3 has the
/// highest affinity: K1 ≥ K2 ≥ K3 > 0.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BindingParameters {
    k: [f64; 3],
    tau: f64,
}

impl BindingParameters {
    /// Validate and build parameters.
    pub fn new(k1: f64, k2: f64, k3: f64, tau: f64) -> Result<Self> {
        let k = [k1, k2, k3];
        check_dissociation_constants(&k)?;
        if !(tau > 0.0 && tau < 1.0) {
            return Err(LinkerError::invalid(format!(
                "atypical-mass bound tau must lie in (0, 1), got {}",
                tau
            )));
        }
        Ok(Self { k, tau })
    }

    /// Dissociation constants `[K1, K2, K3]`.
    pub fn dissociation_constants(&self) -> [f64; 3] {
        self.k
    }

    pub fn tau(&self) -> f64 {
        self.tau
    }

    /// Site marginals `[h1, h2, h3]` at concentration `c`.
    pub fn marginals(&self, concentration: f64) -> Result<[f64; 3]> {
        check_concentration(concentration)?;
        Ok([
            site_occupancy(self.k[0], concentration),
            site_occupancy(self.k[1], concentration),
            site_occupancy(self.k[2], concentration),
        ])
    }
}

/// Reject non-positive, non-finite or out-of-order constants.
pub fn check_dissociation_constants(k: &[f64; 3]) -> Result<()> {
    for (i, &ki) in k.iter().enumerate() {
        if !(ki.is_finite() && ki > 0.0) {
            return Err(LinkerError::invalid(format!(
                "dissociation constant K{} must be positive and finite, got {}",
                i + 1,
                ki
            )));
        }
    }
    if !(k[0] >= k[1] && k[1] >= k[2]) {
        return Err(LinkerError::invalid(format!(
            "dissociation constants must satisfy K1 >= K2 >= K3, got {:?}",
            k
        )));
    }
    Ok(())
}

/// Occupancy probability of a single site with dissociation constant `kd`.
#[inline]
pub fn site_occupancy(kd: f64, concentration: f64) -> f64 {
    concentration / (concentration + kd)
}

pub fn check_concentration(concentration: f64) -> Result<()> {
    if !(concentration.is_finite() && concentration >= 0.0) {
        return Err(LinkerError::invalid(format!(
            "concentration must be finite and non-negative, got {}",
            concentration
        )));
    }
    Ok(())
}

/// Validate a concentration grid: non-empty and every value finite, `c ≥ 0`.
pub fn validate_grid(grid: &[f64]) -> Result<()> {
    if grid.is_empty() {
        return Err(LinkerError::invalid("concentration grid is empty"));
    }
    grid.iter().try_for_each(|&c| check_concentration(c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_half_occupancy_at_kd() {
        let params = BindingParameters::new(71.4, 44.3, 3.45, 0.375).unwrap();
        let h = params.marginals(44.3).unwrap();
        assert_abs_diff_eq!(h[1], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_limits_and_ordering() {
        let params = BindingParameters::new(71.4, 44.3, 3.45, 0.375).unwrap();
        assert_eq!(params.marginals(0.0).unwrap(), [0.0, 0.0, 0.0]);

        let h = params.marginals(20.0).unwrap();
        assert!(h[0] < h[1] && h[1] < h[2]);
        assert!(h.iter().all(|&x| (0.0..1.0).contains(&x)));

        let high = params.marginals(1e9).unwrap();
        assert!(high.iter().all(|&x| x > 0.999));
    }

    #[test]
    fn test_monotone_in_concentration() {
        let mut prev = 0.0;
        for i in 1..100 {
            let h = site_occupancy(3.45, i as f64 * 0.5);
            assert!(h > prev);
            prev = h;
        }
    }

    #[test]
    fn test_rejects_bad_parameters() {
        assert!(BindingParameters::new(0.0, 1.0, 1.0, 0.3).is_err());
        assert!(BindingParameters::new(-1.0, -2.0, -3.0, 0.3).is_err());
        assert!(BindingParameters::new(1.0, 2.0, 3.0, 0.3).is_err());
        assert!(BindingParameters::new(3.0, 2.0, 1.0, 0.0).is_err());
        assert!(BindingParameters::new(3.0, 2.0, 1.0, 1.0).is_err());
        assert!(BindingParameters::new(f64::NAN, 2.0, 1.0, 0.5).is_err());
    }

    #[test]
    fn test_grid_validation() {
        assert!(validate_grid(&[]).is_err());
        assert!(validate_grid(&[1.0, -0.5]).is_err());
        assert!(validate_grid(&[0.0, 1.0, 20.0]).is_ok());

        let params = BindingParameters::new(3.0, 2.0, 1.0, 0.5).unwrap();
        assert!(params.marginals(f64::INFINITY).is_err());
    }
}
