//! Occupancy configurations of a three-site linker.
//!
//! A configuration is a binary triple `b1 b2 b3` (site 1, site 2, site 3).
//! It is stored as the index `4·b1 + 2·b2 + b3`, so probability vectors are
//! plain `[f64; 8]` arrays indexed by configuration.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{LinkerError, Result};

/// Number of occupancy configurations.
pub const N_CONFIGS: usize = 8;

/// Number of binding sites per linker.
pub const N_SITES: usize = 3;

/// Probability vector over the eight configurations.
pub type ProbabilityVector = [f64; N_CONFIGS];

/// One of the eight occupancy patterns of a linker.
///
/// Typical patterns fill sites in affinity order (site 3, then 2, then 1):
/// 000, 001, 011, 111. The other four are atypical.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OccupancyConfig(u8);

impl OccupancyConfig {
    /// All configurations in index order.
    pub const ALL: [OccupancyConfig; N_CONFIGS] = [
        OccupancyConfig(0),
        OccupancyConfig(1),
        OccupancyConfig(2),
        OccupancyConfig(3),
        OccupancyConfig(4),
        OccupancyConfig(5),
        OccupancyConfig(6),
        OccupancyConfig(7),
    ];

    /// Build from a configuration index in `0..8`.
    pub fn from_index(index: usize) -> Result<Self> {
        if index >= N_CONFIGS {
            return Err(LinkerError::invalid(format!(
                "configuration index {} out of range 0..{}",
                index, N_CONFIGS
            )));
        }
        Ok(OccupancyConfig(index as u8))
    }

    /// Build from per-site occupancy flags.
    pub fn from_sites(s1: bool, s2: bool, s3: bool) -> Self {
        OccupancyConfig(((s1 as u8) << 2) | ((s2 as u8) << 1) | (s3 as u8))
    }

    /// Parse a label such as `"011"`.
    pub fn from_label(label: &str) -> Result<Self> {
        let bytes = label.as_bytes();
        if bytes.len() != N_SITES {
            return Err(LinkerError::invalid(format!(
                "configuration label '{}' must have {} characters",
                label, N_SITES
            )));
        }
        let mut sites = [false; N_SITES];
        for (site, &b) in sites.iter_mut().zip(bytes) {
            *site = match b {
                b'0' => false,
                b'1' => true,
                _ => {
                    return Err(LinkerError::invalid(format!(
                        "configuration label '{}' must contain only 0 and 1",
                        label
                    )))
                }
            };
        }
        Ok(Self::from_sites(sites[0], sites[1], sites[2]))
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    /// Whether `site` (1-based) is bound.
    #[inline]
    pub fn is_bound(&self, site: usize) -> bool {
        debug_assert!((1..=N_SITES).contains(&site));
        (self.0 >> (N_SITES - site)) & 1 == 1
    }

    /// Number of bound sites.
    pub fn n_bound(&self) -> u32 {
        self.0.count_ones()
    }

    /// True when binding respects the affinity order, i.e. `b1 ≤ b2 ≤ b3`.
    pub fn is_typical(&self) -> bool {
        let (b1, b2, b3) = (self.is_bound(1), self.is_bound(2), self.is_bound(3));
        (!b1 || b2) && (!b2 || b3)
    }

    pub fn is_atypical(&self) -> bool {
        !self.is_typical()
    }

    pub fn label(&self) -> String {
        (1..=N_SITES)
            .map(|site| if self.is_bound(site) { '1' } else { '0' })
            .collect()
    }
}

impl fmt::Display for OccupancyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Indicator row of the atypical configurations.
pub fn atypical_indicator() -> [f64; N_CONFIGS] {
    let mut row = [0.0; N_CONFIGS];
    for config in OccupancyConfig::ALL {
        if config.is_atypical() {
            row[config.index()] = 1.0;
        }
    }
    row
}

/// Site marginals `[p(1**), p(*1*), p(**1)]` of a probability vector.
pub fn site_marginals(p: &ProbabilityVector) -> [f64; N_SITES] {
    let mut marginals = [0.0; N_SITES];
    for config in OccupancyConfig::ALL {
        for (site, m) in marginals.iter_mut().enumerate() {
            if config.is_bound(site + 1) {
                *m += p[config.index()];
            }
        }
    }
    marginals
}

/// Total probability on atypical configurations.
pub fn atypical_mass(p: &ProbabilityVector) -> f64 {
    OccupancyConfig::ALL
        .iter()
        .filter(|c| c.is_atypical())
        .map(|c| p[c.index()])
        .sum()
}
