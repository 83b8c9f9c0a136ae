//! Linker occupancy module: constrained sampling and bundle aggregation.
//!
//! This module provides Rust implementations of:
//! - OccupancyConfig: the eight binding patterns of a three-site linker
//! - BindingParameters: Langmuir site marginals from dissociation constants
//! - ConstraintBuilder / FeasiblePolytope: admissible probability vectors
//! - PolytopeGibbsSampler: parallel Gibbs chains over the polytope
//! - gelman_rubin: split-chain convergence diagnostic
//! - BundleAggregator: two-level bundle occupancy statistics

pub mod occupancy;
pub mod affinity;
pub mod constraint;
pub mod gibbs;
pub mod diagnostics;
pub mod bundle;
pub mod summary;

pub use occupancy::{OccupancyConfig, ProbabilityVector, N_CONFIGS, N_SITES};
pub use affinity::{site_occupancy, validate_grid, BindingParameters};
pub use constraint::{ConstraintBuilder, FeasiblePolytope};
pub use gibbs::{
    sample_concentration,
    sample_grid,
    Chain,
    ConcentrationSamples,
    GridRun,
    PolytopeGibbsSampler,
    SamplerConfig,
};
pub use diagnostics::{gelman_rubin, gelman_rubin_grid, GelmanRubin};
pub use bundle::{BundleAggregator, BundleGrid, BundleStats};
pub use summary::{
    from_export_table,
    ordering_probabilities,
    summarize_rhat,
    to_export_table,
    RhatSummary,
};
