//! Error kinds for parameter validation, polytope construction and sampling.

use thiserror::Error;

/// Errors raised by the linker occupancy core.
///
/// Convergence problems are not errors: a large Gelman–Rubin statistic is
/// returned to the caller as a plain number.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum LinkerError {
    /// Rejected before any sampling starts.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// The marginals force more atypical mass than the bound allows.
    #[error(
        "infeasible polytope: tau {tau} does not exceed minimum atypical mass {min_atypical} \
         for marginals {marginals:?}"
    )]
    InfeasiblePolytope {
        tau: f64,
        min_atypical: f64,
        marginals: [f64; 3],
    },

    /// A Gibbs transfer found an empty or non-finite interval.
    #[error(
        "degenerate Gibbs step at concentration {concentration}, chain {chain}, sweep {sweep}: \
         interval [{lower}, {upper}]"
    )]
    DegenerateStep {
        concentration: f64,
        chain: usize,
        sweep: usize,
        lower: f64,
        upper: f64,
    },
}

pub type Result<T> = std::result::Result<T, LinkerError>;

impl LinkerError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        LinkerError::InvalidParameters(msg.into())
    }
}
