use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the estimators.  Every variant is raised at the point
/// of detection; nothing here is retried.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// Empty input, ragged chains, wrong number of observations, or an
    /// unknown/duplicate model name.
    #[error("invalid input shape: {0}")]
    InputShape(String),

    #[error("non-finite value {value} at chain/observation {outer}, draw {inner}")]
    NonFinite {
        outer: usize,
        inner: usize,
        value: f64,
    },

    #[error("need at least {required} draws, got {actual}")]
    InsufficientDraws { required: usize, actual: usize },

    /// The quantity is mathematically undefined for this input, e.g. all
    /// draws are identical.
    #[error("degenerate input: {0}")]
    DegenerateInput(String),

    #[error("optimization failed: {0}")]
    OptimizationFailure(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Non-fatal reliability flags attached to results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Warning {
    /// Effective sample size below the configured minimum.
    LowEss { ess: f64, minimum: f64 },
    /// Rhat above the configured maximum.
    HighRhat { r_hat: f64, maximum: f64 },
    /// `count` observations have a Pareto shape estimate above `threshold`.
    HighParetoK { count: usize, threshold: f64 },
    /// Posterior variance of the log predictive density exceeds 0.4 for
    /// `count` observations (WAIC).
    HighPosteriorVariance { count: usize },
}
