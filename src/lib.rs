//! A Rust library implementing the numerical core of exploratory analysis of Bayesian
//! models: MCMC convergence diagnostics (rank-normalized R hat, bulk and tail effective
//! sample size, Monte Carlo standard errors), Pareto smoothed importance sampling
//! leave-one-out cross validation and WAIC, and model comparison with stacking and
//! pseudo-BMA weights.
//!
//! This crate is language agnostic and intended to work with the outputs of any MCMC sampler
//! (e.g. Stan, PyMC, Turing.jl, etc.).  Draws of a scalar parameter are passed as one vector
//! per chain; pointwise log likelihoods as one vector per observation.
#[cfg(test)]
#[macro_use]
extern crate approx;

/// Model ranking and averaging weights
pub mod compare;
/// Expected log pointwise predictive density: PSIS-LOO and WAIC
pub mod elpd;
/// Error type and non-fatal reliability warnings
pub mod error;
/// Effective Sample Size (ESS)
pub mod ess;
/// Monte Carlo standard error (MCSE)
pub mod mcse;
/// Pareto smoothed importance sampling
pub mod psis;
/// Gelman-Rubin split potential scale reducation (Rhat)
pub mod rhat;
/// Stacking weights of predictive distributions
pub mod stacking;
/// Per-parameter posterior summary with convergence flags
pub mod summary;
/// Pre-transforms applied to draws before estimating ESS or Rhat
pub mod transform;
/// Convenience utilities like chain splitting, input validation and summary
/// statistics, intended mostly for internal use
pub mod utils;

#[cfg(test)]
mod testing;

pub use error::{Error, Result, Warning};

/// One-dimensional vector of numeric values
pub type Array1 = Vec<f64>;
/// Two dimensional vector of vectors of numeric values
pub type Array2 = Vec<Array1>;
