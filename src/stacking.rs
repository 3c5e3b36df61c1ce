//! Stacking of predictive distributions.
//!
//! Finds simplex weights `w` maximizing
//! `sum_i ln sum_k w_k p(y_i | y_-i, M_k)`, see Yao, Vehtari, Simpson and
//! Gelman, ["Using Stacking to Average Bayesian Predictive
//! Distributions"](https://arxiv.org/abs/1704.02030).
//!
//! The weights are parameterized as `w = softmax(z)` and the cost is
//! minimized with L-BFGS and a More-Thuente line search.
use crate::error::{Error, Result};
use crate::Array2;
use argmin::core::{
    CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus,
};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackingOptions {
    pub max_iters: u64,
    /// Gradient norm at which the solver stops.
    pub tol_grad: f64,
    /// Change in cost between iterations at which the solver stops.
    pub tol_cost: f64,
    /// L-BFGS history length.
    pub memory: usize,
}

impl Default for StackingOptions {
    fn default() -> Self {
        Self {
            max_iters: 1000,
            tol_grad: 1e-8,
            tol_cost: 1e-12,
            memory: 7,
        }
    }
}

/// Negative mean log score of the mixture as a function of the softmax
/// logits.  Each row of `density` holds `exp(elpd_ik - max_k elpd_ik)`.
struct StackingObjective {
    density: Array2,
}

impl StackingObjective {
    fn new(pointwise_elpd: &Array2) -> Self {
        let density = pointwise_elpd
            .iter()
            .map(|row| {
                let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                row.iter().map(|l| (l - max).exp()).collect()
            })
            .collect();
        Self { density }
    }

    fn mixture(&self, w: &[f64], row: &[f64]) -> f64 {
        row.iter().zip(w).map(|(p, wk)| p * wk).sum()
    }
}

pub fn softmax(z: &[f64]) -> Vec<f64> {
    let max = z.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let e: Vec<f64> = z.iter().map(|v| (v - max).exp()).collect();
    let total: f64 = e.iter().sum();
    e.iter().map(|v| v / total).collect()
}

impl CostFunction for StackingObjective {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, z: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        let w = softmax(z);
        let n = self.density.len() as f64;
        Ok(-self
            .density
            .iter()
            .map(|row| self.mixture(&w, row).ln())
            .sum::<f64>()
            / n)
    }
}

impl Gradient for StackingObjective {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    /// Chain rule through the softmax: `dC/dz_m = w_m (g_m - sum_j g_j w_j)`
    /// where `g` is the gradient with respect to the weights.
    fn gradient(&self, z: &Self::Param) -> std::result::Result<Self::Gradient, argmin::core::Error> {
        let w = softmax(z);
        let n = self.density.len() as f64;
        let mut g = vec![0.0; w.len()];
        for row in &self.density {
            let mix = self.mixture(&w, row);
            for (gk, p) in g.iter_mut().zip(row) {
                *gk -= p / mix / n;
            }
        }
        let centre: f64 = g.iter().zip(&w).map(|(gk, wk)| gk * wk).sum();
        Ok(w.iter().zip(&g).map(|(wk, gk)| wk * (gk - centre)).collect())
    }
}

/// Stacking weights from an observations × models table of pointwise
/// leave-one-out log predictive densities.
///
/// Fails with [`Error::OptimizationFailure`] when the solver errors or stops
/// before reaching its convergence criterion; there is no fallback to
/// equal weights.
pub fn stacking_weights(pointwise_elpd: &Array2, options: &StackingOptions) -> Result<Vec<f64>> {
    let num_models = pointwise_elpd.first().map_or(0, |r| r.len());
    if pointwise_elpd.is_empty() || num_models == 0 {
        return Err(Error::InputShape("no pointwise values to stack".into()));
    }
    if pointwise_elpd.iter().any(|r| r.len() != num_models) {
        return Err(Error::InputShape(
            "every observation needs one value per model".into(),
        ));
    }
    crate::utils::check_finite(pointwise_elpd)?;
    if num_models == 1 {
        return Ok(vec![1.0]);
    }

    let problem = StackingObjective::new(pointwise_elpd);
    let init = vec![0.0; num_models];
    let grad = problem.gradient(&init).map_err(solver_error)?;
    let grad_norm = grad.iter().map(|g| g * g).sum::<f64>().sqrt();
    if grad_norm < options.tol_grad {
        debug!(grad_norm, "equal weights are already optimal");
        return Ok(softmax(&init));
    }

    let linesearch = MoreThuenteLineSearch::new();
    let solver = LBFGS::new(linesearch, options.memory)
        .with_tolerance_grad(options.tol_grad)
        .map_err(solver_error)?
        .with_tolerance_cost(options.tol_cost)
        .map_err(solver_error)?;
    let result = Executor::new(problem, solver)
        .configure(|state| state.param(init).max_iters(options.max_iters))
        .run()
        .map_err(solver_error)?;

    let state = result.state();
    let status = state.get_termination_status();
    debug!(
        iterations = state.get_iter(),
        cost = state.get_best_cost(),
        status = ?status,
        "stacking solver finished"
    );
    if !matches!(
        status,
        TerminationStatus::Terminated(TerminationReason::SolverConverged)
    ) {
        return Err(Error::OptimizationFailure(format!(
            "stacking did not converge: {:?}",
            status
        )));
    }
    let z = state
        .get_best_param()
        .ok_or_else(|| Error::OptimizationFailure("solver returned no parameters".into()))?;
    Ok(softmax(z))
}

fn solver_error(e: argmin::core::Error) -> Error {
    Error::OptimizationFailure(e.to_string())
}
