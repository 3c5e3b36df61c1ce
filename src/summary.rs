use crate::error::{Error, Result, Warning};
use crate::ess::{effective_sample_size, MIN_DRAWS};
use crate::mcse::{mcse, McseMethod};
use crate::rhat::{rhat, RhatMethod};
use crate::transform::EssMethod;
use crate::utils::{flatten, mean, sample_sd, validate_chains};
use crate::Array2;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Limits at which a parameter's diagnostics raise a [`Warning`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticThresholds {
    /// Minimum bulk and tail ESS per chain.
    pub min_ess_per_chain: f64,
    pub max_rhat: f64,
}

impl Default for DiagnosticThresholds {
    fn default() -> Self {
        Self {
            min_ess_per_chain: 50.0,
            max_rhat: 1.01,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryOptions {
    /// Probability mass of the highest density interval.
    pub hdi_prob: f64,
    pub thresholds: DiagnosticThresholds,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            hdi_prob: 0.94,
            thresholds: DiagnosticThresholds::default(),
        }
    }
}

/// Posterior summary and convergence diagnostics of one scalar parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSummary {
    pub mean: f64,
    pub sd: f64,
    pub hdi_lower: f64,
    pub hdi_upper: f64,
    pub mcse_mean: f64,
    pub mcse_sd: f64,
    pub ess_bulk: f64,
    pub ess_tail: f64,
    pub r_hat: f64,
    pub warnings: Vec<Warning>,
}

/// Highest density interval: the narrowest interval between two draws that
/// contains `ceil(prob * N)` of the `N` draws.
pub fn hdi(draws: &[f64], prob: f64) -> Result<(f64, f64)> {
    if draws.is_empty() {
        return Err(Error::InputShape("no draws".into()));
    }
    if !(prob > 0.0 && prob <= 1.0) {
        return Err(Error::InputShape(format!(
            "HDI probability must be in (0, 1], got {}",
            prob
        )));
    }
    crate::utils::check_finite(&[draws.to_vec()])?;
    let mut sorted = draws.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let n = sorted.len();
    let inside = ((prob * n as f64).ceil() as usize).clamp(1, n);
    let (start, _) = sorted
        .windows(inside)
        .map(|w| w[inside - 1] - w[0])
        .enumerate()
        .fold((0, f64::INFINITY), |best, (i, width)| {
            if width < best.1 {
                (i, width)
            } else {
                best
            }
        });
    Ok((sorted[start], sorted[start + inside - 1]))
}

/// Summarizes the draws of one parameter across chains.  Every chain needs
/// at least `2 * MIN_DRAWS` draws.
pub fn summary(chains: &Array2, options: &SummaryOptions) -> Result<ParameterSummary> {
    validate_chains(chains, 2 * MIN_DRAWS)?;
    let draws = flatten(chains);
    let (hdi_lower, hdi_upper) = hdi(&draws, options.hdi_prob)?;

    let ess_bulk = effective_sample_size(chains, EssMethod::Bulk)?;
    let ess_tail = effective_sample_size(chains, EssMethod::Tail)?;
    let r_hat = rhat(chains, RhatMethod::Rank)?;

    let thresholds = options.thresholds;
    let minimum = thresholds.min_ess_per_chain * chains.len() as f64;
    let mut warnings = Vec::new();
    let ess = ess_bulk.min(ess_tail);
    if ess < minimum {
        warn!(ess_bulk, ess_tail, minimum, "effective sample size is low");
        warnings.push(Warning::LowEss { ess, minimum });
    }
    if r_hat > thresholds.max_rhat {
        warn!(r_hat, maximum = thresholds.max_rhat, "chains have not mixed");
        warnings.push(Warning::HighRhat {
            r_hat,
            maximum: thresholds.max_rhat,
        });
    }

    Ok(ParameterSummary {
        mean: mean(&draws)?,
        sd: sample_sd(&draws)?,
        hdi_lower,
        hdi_upper,
        mcse_mean: mcse(chains, McseMethod::Mean)?,
        mcse_sd: mcse(chains, McseMethod::Sd)?,
        ess_bulk,
        ess_tail,
        r_hat,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{bad_chains, bernoulli_chains, normal_chains};

    #[test]
    fn test_hdi_of_skewed_draws() {
        // exponential quantiles: the HDI starts at the smallest draw
        let n = 1000;
        let draws: Vec<f64> = (0..n)
            .map(|i| -(1.0 - (i as f64 + 0.5) / n as f64).ln())
            .collect();
        let (lo, hi) = hdi(&draws, 0.9).unwrap();
        assert_eq!(lo, draws[0]);
        assert_abs_diff_eq!(hi, -(0.1f64).ln(), epsilon = 0.01);
    }

    #[test]
    fn test_hdi_window_size() {
        let draws = [5.0, 1.0, 2.0, 3.0, 10.0];
        // ceil(0.6 * 5) = 3 draws, narrowest window is [1, 3]
        assert_eq!(hdi(&draws, 0.6).unwrap(), (1.0, 3.0));
        assert_eq!(hdi(&draws, 1.0).unwrap(), (1.0, 10.0));
        assert_eq!(hdi(&[4.0], 0.5).unwrap(), (4.0, 4.0));
        assert!(hdi(&draws, 0.0).is_err());
        assert!(hdi(&[], 0.5).is_err());
    }

    #[test]
    fn test_summary_of_converged_chains() {
        let chains = normal_chains(4, 1000, 21);
        let s = summary(&chains, &SummaryOptions::default()).unwrap();
        assert_abs_diff_eq!(s.mean, 0.0, epsilon = 0.1);
        assert_abs_diff_eq!(s.sd, 1.0, epsilon = 0.05);
        // 94% of a standard normal lies within +-1.88
        assert_abs_diff_eq!(s.hdi_lower, -1.88, epsilon = 0.15);
        assert_abs_diff_eq!(s.hdi_upper, 1.88, epsilon = 0.15);
        assert!(s.mcse_mean > 0.0 && s.mcse_mean < 0.03);
        assert!(s.ess_bulk > 2000.0);
        assert!(s.r_hat < 1.01);
        assert!(s.warnings.is_empty(), "{:?}", s.warnings);
    }

    #[test]
    fn test_summary_flags_unmixed_chains() {
        let s = summary(&bad_chains(), &SummaryOptions::default()).unwrap();
        assert!(s.warnings.iter().any(|w| matches!(w, Warning::LowEss { .. })));
        assert!(s.warnings.iter().any(|w| matches!(w, Warning::HighRhat { .. })));
    }

    #[test]
    fn test_summary_of_discrete_parameter() {
        let chains = bernoulli_chains(4, 1000, 0.3, 5);
        let s = summary(&chains, &SummaryOptions::default()).unwrap();
        assert_abs_diff_eq!(s.mean, 0.3, epsilon = 0.03);
        assert_eq!((s.hdi_lower, s.hdi_upper), (0.0, 1.0));
        assert!(s.ess_tail > 2000.0, "tail: {}", s.ess_tail);
        assert!(s.r_hat < 1.01);
        assert!(s.warnings.is_empty(), "{:?}", s.warnings);
    }

    #[test]
    fn test_summary_of_alternating_chain() {
        let chains: Array2 = vec![(0..8).map(|i| (1 + i % 2) as f64).collect()];
        let s = summary(&chains, &SummaryOptions::default()).unwrap();
        assert_abs_diff_eq!(s.mean, 1.5, epsilon = 1e-12);
        assert!(s.ess_bulk > 0.0 && s.mcse_sd.is_finite());
        assert!(matches!(
            summary(&vec![vec![1.0, 2.0, 1.0, 2.0]], &SummaryOptions::default()),
            Err(Error::InsufficientDraws { required: 8, actual: 4 })
        ));
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: SummaryOptions = serde_json::from_str(r#"{"hdi_prob": 0.5}"#).unwrap();
        assert_eq!(options.hdi_prob, 0.5);
        assert_eq!(options.thresholds, DiagnosticThresholds::default());
    }
}
