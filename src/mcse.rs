use crate::error::{Error, Result};
use crate::ess::{effective_sample_size, MIN_DRAWS};
use crate::transform::{indicator, map_draws, EssMethod};
use crate::utils::{flatten, mean, quantile_sorted, sample_sd, sorted_draws, validate_chains};
use crate::Array2;
use average::Variance;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Beta, ContinuousCDF};

/// Statistic whose Monte Carlo standard error is estimated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum McseMethod {
    #[default]
    Mean,
    Sd,
    Median,
    Quantile(f64),
}

/// Monte Carlo standard error by batch means.
///
/// Each chain is cut into `floor(sqrt(N))` contiguous batches (trailing
/// draws that do not fill a batch are dropped).  The batch means of all
/// chains are pooled and the standard error is their standard deviation
/// over the square root of the number of batches.  Other targets are
/// handled by transforming the draws first:
///
/// * `Sd` uses the batch means of the squared deviations and the delta
///   method, `SE(sd) = SE(var) / (2 sd)`.
/// * `Quantile(p)` and `Median` use the batch means of the indicator
///   `x <= q_p` to get a standard error on the probability scale, which is
///   mapped back through the empirical quantile function.
pub fn mcse_batch_means(chains: &Array2, method: McseMethod) -> Result<f64> {
    validate_chains(chains, MIN_DRAWS)?;
    match method {
        McseMethod::Mean => batch_means_se(chains),
        McseMethod::Sd => {
            let all = flatten(chains);
            let xbar = mean(&all)?;
            let sd = sample_sd(&all)?;
            if sd <= 0.0 {
                return Err(Error::DegenerateInput(
                    "standard error of sd undefined for constant draws".into(),
                ));
            }
            let squared = map_draws(chains, |x| (x - xbar).powi(2));
            Ok(batch_means_se(&squared)? / (2.0 * sd))
        }
        McseMethod::Median => quantile_batch_means_se(chains, 0.5),
        McseMethod::Quantile(prob) => quantile_batch_means_se(chains, prob),
    }
}

/// Monte Carlo standard error from the effective sample size of the
/// matching target:
///
/// * `Mean`: `sd / sqrt(ess_mean)`,
/// * `Sd`: `sd * sqrt(e * (1 - 1/ess)^(ess - 1) - 1)` with `ess_sd`,
/// * `Quantile(p)`/`Median`: half the distance between the empirical
///   quantiles at the 15.87% and 84.13% quantiles of
///   `Beta(ess * p + 1, ess * (1 - p) + 1)`.
///
/// See the Stan reference manual section
/// ["Estimation of MCMC Standard Error"](https://mc-stan.org/docs/2_24/reference-manual/effective-sample-size-section.html#estimation-of-mcmc-standard-error)
///
/// The effective sample sizes use split chains, so every chain needs at
/// least `2 * MIN_DRAWS` draws.
pub fn mcse(chains: &Array2, method: McseMethod) -> Result<f64> {
    validate_chains(chains, 2 * MIN_DRAWS)?;
    let all = flatten(chains);
    match method {
        McseMethod::Mean => {
            let ess = effective_sample_size(chains, EssMethod::Mean)?;
            Ok(sample_sd(&all)? / ess.sqrt())
        }
        McseMethod::Sd => {
            let ess = effective_sample_size(chains, EssMethod::Sd)?;
            let fac = (std::f64::consts::E * (1.0 - 1.0 / ess).powf(ess - 1.0) - 1.0).sqrt();
            Ok(sample_sd(&all)? * fac)
        }
        McseMethod::Median => quantile_ess_se(chains, 0.5),
        McseMethod::Quantile(prob) => quantile_ess_se(chains, prob),
    }
}

fn batch_means_se(chains: &Array2) -> Result<f64> {
    let num_draws = chains[0].len();
    let num_batches = ((num_draws as f64).sqrt().floor() as usize).max(2);
    let batch_size = num_draws / num_batches;
    let batch_means: Vec<f64> = chains
        .iter()
        .flat_map(|chain| {
            chain
                .chunks_exact(batch_size)
                .take(num_batches)
                .map(|batch| batch.iter().sum::<f64>() / batch_size as f64)
        })
        .collect();
    let spread: Variance = batch_means.iter().copied().collect();
    Ok((spread.sample_variance() / batch_means.len() as f64).sqrt())
}

fn quantile_batch_means_se(chains: &Array2, prob: f64) -> Result<f64> {
    let sorted = sorted_draws(chains);
    let q = quantile_sorted(&sorted, prob)?;
    let se_prob = batch_means_se(&indicator(chains, |x| x <= q))?;
    let lo = quantile_sorted(&sorted, (prob - se_prob).max(0.0))?;
    let hi = quantile_sorted(&sorted, (prob + se_prob).min(1.0))?;
    Ok((hi - lo) / 2.0)
}

fn quantile_ess_se(chains: &Array2, prob: f64) -> Result<f64> {
    let ess = effective_sample_size(chains, EssMethod::Quantile(prob))?;
    let beta = Beta::new(ess * prob + 1.0, ess * (1.0 - prob) + 1.0)
        .map_err(|e| Error::DegenerateInput(e.to_string()))?;
    let sorted = sorted_draws(chains);
    let th1 = quantile_sorted(&sorted, beta.inverse_cdf(0.158_655_3))?;
    let th2 = quantile_sorted(&sorted, beta.inverse_cdf(0.841_344_7))?;
    Ok((th2 - th1) / 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ar1_chains, bad_chains, normal_chains, uniform_chains};

    #[test]
    fn test_batch_means_iid_matches_naive_standard_error() {
        let chains = normal_chains(2, 2500, 4);
        let naive = 1.0 / (5000f64).sqrt();
        let se = mcse_batch_means(&chains, McseMethod::Mean).unwrap();
        assert_relative_eq!(se, naive, max_relative = 0.3);
        let se_ess = mcse(&chains, McseMethod::Mean).unwrap();
        assert_relative_eq!(se_ess, naive, max_relative = 0.2);
    }

    #[test]
    fn test_autocorrelation_inflates_standard_error() {
        let iid = normal_chains(2, 2500, 6);
        let ar = ar1_chains(2, 2500, 0.9, 6);
        let se_iid = mcse_batch_means(&iid, McseMethod::Mean).unwrap();
        let se_ar = mcse_batch_means(&ar, McseMethod::Mean).unwrap();
        // sqrt((1 + phi) / (1 - phi)) is about 4.4 for phi = 0.9
        assert!(se_ar > 2.5 * se_iid, "iid {} vs ar {}", se_iid, se_ar);
        let ess_ar = mcse(&ar, McseMethod::Mean).unwrap();
        assert!(ess_ar > 2.5 * se_iid, "iid {} vs ar {}", se_iid, ess_ar);
    }

    #[test]
    fn test_targets() {
        let chains = uniform_chains(2, 2000, 9);
        for method in [
            McseMethod::Mean,
            McseMethod::Sd,
            McseMethod::Median,
            McseMethod::Quantile(0.9),
        ] {
            let bm = mcse_batch_means(&chains, method).unwrap();
            let es = mcse(&chains, method).unwrap();
            assert!(bm > 0.0 && bm < 0.05, "{:?} batch means: {}", method, bm);
            assert!(es > 0.0 && es < 0.05, "{:?} ess: {}", method, es);
        }
    }

    #[test]
    fn test_ordered_chains_have_large_error() {
        let good = uniform_chains(2, 500, 13);
        let bad = bad_chains();
        let se_good = mcse(&good, McseMethod::Mean).unwrap();
        let se_bad = mcse(&bad, McseMethod::Mean).unwrap();
        assert!(se_bad > 5.0 * se_good, "good {} vs bad {}", se_good, se_bad);
    }

    #[test]
    fn test_batch_layout() {
        // 16 draws -> 4 batches of 4 per chain, batch means 1.5, 5.5, 9.5, 13.5
        let chains = vec![(0..16).map(f64::from).collect()];
        let expected = (sample_sd_of(&[1.5, 5.5, 9.5, 13.5])) / 2.0;
        assert_abs_diff_eq!(
            mcse_batch_means(&chains, McseMethod::Mean).unwrap(),
            expected,
            epsilon = 1e-12
        );
    }

    fn sample_sd_of(x: &[f64]) -> f64 {
        sample_sd(x).unwrap()
    }

    #[test]
    fn test_invalid_input() {
        assert!(matches!(
            mcse_batch_means(&vec![vec![1.0, 2.0]], McseMethod::Mean),
            Err(Error::InsufficientDraws { .. })
        ));
        assert!(matches!(
            mcse(
                &vec![vec![1.0, f64::INFINITY, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]],
                McseMethod::Mean
            ),
            Err(Error::NonFinite { .. })
        ));
        assert_eq!(
            mcse(&vec![vec![0.0, 1.0, 2.0, 3.0]], McseMethod::Mean),
            Err(Error::InsufficientDraws {
                required: 8,
                actual: 4
            })
        );
        assert!(matches!(
            mcse_batch_means(&vec![vec![2.0; 9]], McseMethod::Sd),
            Err(Error::DegenerateInput(_))
        ));
    }
}
