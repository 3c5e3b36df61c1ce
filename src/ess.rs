use crate::error::{Error, Result};
use crate::transform::{DrawTransform, EssMethod};
use crate::utils::{mean, sample_variance, split_chains, validate_chains};
use crate::{Array1, Array2};
use arima::acf;
use tracing::debug;

/// Minimum number of draws per chain the estimator accepts.
pub const MIN_DRAWS: usize = 4;

/// Computes the effective sample size (ESS) for the specified
/// parameter across all kept samples.  The value returned is the
/// minimum of ESS and the number_total_draws * log10(number_total_draws).
///
/// All chains must have the same length.  Note that the effective sample size
/// can not be estimated with fewer than four draws.
///
/// See more details in Stan reference manual section
/// ["Effective Sample Size"](http://mc-stan.org/users/documentation)
///
/// Based on reference implementation in Stan v2.4.0 at
/// [https://github.com/stan-dev/stan/blob/v2.24.0/src/stan/analyze/mcmc/compute_effective_sample_size.hpp#L32-L138]()
///
///
/// # Arguments
/// * `chains` - Reference to a vector of chains, each of which is a vector of samples for
///              the same parameter
pub fn compute_effective_sample_size(chains: &Array2) -> Result<f64> {
    let num_chains = chains.len();
    let num_draws = validate_chains(chains, MIN_DRAWS)?;

    let first = chains[0][0];
    // the only way this holds is if every single element of all the
    // chains is the same
    if chains.iter().flatten().all(|x| (x - first).abs() < 1e-10) {
        return Err(Error::DegenerateInput(format!(
            "no ESS when elements are all constant (value={})",
            first
        )));
    }

    let mut chain_acov: Array2 = Vec::with_capacity(num_chains);
    let mut chain_mean: Array1 = Vec::with_capacity(num_chains);
    let mut chain_var: Array1 = Vec::with_capacity(num_chains);
    for chain in chains.iter() {
        let acov = autocovariance(chain)?;
        chain_mean.push(mean(chain)?);
        chain_var.push(acov[0] * num_draws as f64 / (num_draws as f64 - 1.0));
        chain_acov.push(acov);
    }

    let mean_var = mean(&chain_var)?;
    let mut var_plus = mean_var * (num_draws as f64 - 1.0) / num_draws as f64;
    if num_chains > 1 {
        var_plus += sample_variance(&chain_mean)?;
    }
    if var_plus <= 0.0 {
        return Err(Error::DegenerateInput(
            "no ESS when pooled variance is zero".into(),
        ));
    }

    let mut rho_hat_s: Array1 = vec![0.0; num_draws];
    let mut acov_s: Array1 = chain_acov.iter().map(|acov| acov[1]).collect();
    let mut rho_hat_even = 1.0;
    rho_hat_s[0] = rho_hat_even;
    let mut rho_hat_odd = 1.0 - (mean_var - mean(&acov_s)?) / var_plus;
    rho_hat_s[1] = rho_hat_odd;

    // Convert raw autocovariance estimators into Geyer's initial
    // positive sequence. Loop only until num_draws - 4 to
    // leave the last pair of autocorrelations as a bias term that
    // reduces variance in the case of antithetical chains.
    let mut s = 1;
    while s < (num_draws - 4) && (rho_hat_even + rho_hat_odd) > 0.0 {
        for (c, acov) in chain_acov.iter().enumerate() {
            acov_s[c] = acov[s + 1];
        }
        rho_hat_even = 1.0 - (mean_var - mean(&acov_s)?) / var_plus;
        for (c, acov) in chain_acov.iter().enumerate() {
            acov_s[c] = acov[s + 2];
        }
        rho_hat_odd = 1.0 - (mean_var - mean(&acov_s)?) / var_plus;
        if (rho_hat_even + rho_hat_odd) >= 0.0 {
            rho_hat_s[s + 1] = rho_hat_even;
            rho_hat_s[s + 2] = rho_hat_odd;
        }
        s += 2;
    }

    let max_s = s;
    // this is used in the improved estimate, which reduces variance
    // in antithetic case -- see tau_hat below
    if rho_hat_even > 0.0 {
        rho_hat_s[max_s + 1] = rho_hat_even;
    }

    // Convert Geyer's initial positive sequence into an initial
    // monotone sequence
    let mut s = 1;
    while max_s >= 3 && s <= (max_s - 3) {
        if (rho_hat_s[s + 1] + rho_hat_s[s + 2]) > (rho_hat_s[s - 1] + rho_hat_s[s]) {
            rho_hat_s[s + 1] = (rho_hat_s[s - 1] + rho_hat_s[s]) / 2.0;
            rho_hat_s[s + 2] = rho_hat_s[s + 1];
        };
        s += 2;
    }

    let num_total_draws = num_chains as f64 * num_draws as f64;
    // Geyer's truncated estimator for the asymptotic variance
    // Improved estimate reduces variance in antithetic case
    let tau_hat: f64 =
        -1.0 + 2.0 * rho_hat_s.iter().take(max_s).sum::<f64>() + rho_hat_s[max_s + 1];
    let option1: f64 = num_total_draws / tau_hat;
    let option2: f64 = num_total_draws * num_total_draws.log10();
    Ok(option1.min(option2))
}

/// Computes the split effective sample size (ESS) for the specified
/// parameter across all kept samples.  The value returned is the
/// minimum of ESS and the number_total_draws * log10(number_total_draws).
/// When the number of total draws N is odd, the (N+1)/2th draw is ignored.
///
/// See more details in Stan reference manual section
/// ["Effective Sample Size"](http://mc-stan.org/users/documentation)
///
/// Based on reference implementation in Stan v2.4.0 at
/// [https://github.com/stan-dev/stan/blob/v2.24.0/src/stan/analyze/mcmc/compute_effective_sample_size.hpp#L185-L199]()
pub fn compute_split_effective_sample_size(chains: &Array2) -> Result<f64> {
    validate_chains(chains, 2 * MIN_DRAWS)?;
    compute_effective_sample_size(&split_chains(chains)?)
}

/// Effective sample size for the part of the posterior selected by
/// `method`, e.g. [`EssMethod::Bulk`] or [`EssMethod::Tail`].
///
/// Methods that split the chains need at least `2 * MIN_DRAWS` draws per
/// chain.
pub fn effective_sample_size(chains: &Array2, method: EssMethod) -> Result<f64> {
    let min_draws = if method.splits_chains() {
        2 * MIN_DRAWS
    } else {
        MIN_DRAWS
    };
    validate_chains(chains, min_draws)?;
    effective_sample_size_with(chains, &method)
}

/// Effective sample size after an arbitrary pre-transform.  When the
/// transform yields several chain sets the smallest ESS is returned.
///
/// Sets without variation, such as the upper tail indicator of a discrete
/// parameter, are skipped; the call fails only when every set is
/// degenerate.
pub fn effective_sample_size_with<T: DrawTransform + ?Sized>(
    chains: &Array2,
    transform: &T,
) -> Result<f64> {
    validate_chains(chains, MIN_DRAWS)?;
    let mut ess: Option<f64> = None;
    let mut degenerate = None;
    for set in transform.apply(chains)? {
        match compute_effective_sample_size(&set) {
            Ok(value) => ess = Some(ess.map_or(value, |e| e.min(value))),
            Err(e @ Error::DegenerateInput(_)) => {
                debug!(error = %e, "skipping constant transformed draws");
                degenerate = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    match (ess, degenerate) {
        (Some(value), _) => Ok(value),
        (None, Some(e)) => Err(e),
        (None, None) => Err(Error::InputShape("transform produced no draws".into())),
    }
}

/// Biased (1/N) autocovariance at every lag, as used by Stan.
pub fn autocovariance(chain: &[f64]) -> Result<Array1> {
    acf::acf(chain, None, true).map_err(|_| {
        Error::DegenerateInput(format!(
            "autocovariance undefined for chain of {} draws",
            chain.len()
        ))
    })
}

/// Normalized autocorrelation of one chain for lags `0..=max_lag`
/// (all lags when `max_lag` is `None`).
pub fn autocorrelation(chain: &[f64], max_lag: Option<usize>) -> Result<Array1> {
    if chain.len() < 2 {
        return Err(Error::InsufficientDraws {
            required: 2,
            actual: chain.len(),
        });
    }
    crate::utils::check_finite(&[chain.to_vec()])?;
    let acov = autocovariance(chain)?;
    if acov[0] <= 0.0 {
        return Err(Error::DegenerateInput(
            "autocorrelation of a constant chain".into(),
        ));
    }
    let lags = max_lag.map_or(acov.len(), |m| (m + 1).min(acov.len()));
    Ok(acov.iter().take(lags).map(|c| c / acov[0]).collect())
}
