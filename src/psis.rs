//! Pareto smoothed importance sampling.
//!
//! The largest raw importance ratios are replaced by the expected order
//! statistics of a generalized Pareto distribution fitted to them.  The
//! fitted shape `k` doubles as a diagnostic of how heavy the tail of the
//! ratios is.
//!
//! See Vehtari, Simpson, Gelman, Yao and Gabry,
//! ["Pareto Smoothed Importance Sampling"](https://arxiv.org/abs/1507.02646).
use crate::error::{Error, Result};
use crate::utils::logsumexp;
use crate::Array1;

/// Smoothed, self-normalized log weights and the fitted tail shape.
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothedWeights {
    pub log_weights: Array1,
    /// Generalized Pareto shape of the tail.  `+inf` when the tail is too
    /// short to fit.
    pub pareto_k: f64,
}

/// Smooths raw importance log weights for one observation.
///
/// The tail holds the `ceil(min(tail_fraction * S, 3 * sqrt(S / r_eff)))`
/// largest weights.  Tails of four or fewer points are left unsmoothed and
/// reported with `pareto_k = +inf`.
pub fn smooth_log_weights(
    log_weights: &[f64],
    r_eff: f64,
    tail_fraction: f64,
) -> Result<SmoothedWeights> {
    let n = log_weights.len();
    if n < 2 {
        return Err(Error::InsufficientDraws {
            required: 2,
            actual: n,
        });
    }
    if !(r_eff > 0.0) || !(tail_fraction > 0.0 && tail_fraction < 1.0) {
        return Err(Error::InputShape(format!(
            "invalid smoothing settings r_eff={} tail_fraction={}",
            r_eff, tail_fraction
        )));
    }
    crate::utils::check_finite(&[log_weights.to_vec()])?;

    let max = log_weights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut x: Array1 = log_weights.iter().map(|w| w - max).collect();

    let tail_len = (tail_fraction * n as f64)
        .min(3.0 * (n as f64 / r_eff).sqrt())
        .ceil() as usize;
    let tail_len = tail_len.min(n - 1);

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| x[a].total_cmp(&x[b]));
    let cutoff = x[order[n - tail_len - 1]].max(f64::MIN_POSITIVE.ln());
    let exp_cutoff = cutoff.exp();

    // indices of the tail, in increasing order of weight
    let tail: Vec<usize> = order.iter().copied().filter(|&i| x[i] > cutoff).collect();

    let pareto_k = if tail.len() <= 4 {
        f64::INFINITY
    } else {
        let exceedances: Array1 = tail.iter().map(|&i| x[i].exp() - exp_cutoff).collect();
        let (k, sigma) = gpd_fit(&exceedances)?;
        if k.is_finite() {
            let m = tail.len() as f64;
            for (j, &i) in tail.iter().enumerate() {
                let prob = (j as f64 + 0.5) / m;
                x[i] = (gpd_quantile(prob, k, sigma) + exp_cutoff).ln();
            }
            for v in x.iter_mut() {
                // smoothed weights never exceed the largest raw weight
                if *v > 0.0 {
                    *v = 0.0;
                }
            }
        }
        k
    };

    let norm = logsumexp(&x);
    for v in x.iter_mut() {
        *v -= norm;
    }
    Ok(SmoothedWeights {
        log_weights: x,
        pareto_k,
    })
}

/// Estimates the shape `k` and scale `sigma` of a generalized Pareto
/// distribution from sorted, positive exceedances.
///
/// Empirical Bayes estimate of Zhang and Stephens (2009), with the weakly
/// informative prior that shrinks `k` towards 0.5 used by PSIS.
pub fn gpd_fit(sorted: &[f64]) -> Result<(f64, f64)> {
    const PRIOR_BS: f64 = 3.0;
    const PRIOR_K: f64 = 10.0;

    let n = sorted.len();
    if n < 2 {
        return Err(Error::InsufficientDraws {
            required: 2,
            actual: n,
        });
    }
    let x_max = sorted[n - 1];
    let x_quarter = sorted[((n as f64 / 4.0 + 0.5) as usize).max(1) - 1];
    if !(x_max > 0.0) || !(x_quarter > 0.0) {
        return Err(Error::DegenerateInput(
            "generalized Pareto fit needs positive exceedances".into(),
        ));
    }

    let m_est = 30 + (n as f64).sqrt() as usize;
    let b: Array1 = (1..=m_est)
        .map(|j| {
            let raw = 1.0 - (m_est as f64 / (j as f64 - 0.5)).sqrt();
            raw / (PRIOR_BS * x_quarter) + 1.0 / x_max
        })
        .collect();
    let k: Array1 = b
        .iter()
        .map(|&bj| sorted.iter().map(|&x| (-bj * x).ln_1p()).sum::<f64>() / n as f64)
        .collect();
    let len_scale: Array1 = b
        .iter()
        .zip(&k)
        .map(|(&bj, &kj)| n as f64 * ((-(bj / kj)).ln() - kj - 1.0))
        .collect();

    let weights = len_scale
        .iter()
        .map(|&li| 1.0 / len_scale.iter().map(|&lj| (lj - li).exp()).sum::<f64>());
    // drop negligible weights
    let (b, weights): (Array1, Array1) = b
        .iter()
        .copied()
        .zip(weights)
        .filter(|&(_, w)| w >= 10.0 * f64::EPSILON)
        .unzip();
    let total: f64 = weights.iter().sum();
    if !(total > 0.0) || !total.is_finite() {
        return Err(Error::DegenerateInput(
            "generalized Pareto fit has no usable profile points".into(),
        ));
    }

    let b_post: f64 = b.iter().zip(&weights).map(|(bj, w)| bj * w / total).sum();
    let k_post = sorted.iter().map(|&x| (-b_post * x).ln_1p()).sum::<f64>() / n as f64;
    let sigma = -k_post / b_post;
    let k_post = (n as f64 * k_post + PRIOR_K * 0.5) / (n as f64 + PRIOR_K);
    Ok((k_post, sigma))
}

/// Quantile function of the generalized Pareto distribution with location 0.
/// Returns NaN outside the support of the parameters.
pub fn gpd_quantile(prob: f64, k: f64, sigma: f64) -> f64 {
    if !(sigma > 0.0) || !(prob > 0.0 && prob < 1.0) {
        return f64::NAN;
    }
    if k.abs() < f64::EPSILON {
        -sigma * (-prob).ln_1p()
    } else {
        sigma * (-k * (-prob).ln_1p()).exp_m1() / k
    }
}
