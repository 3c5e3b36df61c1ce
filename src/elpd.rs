//! Expected log pointwise predictive density: WAIC and PSIS-LOO.
use crate::error::{Error, Result, Warning};
use crate::psis::smooth_log_weights;
use crate::utils::{check_finite, logsumexp, sample_variance, transpose};
use crate::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Scale on which information criteria are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Scale {
    /// `-2 * elpd`; lower is better.
    #[default]
    Deviance,
    /// `elpd`; higher is better.
    Log,
    /// `-elpd`; lower is better.
    NegativeLog,
}

impl Scale {
    /// Multiplier from the log score to this scale.
    pub fn factor(self) -> f64 {
        match self {
            Scale::Deviance => -2.0,
            Scale::Log => 1.0,
            Scale::NegativeLog => -1.0,
        }
    }

    /// Whether a larger value means a better model.
    pub fn higher_is_better(self) -> bool {
        self == Scale::Log
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Criterion {
    Loo,
    Waic,
}

/// Log-likelihood of every observation under every posterior draw.
///
/// Stored observation-major: `observation(i)` holds the `S` draws of
/// observation `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct PointwiseLogLikelihood {
    observations: Array2,
}

impl PointwiseLogLikelihood {
    /// From a draws × observations table.
    pub fn from_draws(draws: Array2) -> Result<Self> {
        let num_obs = draws.first().map_or(0, |d| d.len());
        if draws.iter().any(|d| d.len() != num_obs) {
            return Err(Error::InputShape(
                "every draw must cover the same observations".into(),
            ));
        }
        Self::from_observations(transpose(&draws))
    }

    /// From an observations × draws table.
    pub fn from_observations(observations: Array2) -> Result<Self> {
        if observations.is_empty() {
            return Err(Error::InputShape("no observations".into()));
        }
        let num_draws = observations[0].len();
        if num_draws < 2 {
            return Err(Error::InsufficientDraws {
                required: 2,
                actual: num_draws,
            });
        }
        if observations.iter().any(|o| o.len() != num_draws) {
            return Err(Error::InputShape(
                "every observation must have the same number of draws".into(),
            ));
        }
        check_finite(&observations)?;
        Ok(Self { observations })
    }

    pub fn num_observations(&self) -> usize {
        self.observations.len()
    }

    pub fn num_draws(&self) -> usize {
        self.observations[0].len()
    }

    pub fn observation(&self, i: usize) -> &[f64] {
        &self.observations[i]
    }

    pub fn observations(&self) -> impl Iterator<Item = &[f64]> {
        self.observations.iter().map(|o| o.as_slice())
    }

    /// `ln(mean_s exp(loglik_si))` for every observation.
    pub fn pointwise_lppd(&self) -> Array1 {
        let ln_s = (self.num_draws() as f64).ln();
        self.observations().map(|o| logsumexp(o) - ln_s).collect()
    }
}

/// Predictive accuracy estimate of one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElpdData {
    pub criterion: Criterion,
    /// Total on `scale`.
    pub value: f64,
    pub se: f64,
    /// Effective number of parameters.
    pub p: f64,
    pub scale: Scale,
    /// Per-observation contributions on `scale`; empty when only a summary
    /// is known.
    pub pointwise: Array1,
    pub pareto_k: Option<Array1>,
    pub warning: bool,
    pub warnings: Vec<Warning>,
    pub num_draws: usize,
    pub num_observations: usize,
}

impl ElpdData {
    /// An estimate known only through its total and standard error.
    pub fn from_summary(criterion: Criterion, value: f64, se: f64, p: f64, scale: Scale) -> Self {
        Self {
            criterion,
            value,
            se,
            p,
            scale,
            pointwise: Vec::new(),
            pareto_k: None,
            warning: false,
            warnings: Vec::new(),
            num_draws: 0,
            num_observations: 0,
        }
    }

    /// Total elpd on the log scale.
    pub fn elpd(&self) -> f64 {
        self.value / self.scale.factor()
    }

    /// Pointwise elpd on the log scale.
    pub fn pointwise_elpd(&self) -> Array1 {
        let factor = self.scale.factor();
        self.pointwise.iter().map(|v| v / factor).collect()
    }

    /// Returns the same estimate expressed on another scale.
    pub fn rescale(&self, scale: Scale) -> Self {
        let ratio = scale.factor() / self.scale.factor();
        Self {
            value: self.value * ratio,
            se: self.se * ratio.abs(),
            pointwise: self.pointwise.iter().map(|v| v * ratio).collect(),
            scale,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LooOptions {
    pub scale: Scale,
    /// Largest share of the draws treated as the Pareto tail.
    pub tail_fraction: f64,
    /// Relative efficiency of the draws (ESS / S).
    pub r_eff: f64,
    /// Observations whose Pareto shape exceeds this are unreliable.
    pub pareto_k_threshold: f64,
}

impl Default for LooOptions {
    fn default() -> Self {
        Self {
            scale: Scale::Deviance,
            tail_fraction: 0.2,
            r_eff: 1.0,
            pareto_k_threshold: 0.7,
        }
    }
}

/// Sum of the pointwise values and `sqrt(n * var(pointwise))`.  The
/// variance uses the `n - 1` denominator, so `se` is `sqrt(n / (n - 1))`
/// times the population-variance estimate.
fn total_and_se(pointwise: &[f64]) -> Result<(f64, f64)> {
    let n = pointwise.len() as f64;
    let se = if pointwise.len() > 1 {
        (n * sample_variance(pointwise)?).sqrt()
    } else {
        0.0
    };
    Ok((pointwise.iter().sum(), se))
}

/// Pareto smoothed importance sampling leave-one-out cross validation.
///
/// The raw importance ratio of draw `s` for observation `i` is
/// `1 / p(y_i | theta_s)`, so the raw log weights are the negated
/// log-likelihoods.  Each observation's weights are smoothed with
/// [`smooth_log_weights`] and the leave-one-out predictive density is
/// `ln sum_s w_s p(y_i | theta_s)`.
pub fn loo(loglik: &PointwiseLogLikelihood, options: &LooOptions) -> Result<ElpdData> {
    let factor = options.scale.factor();
    let mut loo_i = Vec::with_capacity(loglik.num_observations());
    let mut pareto_k = Vec::with_capacity(loglik.num_observations());
    for obs in loglik.observations() {
        let raw: Array1 = obs.iter().map(|l| -l).collect();
        let smoothed = smooth_log_weights(&raw, options.r_eff, options.tail_fraction)?;
        let weighted: Array1 = smoothed
            .log_weights
            .iter()
            .zip(obs)
            .map(|(w, l)| w + l)
            .collect();
        loo_i.push(logsumexp(&weighted));
        pareto_k.push(smoothed.pareto_k);
    }

    let lppd: f64 = loglik.pointwise_lppd().iter().sum();
    let pointwise: Array1 = loo_i.iter().map(|v| v * factor).collect();
    let (value, se) = total_and_se(&pointwise)?;
    let p = lppd - loo_i.iter().sum::<f64>();

    let mut warnings = Vec::new();
    let bad = pareto_k
        .iter()
        .filter(|&&k| k > options.pareto_k_threshold)
        .count();
    if bad > 0 {
        warn!(
            count = bad,
            threshold = options.pareto_k_threshold,
            "estimated shape parameter of Pareto distribution is too high for some observations"
        );
        warnings.push(Warning::HighParetoK {
            count: bad,
            threshold: options.pareto_k_threshold,
        });
    }

    Ok(ElpdData {
        criterion: Criterion::Loo,
        value,
        se,
        p,
        scale: options.scale,
        pointwise,
        pareto_k: Some(pareto_k),
        warning: !warnings.is_empty(),
        warnings,
        num_draws: loglik.num_draws(),
        num_observations: loglik.num_observations(),
    })
}

/// Widely applicable information criterion.
///
/// `waic_i = lppd_i - var_s(loglik_si)`; the penalty uses the sample
/// variance over draws.  Observations whose variance exceeds 0.4 make the
/// estimate unreliable.
pub fn waic(loglik: &PointwiseLogLikelihood, scale: Scale) -> Result<ElpdData> {
    const VARIANCE_LIMIT: f64 = 0.4;

    let factor = scale.factor();
    let lppd_i = loglik.pointwise_lppd();
    let var_i = loglik
        .observations()
        .map(sample_variance)
        .collect::<Result<Array1>>()?;
    let pointwise: Array1 = lppd_i
        .iter()
        .zip(&var_i)
        .map(|(l, v)| factor * (l - v))
        .collect();
    let (value, se) = total_and_se(&pointwise)?;

    let mut warnings = Vec::new();
    let high = var_i.iter().filter(|&&v| v > VARIANCE_LIMIT).count();
    if high > 0 {
        warn!(
            count = high,
            "posterior variance of the log predictive densities exceeds 0.4"
        );
        warnings.push(Warning::HighPosteriorVariance { count: high });
    }

    Ok(ElpdData {
        criterion: Criterion::Waic,
        value,
        se,
        p: var_i.iter().sum(),
        scale,
        pointwise,
        pareto_k: None,
        warning: !warnings.is_empty(),
        warnings,
        num_draws: loglik.num_draws(),
        num_observations: loglik.num_observations(),
    })
}

/// Standard error of the difference between two estimates,
/// `sqrt(n * var(a_i - b_i))` over the pointwise contributions.
pub fn difference_se(a: &ElpdData, b: &ElpdData) -> Result<f64> {
    if a.scale != b.scale {
        return Err(Error::InputShape("estimates are on different scales".into()));
    }
    if a.pointwise.len() != b.pointwise.len() || a.pointwise.is_empty() {
        return Err(Error::InputShape(format!(
            "pointwise lengths differ or are empty ({} vs {})",
            a.pointwise.len(),
            b.pointwise.len()
        )));
    }
    let diff: Array1 = a
        .pointwise
        .iter()
        .zip(&b.pointwise)
        .map(|(x, y)| x - y)
        .collect();
    Ok(total_and_se(&diff)?.1)
}
