use crate::error::{Error, Result};
use crate::utils::{median_sorted, quantile_sorted, sorted_draws, split_chains};
use crate::{Array1, Array2};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

/// A pre-transform applied to a chain set before a shared estimator runs.
///
/// Returning more than one set means the estimator is evaluated on each of
/// them and the most pessimistic (smallest) value is reported.
pub trait DrawTransform {
    fn apply(&self, chains: &Array2) -> Result<Vec<Array2>>;
}

impl<F> DrawTransform for F
where
    F: Fn(&Array2) -> Result<Vec<Array2>>,
{
    fn apply(&self, chains: &Array2) -> Result<Vec<Array2>> {
        self(chains)
    }
}

/// Which part of the posterior an effective sample size refers to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum EssMethod {
    /// Rank-normalized split chains.
    #[default]
    Bulk,
    /// Minimum over the 5% and 95% quantile indicators.
    Tail,
    /// Indicator of the given quantile.
    Quantile(f64),
    Mean,
    /// Minimum over the draws and their squared deviations.
    Sd,
    Median,
    /// Median absolute deviation.
    Mad,
    /// Rank-normalized, no splitting.
    ZScale,
    /// Folded about the median, then rank-normalized.
    Folded,
    /// Raw draws, no splitting.
    Identity,
    /// Indicator of the interval between two quantiles.
    Local { lower: f64, upper: f64 },
}

impl EssMethod {
    /// Whether the transform works on split chains.
    pub fn splits_chains(&self) -> bool {
        !matches!(self, EssMethod::ZScale | EssMethod::Identity)
    }
}

impl DrawTransform for EssMethod {
    fn apply(&self, chains: &Array2) -> Result<Vec<Array2>> {
        match *self {
            EssMethod::Bulk => Ok(vec![z_scale(&split_chains(chains)?)?]),
            EssMethod::Tail => {
                let split = split_chains(chains)?;
                let sorted = sorted_draws(&split);
                let q05 = quantile_sorted(&sorted, 0.05)?;
                let q95 = quantile_sorted(&sorted, 0.95)?;
                Ok(vec![indicator(&split, |x| x <= q05), indicator(&split, |x| x <= q95)])
            }
            EssMethod::Quantile(prob) => {
                let split = split_chains(chains)?;
                let q = quantile_sorted(&sorted_draws(&split), prob)?;
                Ok(vec![indicator(&split, |x| x <= q)])
            }
            EssMethod::Mean => Ok(vec![split_chains(chains)?]),
            EssMethod::Sd => {
                let split = split_chains(chains)?;
                let all = crate::utils::flatten(&split);
                let xbar = crate::utils::mean(&all)?;
                let squared = map_draws(&split, |x| (x - xbar).powi(2));
                Ok(vec![split, squared])
            }
            EssMethod::Median => {
                let split = split_chains(chains)?;
                let med = median_sorted(&sorted_draws(&split))?;
                Ok(vec![indicator(&split, |x| x <= med)])
            }
            EssMethod::Mad => {
                let split = split_chains(chains)?;
                let med = median_sorted(&sorted_draws(&split))?;
                let folded = map_draws(&split, |x| (x - med).abs());
                let mad = median_sorted(&sorted_draws(&folded))?;
                Ok(vec![indicator(&folded, |x| x <= mad)])
            }
            EssMethod::ZScale => Ok(vec![z_scale(chains)?]),
            EssMethod::Folded => Ok(vec![z_scale(&fold(&split_chains(chains)?)?)?]),
            EssMethod::Identity => Ok(vec![chains.clone()]),
            EssMethod::Local { lower, upper } => {
                if lower >= upper {
                    return Err(Error::InputShape(format!(
                        "local interval [{}, {}] is empty",
                        lower, upper
                    )));
                }
                let split = split_chains(chains)?;
                let sorted = sorted_draws(&split);
                let lo = quantile_sorted(&sorted, lower)?;
                let hi = quantile_sorted(&sorted, upper)?;
                Ok(vec![indicator(&split, |x| lo < x && x <= hi)])
            }
        }
    }
}

pub fn map_draws<F: Fn(f64) -> f64>(chains: &Array2, f: F) -> Array2 {
    chains
        .iter()
        .map(|c| c.iter().map(|&x| f(x)).collect())
        .collect()
}

/// 1.0 where `pred` holds, 0.0 elsewhere.
pub fn indicator<F: Fn(f64) -> bool>(chains: &Array2, pred: F) -> Array2 {
    map_draws(chains, |x| if pred(x) { 1.0 } else { 0.0 })
}

/// Absolute deviation from the pooled median.
pub fn fold(chains: &Array2) -> Result<Array2> {
    let med = median_sorted(&sorted_draws(chains))?;
    Ok(map_draws(chains, |x| (x - med).abs()))
}

/// Average ranks (1-based) of the pooled draws, in chain order.
pub fn pooled_ranks(chains: &Array2) -> Array2 {
    let mut flat: Vec<(f64, usize, usize)> = chains
        .iter()
        .enumerate()
        .flat_map(|(ci, c)| c.iter().enumerate().map(move |(ti, &x)| (x, ci, ti)))
        .collect();
    flat.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut ranks: Array2 = chains.iter().map(|c| vec![0.0; c.len()]).collect();
    let n = flat.len();
    let mut i = 0;
    while i < n {
        let mut j = i + 1;
        while j < n && flat[j].0 == flat[i].0 {
            j += 1;
        }
        // ties share the mean of ranks i+1..=j
        let rank = 0.5 * ((i + 1) as f64 + j as f64);
        for &(_, ci, ti) in &flat[i..j] {
            ranks[ci][ti] = rank;
        }
        i = j;
    }
    ranks
}

/// Rank-normalizes the pooled draws: ranks are mapped through the standard
/// normal quantile function with Blom's offset, `(r - 3/8) / (S + 1/4)`.
pub fn z_scale(chains: &Array2) -> Result<Array2> {
    let size: usize = chains.iter().map(|c| c.len()).sum();
    if size == 0 {
        return Err(Error::InputShape("can't rank-normalize empty chains".into()));
    }
    let normal = Normal::new(0.0, 1.0).map_err(|e| Error::DegenerateInput(e.to_string()))?;
    let size = size as f64;
    let ranks = pooled_ranks(chains);
    Ok(map_ranks(&ranks, |r| normal.inverse_cdf((r - 0.375) / (size + 0.25))))
}

fn map_ranks<F: Fn(f64) -> f64>(ranks: &Array2, f: F) -> Array2 {
    ranks
        .iter()
        .map(|c| c.iter().map(|&r| f(r)).collect::<Array1>())
        .collect()
}
