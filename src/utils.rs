use crate::error::{Error, Result};
use crate::{Array1, Array2};
use average::Variance;

/// Compute the arithmetic mean of an array.
pub fn mean(arr: &[f64]) -> Result<f64> {
    if arr.is_empty() {
        return Err(Error::InputShape("can't take mean of empty array".into()));
    }
    let sum = arr.iter().sum::<f64>();
    let count = arr.len() as f64;
    Ok(sum / count)
}

/// Compute the sample variance of an array using Bessel's correction.
pub fn sample_variance(arr: &[f64]) -> Result<f64> {
    if arr.len() < 2 {
        return Err(Error::InsufficientDraws {
            required: 2,
            actual: arr.len(),
        });
    }
    let var: Variance = arr.iter().copied().collect();
    Ok(var.sample_variance())
}

/// Sample standard deviation (Bessel's correction).
pub fn sample_sd(arr: &[f64]) -> Result<f64> {
    Ok(sample_variance(arr)?.sqrt())
}

/// Checks that `chains` is a non-empty set of equal-length chains with
/// at least `min_draws` finite draws each and returns the number of draws
/// per chain.
pub fn validate_chains(chains: &Array2, min_draws: usize) -> Result<usize> {
    if chains.is_empty() {
        return Err(Error::InputShape("no chains".into()));
    }
    let num_draws = chains[0].len();
    if let Some(pos) = chains.iter().position(|c| c.len() != num_draws) {
        return Err(Error::InputShape(format!(
            "chain {} has {} draws, expected {}",
            pos,
            chains[pos].len(),
            num_draws
        )));
    }
    if num_draws < min_draws {
        return Err(Error::InsufficientDraws {
            required: min_draws,
            actual: num_draws,
        });
    }
    check_finite(chains)?;
    Ok(num_draws)
}

/// Rejects NaN and infinite entries of a nested table.
pub fn check_finite(table: &[Array1]) -> Result<()> {
    for (outer, row) in table.iter().enumerate() {
        if let Some(inner) = row.iter().position(|x| !x.is_finite()) {
            return Err(Error::NonFinite {
                outer,
                inner,
                value: row[inner],
            });
        }
    }
    Ok(())
}

/// Splits each chain into two chains of equal length.  When the
/// number of total draws N is odd, the (N+1)/2th draw is ignored.
///
/// See more details in Stan reference manual section
/// ["Effective Sample Size"](http://mc-stan.org/users/documentation).
///
/// Assumes chains are all of equal size; callers validate first.
pub fn split_chains(chains: &Array2) -> Result<Array2> {
    if chains.is_empty() {
        return Err(Error::InputShape("can't split empty array of chains".into()));
    }
    let num_draws = chains.iter().map(|c| c.len()).min().unwrap_or(0);
    if num_draws < 2 {
        return Err(Error::InsufficientDraws {
            required: 2,
            actual: num_draws,
        });
    }
    let half = num_draws / 2;
    let offset = num_draws % 2;
    let mut split_draws = Vec::with_capacity(chains.len() * 2);
    for chain in chains {
        split_draws.push(chain[..half].to_vec());
        split_draws.push(chain[(half + offset)..num_draws].to_vec());
    }
    Ok(split_draws)
}

/// Concatenates all chains into a single sample.
pub fn flatten(chains: &Array2) -> Array1 {
    chains.iter().flat_map(|c| c.iter().copied()).collect()
}

/// Sorted copy of all draws across chains.
pub fn sorted_draws(chains: &Array2) -> Array1 {
    let mut all = flatten(chains);
    all.sort_by(f64::total_cmp);
    all
}

/// Linearly interpolated quantile of an already sorted sample (numpy's
/// default "linear" rule).
pub fn quantile_sorted(sorted: &[f64], prob: f64) -> Result<f64> {
    if sorted.is_empty() {
        return Err(Error::InputShape("can't take quantile of empty array".into()));
    }
    if !(0.0..=1.0).contains(&prob) {
        return Err(Error::InputShape(format!(
            "quantile probability {} outside [0, 1]",
            prob
        )));
    }
    let pos = prob * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Ok(sorted[lo] * (1.0 - frac) + sorted[hi] * frac)
}

pub fn median_sorted(sorted: &[f64]) -> Result<f64> {
    quantile_sorted(sorted, 0.5)
}

/// Median absolute deviation around the median (unscaled).
pub fn median_abs_deviation(draws: &[f64]) -> Result<f64> {
    let mut sorted = draws.to_vec();
    sorted.sort_by(f64::total_cmp);
    let med = median_sorted(&sorted)?;
    let mut dev: Array1 = draws.iter().map(|x| (x - med).abs()).collect();
    dev.sort_by(f64::total_cmp);
    median_sorted(&dev)
}

/// Numerically stable `ln(sum(exp(x)))`.
pub fn logsumexp(x: &[f64]) -> f64 {
    let max = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + x.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// Transposes a rectangular table; callers validate the shape first.
pub fn transpose(table: &Array2) -> Array2 {
    let cols = table.first().map_or(0, |r| r.len());
    (0..cols)
        .map(|j| table.iter().map(|row| row[j]).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Array1;

    #[test]
    fn test_stats() {
        // Test our basic stats functions using numbers computed with numpy.
        let arr = vec![
            2.13829088,
            -1.06214379,
            -0.79265699,
            -0.21300888,
            -1.07155142,
            -0.50425317,
            0.95708854,
            -1.23854172,
            1.37124938,
            1.17658286,
        ];
        let empty: Array1 = vec![];
        assert_abs_diff_eq!(
            sample_variance(&arr).unwrap(),
            1.492596054209826,
            epsilon = 1e-6
        );
        assert_abs_diff_eq!(mean(&arr).unwrap(), 0.07610557018217139, epsilon = 1e-6);

        assert!(sample_variance(&empty).is_err());
        assert!(mean(&empty).is_err());
    }

    #[test]
    fn test_split_empty_chains() {
        // Make sure the we Err on empty or minimum 0 length chains
        let chains = vec![vec![1.0], vec![], vec![]];
        assert!(split_chains(&chains).is_err());

        let chains: Array2 = vec![vec![], vec![]];
        assert!(split_chains(&chains).is_err());
        assert!(split_chains(&Vec::new()).is_err());
    }

    #[test]
    fn test_split_even_chains() {
        let chains = vec![vec![1.0, 2.0, 3.0, 4.0], vec![5.0, 6.0, 7.0, 8.0]];
        let split = split_chains(&chains).unwrap();
        assert_eq!(split[0], vec![1.0, 2.0]);
        assert_eq!(split[1], vec![3.0, 4.0]);
        assert_eq!(split[2], vec![5.0, 6.0]);
        assert_eq!(split[3], vec![7.0, 8.0]);
    }

    #[test]
    fn test_split_odd_chains() {
        // Make sure the middle value gets dropped per the Stan reference implementation
        let chains = vec![vec![1.0, 2.0, 3.0, 4.0, 4.5], vec![5.0, 6.0, 7.0, 8.0, 8.5]];
        let split = split_chains(&chains).unwrap();
        assert_eq!(split[0], vec![1.0, 2.0]);
        assert_eq!(split[1], vec![4.0, 4.5]);
        assert_eq!(split[2], vec![5.0, 6.0]);
        assert_eq!(split[3], vec![8.0, 8.5]);
    }

    #[test]
    fn test_validate_chains() {
        let ok = vec![vec![1.0, 2.0, 3.0, 4.0], vec![2.0, 3.0, 4.0, 5.0]];
        assert_eq!(validate_chains(&ok, 4).unwrap(), 4);

        let ragged = vec![vec![1.0, 2.0, 3.0, 4.0], vec![2.0, 3.0, 4.0]];
        assert!(matches!(
            validate_chains(&ragged, 1),
            Err(Error::InputShape(_))
        ));

        let short = vec![vec![1.0, 2.0, 3.0]];
        assert!(matches!(
            validate_chains(&short, 4),
            Err(Error::InsufficientDraws {
                required: 4,
                actual: 3
            })
        ));

        let nan = vec![vec![1.0, 2.0], vec![3.0, f64::NAN]];
        assert!(matches!(
            validate_chains(&nan, 1),
            Err(Error::NonFinite {
                outer: 1,
                inner: 1,
                ..
            })
        ));
        assert!(matches!(
            validate_chains(&Vec::new(), 1),
            Err(Error::InputShape(_))
        ));
    }

    #[test]
    fn test_quantiles() {
        let sorted = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_abs_diff_eq!(quantile_sorted(&sorted, 0.0).unwrap(), 1.0);
        assert_abs_diff_eq!(quantile_sorted(&sorted, 1.0).unwrap(), 5.0);
        assert_abs_diff_eq!(quantile_sorted(&sorted, 0.5).unwrap(), 3.0);
        assert_abs_diff_eq!(quantile_sorted(&sorted, 0.1).unwrap(), 1.4, epsilon = 1e-12);
        assert!(quantile_sorted(&sorted, 1.5).is_err());
        assert_abs_diff_eq!(
            median_abs_deviation(&[1.0, 1.0, 2.0, 2.0, 4.0, 6.0, 9.0]).unwrap(),
            1.0
        );
    }

    #[test]
    fn test_logsumexp() {
        let x = vec![1000.0, 1000.0];
        assert_abs_diff_eq!(logsumexp(&x), 1000.0 + 2f64.ln(), epsilon = 1e-10);
        assert_eq!(logsumexp(&[]), f64::NEG_INFINITY);
    }
}
