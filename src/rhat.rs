use crate::error::{Error, Result};
use crate::transform::{fold, z_scale};
use crate::utils::{mean, sample_variance, split_chains, validate_chains};
use crate::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Variant of the potential scale reduction factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RhatMethod {
    /// Maximum of the rank-normalized split Rhat and the rank-normalized
    /// split Rhat of the draws folded about the median.
    #[default]
    Rank,
    Split,
    Folded,
    /// Rank-normalized split Rhat.
    ZScale,
    /// Classic Rhat without splitting; needs at least two chains.
    Identity,
}

/// Computes the potential scale reduction (Rhat) for the specified
/// parameter across all kept samples.  All chains must have the same
/// length and there must be at least two of them.
///
/// See more details in Stan reference manual section
/// ["Potential Scale Reduction"](https://mc-stan.org/docs/2_24/reference-manual/notation-for-samples-chains-and-draws.html#potential-scale-reduction).
///
/// Based on reference implementation in Stan v2.24.0 at
/// [https://github.com/stan-dev/stan/blob/v2.24.0/src/stan/analyze/mcmc/compute_potential_scale_reduction.hpp]()
pub fn potential_scale_reduction_factor(chains: &Array2) -> Result<f64> {
    let n = validate_chains(chains, 2)?;
    if chains.len() < 2 {
        return Err(Error::InputShape(format!(
            "Rhat needs at least 2 chains, got {}",
            chains.len()
        )));
    }
    let mut chain_mean: Array1 = Vec::with_capacity(chains.len());
    let mut chain_var: Array1 = Vec::with_capacity(chains.len());

    for chain in chains.iter() {
        chain_mean.push(mean(chain)?);
        chain_var.push(sample_variance(chain)?);
    }

    let n = n as f64;
    let var_between = n * sample_variance(&chain_mean)?;
    let var_within = mean(&chain_var)?;
    if var_within <= 0.0 {
        return Err(Error::DegenerateInput(
            "within-chain variance is zero".into(),
        ));
    }
    let result = ((var_between / var_within + n - 1.0) / n).sqrt();

    Ok(result)
}

/// Computes the split potential scale reduction (Rhat) for the
/// specified parameter across all kept samples.  When the number of
/// total draws N is odd, the (N+1)/2th draw is ignored.
///
/// See more details in Stan reference manual section
/// ["Potential Scale Reduction"](https://mc-stan.org/docs/2_24/reference-manual/notation-for-samples-chains-and-draws.html#potential-scale-reduction)
///
/// Based on reference implementation in Stan v2.24.0 at
/// [https://github.com/stan-dev/stan/blob/v2.24.0/src/stan/analyze/mcmc/compute_potential_scale_reduction.hpp]()
pub fn split_potential_scale_reduction_factor(chains: &Array2) -> Result<f64> {
    validate_chains(chains, 4)?;
    potential_scale_reduction_factor(&split_chains(chains)?)
}

/// Rhat using the selected variant.
pub fn rhat(chains: &Array2, method: RhatMethod) -> Result<f64> {
    validate_chains(chains, 4)?;
    match method {
        RhatMethod::Rank => {
            let split = split_chains(chains)?;
            let bulk = potential_scale_reduction_factor(&z_scale(&split)?);
            let tail = potential_scale_reduction_factor(&z_scale(&fold(&split)?)?);
            // a symmetric two-valued parameter folds to a constant
            match (bulk, tail) {
                (Ok(b), Ok(t)) => Ok(b.max(t)),
                (Ok(r), Err(Error::DegenerateInput(_)))
                | (Err(Error::DegenerateInput(_)), Ok(r)) => Ok(r),
                (Err(e), _) | (_, Err(e)) => Err(e),
            }
        }
        RhatMethod::Split => split_potential_scale_reduction_factor(chains),
        RhatMethod::Folded => {
            let split = split_chains(chains)?;
            potential_scale_reduction_factor(&z_scale(&fold(&split)?)?)
        }
        RhatMethod::ZScale => {
            potential_scale_reduction_factor(&z_scale(&split_chains(chains)?)?)
        }
        RhatMethod::Identity => potential_scale_reduction_factor(chains),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{bad_chains, normal_chains, uniform_chains};

    #[test]
    fn test_known_value() {
        // means 1.5 and 3.5, within variances 0.5 and 0.5
        let chains = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        // B = 2 * var([1.5, 3.5]) = 4, W = 0.5, Rhat = sqrt((4/0.5 + 1) / 2)
        assert_abs_diff_eq!(
            potential_scale_reduction_factor(&chains).unwrap(),
            4.5f64.sqrt(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_split_matches_manual_split() {
        let chains = vec![vec![1.0, 2.0, 3.0, 4.0, 4.5], vec![5.0, 6.0, 7.0, 8.0, 8.5]];
        let manual = vec![
            vec![1.0, 2.0],
            vec![4.0, 4.5],
            vec![5.0, 6.0],
            vec![8.0, 8.5],
        ];
        assert_abs_diff_eq!(
            split_potential_scale_reduction_factor(&chains).unwrap(),
            potential_scale_reduction_factor(&manual).unwrap()
        );
    }

    #[test]
    fn test_iid_chains_converge_to_one() {
        let chains = uniform_chains(4, 5000, 21);
        for method in [
            RhatMethod::Rank,
            RhatMethod::Split,
            RhatMethod::Folded,
            RhatMethod::ZScale,
            RhatMethod::Identity,
        ] {
            let r = rhat(&chains, method).unwrap();
            assert!(r < 1.01, "{:?}: {}", method, r);
        }
    }

    #[test]
    fn test_disjoint_chains_do_not_mix() {
        let chains = bad_chains();
        for method in [RhatMethod::Rank, RhatMethod::Split, RhatMethod::Identity] {
            let r = rhat(&chains, method).unwrap();
            assert!(r > 1.5, "{:?}: {}", method, r);
        }
    }

    #[test]
    fn test_shifted_chain_is_flagged() {
        let mut chains = normal_chains(4, 1000, 2);
        for x in chains[3].iter_mut() {
            *x += 2.0;
        }
        assert!(rhat(&chains, RhatMethod::Rank).unwrap() > 1.1);
    }

    #[test]
    fn test_degenerate_within_variance() {
        let chains = vec![vec![1.0; 8], vec![2.0; 8]];
        assert!(matches!(
            rhat(&chains, RhatMethod::Split),
            Err(Error::DegenerateInput(_))
        ));
        assert!(matches!(
            rhat(&chains, RhatMethod::Rank),
            Err(Error::DegenerateInput(_))
        ));
    }

    #[test]
    fn test_rank_rhat_of_alternating_chains() {
        // folding about the median 1.5 leaves every draw at 0.5
        let chains: Array2 = vec![(0..20).map(|i| (1 + i % 2) as f64).collect(); 2];
        let bulk = rhat(&chains, RhatMethod::ZScale).unwrap();
        assert!(matches!(
            rhat(&chains, RhatMethod::Folded),
            Err(Error::DegenerateInput(_))
        ));
        assert_eq!(rhat(&chains, RhatMethod::Rank).unwrap(), bulk);
    }

    #[test]
    fn test_shape_errors() {
        let single = vec![vec![1.0, 2.0, 3.0, 4.0]];
        assert!(matches!(
            rhat(&single, RhatMethod::Identity),
            Err(Error::InputShape(_))
        ));
        // one chain is fine once it is split
        assert!(rhat(&single, RhatMethod::Split).is_ok());

        let ragged = vec![vec![1.0, 2.0, 3.0, 4.0], vec![1.0, 2.0, 3.0]];
        assert!(matches!(
            rhat(&ragged, RhatMethod::Rank),
            Err(Error::InputShape(_))
        ));
        assert!(rhat(&Vec::new(), RhatMethod::Rank).is_err());
    }
}
