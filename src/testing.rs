//! Seeded synthetic chains shared by the unit tests.
use crate::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

/// Independent Uniform(0, 1) draws.
pub fn uniform_chains(num_chains: usize, num_draws: usize, seed: u64) -> Array2 {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..num_chains)
        .map(|_| (0..num_draws).map(|_| rng.random::<f64>()).collect())
        .collect()
}

/// Independent Bernoulli(p) draws coded as 0 and 1.
pub fn bernoulli_chains(num_chains: usize, num_draws: usize, p: f64, seed: u64) -> Array2 {
    uniform_chains(num_chains, num_draws, seed)
        .into_iter()
        .map(|chain| chain.into_iter().map(|u| f64::from(u8::from(u < p))).collect())
        .collect()
}

/// Independent standard normal draws.
pub fn normal_chains(num_chains: usize, num_draws: usize, seed: u64) -> Array2 {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..num_chains)
        .map(|_| {
            (0..num_draws)
                .map(|_| rng.sample::<f64, _>(StandardNormal))
                .collect()
        })
        .collect()
}

/// Stationary AR(1) chains with unit marginal variance.
pub fn ar1_chains(num_chains: usize, num_draws: usize, phi: f64, seed: u64) -> Array2 {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let innovation_sd = (1.0 - phi * phi).sqrt();
    (0..num_chains)
        .map(|_| {
            let mut x: f64 = rng.sample(StandardNormal);
            (0..num_draws)
                .map(|_| {
                    let e: f64 = rng.sample(StandardNormal);
                    x = phi * x + innovation_sd * e;
                    x
                })
                .collect()
        })
        .collect()
}

/// `linspace(0, 1, 1000)` reshaped into two chains: perfectly ordered draws
/// with no overlap between chains.
pub fn bad_chains() -> Array2 {
    let all: Vec<f64> = (0..1000).map(|i| i as f64 / 999.0).collect();
    all.chunks(500).map(|c| c.to_vec()).collect()
}
