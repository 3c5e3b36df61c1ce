//! Model comparison and averaging weights.
use crate::elpd::{difference_se, Criterion, ElpdData, Scale};
use crate::error::{Error, Result};
use crate::stacking::{softmax, stacking_weights, StackingOptions};
use crate::Array2;
use average::{Estimate, Variance};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Gamma};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Model weights keyed by model name.
pub type ModelWeights = BTreeMap<String, f64>;

/// Information criterion estimates of a set of models, keyed by a unique
/// model name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelCriterionSet {
    models: BTreeMap<String, ElpdData>,
}

impl ModelCriterionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a model; names must be unique.
    pub fn insert(&mut self, name: impl Into<String>, data: ElpdData) -> Result<()> {
        let name = name.into();
        if self.models.contains_key(&name) {
            return Err(Error::InputShape(format!("duplicate model name {:?}", name)));
        }
        self.models.insert(name, data);
        Ok(())
    }

    pub fn from_models<I, S>(models: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, ElpdData)>,
        S: Into<String>,
    {
        let mut set = Self::new();
        for (name, data) in models {
            set.insert(name, data)?;
        }
        Ok(set)
    }

    pub fn get(&self, name: &str) -> Option<&ElpdData> {
        self.models.get(name)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Models in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ElpdData)> {
        self.models.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Checks the set is non-empty and every model uses the same criterion
    /// and scale.  Returns that scale.
    fn common_scale(&self) -> Result<(Criterion, Scale)> {
        let (_, first) = self
            .iter()
            .next()
            .ok_or_else(|| Error::InputShape("no models to compare".into()))?;
        for (name, data) in self.iter() {
            if data.scale != first.scale || data.criterion != first.criterion {
                return Err(Error::InputShape(format!(
                    "model {:?} uses {:?} on {:?} scale, expected {:?} on {:?} scale",
                    name, data.criterion, data.scale, first.criterion, first.scale
                )));
            }
        }
        Ok((first.criterion, first.scale))
    }

    /// Observations × models table of pointwise elpd on the log scale, in
    /// name order.
    fn pointwise_table(&self) -> Result<Array2> {
        let columns: Vec<Vec<f64>> = self.iter().map(|(_, d)| d.pointwise_elpd()).collect();
        let n = columns[0].len();
        for (name, data) in self.iter() {
            if data.pointwise.is_empty() || data.pointwise.len() != n {
                return Err(Error::InputShape(format!(
                    "model {:?} has {} pointwise values, expected {} (and at least one)",
                    name,
                    data.pointwise.len(),
                    n
                )));
            }
        }
        Ok(crate::utils::transpose(&columns))
    }

    fn names(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }
}

/// How model weights are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum WeightMethod {
    /// Optimal mixture of the leave-one-out predictive distributions.
    #[default]
    Stacking,
    /// Akaike-like weights with Bayesian bootstrap over observations.
    BbPseudoBma,
    /// Akaike-like weights `exp(-dIC / 2)` on the deviance scale.
    PseudoBma,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareOptions {
    pub method: WeightMethod,
    /// Bootstrap replicates for [`WeightMethod::BbPseudoBma`].
    pub b_samples: usize,
    /// Dirichlet concentration of the bootstrap observation weights.
    pub alpha: f64,
    pub seed: u64,
    pub stacking: StackingOptions,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            method: WeightMethod::Stacking,
            b_samples: 1000,
            alpha: 1.0,
            seed: 10,
            stacking: StackingOptions::default(),
        }
    }
}

/// Pseudo Bayesian model averaging: `w_i ∝ exp(-(IC_i - IC_best) / 2)` on
/// the deviance scale, i.e. `exp(elpd_i - elpd_best)`.
pub fn pseudo_bma_weights(set: &ModelCriterionSet) -> Result<ModelWeights> {
    set.common_scale()?;
    let elpd: Vec<f64> = set.iter().map(|(_, d)| d.elpd()).collect();
    Ok(set.names().into_iter().zip(softmax(&elpd)).collect())
}

/// Pseudo-BMA weights averaged over Bayesian bootstrap replicates of the
/// observations, together with the bootstrap standard deviation of each
/// model's criterion (on the set's scale).
pub fn bb_pseudo_bma_weights(
    set: &ModelCriterionSet,
    b_samples: usize,
    alpha: f64,
    seed: u64,
) -> Result<(ModelWeights, BTreeMap<String, f64>)> {
    let (_, scale) = set.common_scale()?;
    if b_samples == 0 {
        return Err(Error::InputShape("need at least one bootstrap replicate".into()));
    }
    let table = set.pointwise_table()?;
    let rows = table.len();
    let gamma = Gamma::new(alpha, 1.0)
        .map_err(|e| Error::InputShape(format!("invalid Dirichlet concentration: {}", e)))?;
    debug!(b_samples, alpha, seed, rows, "bayesian bootstrap");

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let cols = set.len();
    let mut weights = vec![0.0; cols];
    let mut z_spread = vec![Variance::new(); cols];
    let mut draws = vec![0.0; rows];
    for _ in 0..b_samples {
        for d in draws.iter_mut() {
            *d = gamma.sample(&mut rng);
        }
        let total: f64 = draws.iter().sum();
        let mut z = vec![0.0; cols];
        for (row, d) in table.iter().zip(&draws) {
            let a = rows as f64 * d / total;
            for (zk, v) in z.iter_mut().zip(row) {
                *zk += a * v;
            }
        }
        for (w, u) in weights.iter_mut().zip(softmax(&z)) {
            *w += u / b_samples as f64;
        }
        for (spread, zk) in z_spread.iter_mut().zip(&z) {
            spread.add(*zk);
        }
    }

    let factor = scale.factor().abs();
    let names = set.names();
    let ses = names
        .iter()
        .cloned()
        .zip(z_spread.iter().map(|s| factor * s.population_variance().sqrt()))
        .collect();
    Ok((names.into_iter().zip(weights).collect(), ses))
}

/// Stacking weights of the models' pointwise leave-one-out densities.
pub fn stacking_model_weights(
    set: &ModelCriterionSet,
    options: &StackingOptions,
) -> Result<ModelWeights> {
    set.common_scale()?;
    let table = set.pointwise_table()?;
    let weights = stacking_weights(&table, options)?;
    Ok(set.names().into_iter().zip(weights).collect())
}

/// One row of a comparison table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub name: String,
    /// 0 for the best model.
    pub rank: usize,
    /// Criterion value on `scale`.
    pub value: f64,
    /// Effective number of parameters.
    pub p: f64,
    /// Absolute difference from the best model's value.
    pub d_value: f64,
    pub weight: f64,
    pub se: f64,
    /// Standard error of the difference from the best model.
    pub dse: f64,
    pub warning: bool,
    pub scale: Scale,
}

/// Models ordered from best to worst.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub rows: Vec<ComparisonRow>,
    pub criterion: Criterion,
    pub method: WeightMethod,
    pub scale: Scale,
}

impl ComparisonResult {
    /// The top-ranked model; `None` for an empty table.
    pub fn best(&self) -> Option<&ComparisonRow> {
        self.rows.first()
    }

    pub fn get(&self, name: &str) -> Option<&ComparisonRow> {
        self.rows.iter().find(|r| r.name == name)
    }
}

/// Ranks the models of `set` and computes their weights.
///
/// Rows are sorted best first; lower values are better on the deviance and
/// negative-log scales and higher values on the log scale.  The best model
/// always has `d_value == 0` and `dse == 0`.  `dse` is computed from the
/// pointwise differences when both models carry them and from
/// `sqrt(se^2 + se_best^2)` otherwise.
pub fn compare(set: &ModelCriterionSet, options: &CompareOptions) -> Result<ComparisonResult> {
    let (criterion, scale) = set.common_scale()?;

    let (weights, bootstrap_se) = match options.method {
        WeightMethod::Stacking => (stacking_model_weights(set, &options.stacking)?, None),
        WeightMethod::PseudoBma => (pseudo_bma_weights(set)?, None),
        WeightMethod::BbPseudoBma => {
            let (w, se) =
                bb_pseudo_bma_weights(set, options.b_samples, options.alpha, options.seed)?;
            (w, Some(se))
        }
    };

    let mut ordered: Vec<(&str, &ElpdData)> = set.iter().collect();
    ordered.sort_by(|a, b| {
        if scale.higher_is_better() {
            b.1.value.total_cmp(&a.1.value)
        } else {
            a.1.value.total_cmp(&b.1.value)
        }
    });
    let (_, best) = ordered[0];

    let mut rows = Vec::with_capacity(ordered.len());
    for (rank, (name, data)) in ordered.iter().enumerate() {
        let (d_value, dse) = if rank == 0 {
            (0.0, 0.0)
        } else {
            let dse = if !data.pointwise.is_empty() && data.pointwise.len() == best.pointwise.len()
            {
                difference_se(best, data)?
            } else {
                (data.se.powi(2) + best.se.powi(2)).sqrt()
            };
            ((data.value - best.value).abs(), dse)
        };
        let se = bootstrap_se
            .as_ref()
            .and_then(|s| s.get(*name).copied())
            .unwrap_or(data.se);
        rows.push(ComparisonRow {
            name: name.to_string(),
            rank,
            value: data.value,
            p: data.p,
            d_value,
            weight: weights.get(*name).copied().unwrap_or(0.0),
            se,
            dse,
            warning: data.warning,
            scale,
        });
    }

    Ok(ComparisonResult {
        rows,
        criterion,
        method: options.method,
        scale,
    })
}
