//! Bootstrap random forest regressor
//!
//! Every tree sees a bootstrap sample of the training rows and all features.
//! Per-tree seeds are drawn up front from `random_state`, so the fitted
//! forest does not depend on how rayon schedules the trees.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::tree::{RegressionTree, TreeParams};
use super::{param_usize, Regressor};
use crate::search_space::ParamSet;
use crate::storage::Split;
use crate::{Error, Result};

/// Hyperparameters of [`RandomForest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForestParams {
    /// Number of trees.
    pub n_estimators: usize,
    /// Maximum tree depth.
    pub max_depth: usize,
    /// Minimum rows to split a node.
    pub min_samples_split: usize,
    /// Minimum rows per leaf.
    pub min_samples_leaf: usize,
    /// Seed of the bootstrap samples.
    pub random_state: u64,
}

impl ForestParams {
    /// Read the parameters out of a restored parameter set.
    ///
    /// # Errors
    /// Returns [`Error::InvalidParam`] for missing or mistyped values.
    pub fn from_params(params: &ParamSet) -> Result<Self> {
        let n_estimators = param_usize(params, "n_estimators")?;
        if n_estimators == 0 {
            return Err(Error::InvalidParam {
                name: "n_estimators".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(Self {
            n_estimators,
            max_depth: param_usize(params, "max_depth")?,
            min_samples_split: param_usize(params, "min_samples_split")?,
            min_samples_leaf: param_usize(params, "min_samples_leaf")?,
            random_state: param_usize(params, "random_state")? as u64,
        })
    }

    const fn tree_params(&self) -> TreeParams {
        TreeParams {
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            min_samples_leaf: self.min_samples_leaf,
            min_child_weight: 0.0,
            lambda: 0.0,
            alpha: 0.0,
        }
    }
}

/// Fitted forest; predictions average the trees.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
}

impl RandomForest {
    /// Fit `params.n_estimators` trees on bootstrap samples of `train`.
    ///
    /// # Errors
    /// Returns [`Error::Training`] if `train` is empty.
    pub fn fit(params: &ForestParams, train: &Split) -> Result<Self> {
        let n = train.len();
        if n == 0 {
            return Err(Error::Training("training split is empty".to_string()));
        }

        let mut seeder = StdRng::seed_from_u64(params.random_state);
        let seeds: Vec<u64> = (0..params.n_estimators).map(|_| seeder.gen()).collect();
        let tree_params = params.tree_params();

        let trees = seeds
            .into_par_iter()
            .map(|seed| {
                let mut rng = StdRng::seed_from_u64(seed);
                let rows: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                RegressionTree::fit_targets(&train.features, &train.target, &rows, &tree_params)
            })
            .collect();

        Ok(Self { trees })
    }

    /// Number of trees.
    #[must_use]
    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }
}

impl Regressor for RandomForest {
    #[allow(clippy::cast_precision_loss)]
    fn predict_row(&self, row: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / self.trees.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::rmse;
    use crate::storage::FeatureMatrix;

    fn split(n: u32) -> Split {
        let rows: Vec<Vec<f64>> = (0..n).map(|i| vec![f64::from(i), f64::from(i % 3)]).collect();
        Split {
            features: FeatureMatrix::from_rows(vec!["a".into(), "b".into()], &rows).unwrap(),
            target: (0..n).map(|i| 2.0 * f64::from(i) + f64::from(i % 3)).collect(),
        }
    }

    fn params(random_state: u64) -> ForestParams {
        ForestParams {
            n_estimators: 20,
            max_depth: 8,
            min_samples_split: 2,
            min_samples_leaf: 1,
            random_state,
        }
    }

    #[test]
    fn test_forest_fits_linear_trend() {
        let data = split(100);
        let forest = RandomForest::fit(&params(42), &data).unwrap();
        assert_eq!(forest.num_trees(), 20);

        let pred = forest.predict(&data.features);
        assert!(rmse(&data.target, &pred) < 5.0);
    }

    #[test]
    fn test_same_seed_same_forest() {
        let data = split(50);
        let a = RandomForest::fit(&params(42), &data).unwrap();
        let b = RandomForest::fit(&params(42), &data).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_zero_estimators_rejected() {
        use crate::search_space::ParamValue;

        let set: ParamSet = [
            ("n_estimators", 0),
            ("max_depth", 3),
            ("min_samples_split", 2),
            ("min_samples_leaf", 1),
            ("random_state", 42),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), ParamValue::Int(v)))
        .collect();
        assert!(ForestParams::from_params(&set).is_err());
    }
}
