//! Gradient-boosted regression trees (squared error)
//!
//! Rounds stop early once the validation RMSE has not improved for
//! [`EARLY_STOPPING_ROUNDS`] rounds; the fitted model keeps only the trees up
//! to the best round.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::tree::{RegressionTree, TreeParams};
use super::{param_f64, param_usize, rmse, Regressor};
use crate::search_space::ParamSet;
use crate::storage::{FeatureMatrix, Split};
use crate::{Error, Result};

/// Upper bound on boosting rounds.
pub const NUM_BOOST_ROUND: usize = 100;

/// Rounds without validation improvement before stopping.
pub const EARLY_STOPPING_ROUNDS: usize = 10;

/// Hyperparameters of [`BoostedTrees`].
#[derive(Debug, Clone, PartialEq)]
pub struct BoostingParams {
    /// Maximum tree depth.
    pub max_depth: usize,
    /// Shrinkage applied to every tree.
    pub learning_rate: f64,
    /// L1 regularization on leaf weights.
    pub reg_alpha: f64,
    /// L2 regularization on leaf weights.
    pub reg_lambda: f64,
    /// Minimum hessian sum per child.
    pub min_child_weight: f64,
}

impl BoostingParams {
    /// Read the parameters out of a restored parameter set.
    ///
    /// # Errors
    /// Returns [`Error::InvalidParam`] for missing or mistyped values.
    pub fn from_params(params: &ParamSet) -> Result<Self> {
        if let Some(objective) = params.get("objective") {
            if objective.as_text() != Some("reg:squarederror") {
                return Err(Error::InvalidParam {
                    name: "objective".to_string(),
                    reason: format!("unsupported objective {objective}"),
                });
            }
        }
        let learning_rate = param_f64(params, "learning_rate")?;
        if learning_rate <= 0.0 {
            return Err(Error::InvalidParam {
                name: "learning_rate".to_string(),
                reason: format!("{learning_rate} is not positive"),
            });
        }
        Ok(Self {
            max_depth: param_usize(params, "max_depth")?,
            learning_rate,
            reg_alpha: param_f64(params, "reg_alpha")?,
            reg_lambda: param_f64(params, "reg_lambda")?,
            min_child_weight: param_f64(params, "min_child_weight")?,
        })
    }

    const fn tree_params(&self) -> TreeParams {
        TreeParams {
            max_depth: self.max_depth,
            min_samples_split: 2,
            min_samples_leaf: 1,
            min_child_weight: self.min_child_weight,
            lambda: self.reg_lambda,
            alpha: self.reg_alpha,
        }
    }
}

/// Fitted boosted ensemble.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoostedTrees {
    base_score: f64,
    learning_rate: f64,
    best_iteration: usize,
    best_score: f64,
    trees: Vec<RegressionTree>,
}

impl BoostedTrees {
    /// Fit on `train`, early-stopping on `validation`.
    ///
    /// # Errors
    /// Returns [`Error::Training`] if either split is empty.
    #[allow(clippy::cast_precision_loss)]
    pub fn fit(params: &BoostingParams, train: &Split, validation: &Split) -> Result<Self> {
        if train.is_empty() || validation.is_empty() {
            return Err(Error::Training(
                "boosting needs non-empty training and validation splits".to_string(),
            ));
        }

        let base_score = train.target.iter().sum::<f64>() / train.len() as f64;
        let tree_params = params.tree_params();
        let rows: Vec<usize> = (0..train.len()).collect();
        let hess = vec![1.0; train.len()];

        let mut train_pred = vec![base_score; train.len()];
        let mut valid_pred = vec![base_score; validation.len()];
        let mut trees = Vec::with_capacity(NUM_BOOST_ROUND);
        let mut best_iteration = 0;
        let mut best_score = f64::INFINITY;

        for round in 0..NUM_BOOST_ROUND {
            let grad: Vec<f64> = train_pred
                .iter()
                .zip(&train.target)
                .map(|(p, y)| p - y)
                .collect();
            let tree = RegressionTree::fit(&train.features, &grad, &hess, &rows, &tree_params);

            add_tree(&mut train_pred, &train.features, &tree, params.learning_rate);
            add_tree(&mut valid_pred, &validation.features, &tree, params.learning_rate);
            trees.push(tree);

            let score = rmse(&validation.target, &valid_pred);
            if score < best_score {
                best_score = score;
                best_iteration = round;
            } else if round - best_iteration >= EARLY_STOPPING_ROUNDS {
                debug!(round, best_iteration, best_score, "Early stopping");
                break;
            }
        }

        trees.truncate(best_iteration + 1);
        Ok(Self {
            base_score,
            learning_rate: params.learning_rate,
            best_iteration,
            best_score,
            trees,
        })
    }

    /// Round whose trees the model keeps (zero-based).
    #[must_use]
    pub const fn best_iteration(&self) -> usize {
        self.best_iteration
    }

    /// Validation RMSE at the best round.
    #[must_use]
    pub const fn best_score(&self) -> f64 {
        self.best_score
    }

    /// Number of trees kept.
    #[must_use]
    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }
}

fn add_tree(pred: &mut [f64], x: &FeatureMatrix, tree: &RegressionTree, eta: f64) {
    for (i, p) in pred.iter_mut().enumerate() {
        *p += eta * tree.predict_row(x.row(i));
    }
}

impl Regressor for BoostedTrees {
    fn predict_row(&self, row: &[f64]) -> f64 {
        self.base_score
            + self.learning_rate * self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(xs: &[f64], f: impl Fn(f64) -> f64) -> Split {
        let rows: Vec<Vec<f64>> = xs.iter().map(|&x| vec![x]).collect();
        Split {
            features: FeatureMatrix::from_rows(vec!["x".to_string()], &rows).unwrap(),
            target: xs.iter().map(|&x| f(x)).collect(),
        }
    }

    fn params(learning_rate: f64) -> BoostingParams {
        BoostingParams {
            max_depth: 3,
            learning_rate,
            reg_alpha: 0.0,
            reg_lambda: 1.0,
            min_child_weight: 1.0,
        }
    }

    #[test]
    #[allow(clippy::cast_precision_loss)]
    fn test_boosting_beats_the_mean() {
        let xs: Vec<f64> = (0..60).map(|i| i as f64 / 2.0).collect();
        let train = split(&xs, |x| if x < 15.0 { 2.0 } else { 8.0 });
        let valid = split(&xs, |x| if x < 15.0 { 2.0 } else { 8.0 });

        let model = BoostedTrees::fit(&params(0.3), &train, &valid).unwrap();
        let pred = model.predict(&valid.features);

        assert!(rmse(&valid.target, &pred) < 0.5);
        assert!(model.num_trees() <= NUM_BOOST_ROUND);
        assert_eq!(model.num_trees(), model.best_iteration() + 1);
    }

    #[test]
    #[allow(clippy::cast_precision_loss)]
    fn test_early_stopping_keeps_best_round() {
        // Validation disagrees with train: later rounds only hurt it.
        let xs: Vec<f64> = (0..40).map(f64::from).collect();
        let train = split(&xs, |x| x);
        let valid = split(&xs, |x| -x);

        let model = BoostedTrees::fit(&params(0.5), &train, &valid).unwrap();
        assert_eq!(model.best_iteration(), 0);
        assert_eq!(model.num_trees(), 1);
        let pred = model.predict(&valid.features);
        assert!((rmse(&valid.target, &pred) - model.best_score()).abs() < 1e-9);
    }

    #[test]
    fn test_objective_must_be_squared_error() {
        use crate::search_space::ParamValue;

        let mut set = ParamSet::new();
        set.insert("objective".into(), ParamValue::Text("reg:pseudohubererror".into()));
        set.insert("max_depth".into(), ParamValue::Int(4));
        set.insert("learning_rate".into(), ParamValue::Float(0.1));
        set.insert("reg_alpha".into(), ParamValue::Float(0.1));
        set.insert("reg_lambda".into(), ParamValue::Float(0.1));
        set.insert("min_child_weight".into(), ParamValue::Float(1.0));
        assert!(BoostingParams::from_params(&set).is_err());
    }

    #[test]
    fn test_empty_train_split_fails() {
        let empty = split(&[], |x| x);
        let valid = split(&[1.0], |x| x);
        assert!(matches!(
            BoostedTrees::fit(&params(0.1), &empty, &valid),
            Err(Error::Training(_))
        ));
    }
}
