//! Model families and their training routines
//!
//! A run's `model` tag names its family. The family owns the search space
//! its params were sampled from and the learner that fits them:
//!
//! | tag | learner |
//! |---|---|
//! | `xgboost-regressor` | [`BoostedTrees`] |
//! | `random-forest-regressor` | [`RandomForest`] |

mod boosting;
mod forest;
pub mod tree;

pub use boosting::{BoostedTrees, BoostingParams, EARLY_STOPPING_ROUNDS, NUM_BOOST_ROUND};
pub use forest::{ForestParams, RandomForest};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::search_space::{ParamDomain, ParamSet, ParamValue, SearchSpace};
use crate::storage::{FeatureMatrix, Split};
use crate::{Error, Result};

/// Run tag carrying the model family.
pub const MODEL_TAG: &str = "model";

/// Artifact path of a serialized [`TrainedModel`].
pub const MODEL_ARTIFACT: &str = "model/model.json";

/// Candidate model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFamily {
    /// Gradient-boosted trees
    XgBoost,
    /// Bootstrap random forest
    RandomForest,
}

impl ModelFamily {
    /// Every family, in the order the training stage searches them.
    pub const ALL: [Self; 2] = [Self::XgBoost, Self::RandomForest];

    /// Value of the `model` tag.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::XgBoost => "xgboost-regressor",
            Self::RandomForest => "random-forest-regressor",
        }
    }

    /// The family's search space.
    #[must_use]
    pub fn search_space(self) -> SearchSpace {
        let log = |low, high| ParamDomain::LogUniform { low, high };
        let int = |low, high| ParamDomain::QUniformInt { low, high, q: 1 };

        match self {
            Self::XgBoost => SearchSpace::new()
                .add("max_depth", int(4, 100))
                .add("learning_rate", log(-3.0, 0.0))
                .add("reg_alpha", log(-5.0, -1.0))
                .add("reg_lambda", log(-6.0, -1.0))
                .add("min_child_weight", log(-1.0, 3.0))
                .add(
                    "objective",
                    ParamDomain::Fixed(ParamValue::Text("reg:squarederror".to_string())),
                )
                .add("seed", ParamDomain::Fixed(ParamValue::Int(42))),
            Self::RandomForest => SearchSpace::new()
                .add("max_depth", int(1, 20))
                .add("n_estimators", int(10, 50))
                .add("min_samples_split", int(2, 10))
                .add("min_samples_leaf", int(1, 4))
                .add("random_state", ParamDomain::Fixed(ParamValue::Int(42))),
        }
    }

    /// Fit the family's learner with `params` on `train`.
    ///
    /// Boosting early-stops on `validation`; the forest ignores it.
    ///
    /// # Errors
    /// Returns [`Error::InvalidParam`] for unusable params and
    /// [`Error::Training`] if fitting fails.
    pub fn fit(self, params: &ParamSet, train: &Split, validation: &Split) -> Result<TrainedModel> {
        match self {
            Self::XgBoost => {
                let params = BoostingParams::from_params(params)?;
                BoostedTrees::fit(&params, train, validation).map(TrainedModel::XgBoost)
            }
            Self::RandomForest => {
                let params = ForestParams::from_params(params)?;
                RandomForest::fit(&params, train).map(TrainedModel::RandomForest)
            }
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ModelFamily {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|family| family.tag() == s)
            .ok_or_else(|| Error::UnknownModelFamily(s.to_string()))
    }
}

/// A fitted regression model.
pub trait Regressor {
    /// Predict one row.
    fn predict_row(&self, row: &[f64]) -> f64;

    /// Predict every row of `x`.
    fn predict(&self, x: &FeatureMatrix) -> Vec<f64> {
        (0..x.n_rows()).map(|i| self.predict_row(x.row(i))).collect()
    }
}

/// Any fitted model, as stored in the `model/model.json` artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "family")]
pub enum TrainedModel {
    /// `xgboost-regressor`
    #[serde(rename = "xgboost-regressor")]
    XgBoost(BoostedTrees),
    /// `random-forest-regressor`
    #[serde(rename = "random-forest-regressor")]
    RandomForest(RandomForest),
}

impl TrainedModel {
    /// Family that produced the model.
    #[must_use]
    pub const fn family(&self) -> ModelFamily {
        match self {
            Self::XgBoost(_) => ModelFamily::XgBoost,
            Self::RandomForest(_) => ModelFamily::RandomForest,
        }
    }

    /// Serialize for the model artifact.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize a model artifact.
    ///
    /// # Errors
    /// Returns error if `bytes` is not a serialized model.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl Regressor for TrainedModel {
    fn predict_row(&self, row: &[f64]) -> f64 {
        match self {
            Self::XgBoost(model) => model.predict_row(row),
            Self::RandomForest(model) => model.predict_row(row),
        }
    }
}

/// Root mean squared error. `NaN` for empty input.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rmse(actual: &[f64], predicted: &[f64]) -> f64 {
    let n = actual.len().min(predicted.len());
    if n == 0 {
        return f64::NAN;
    }
    let sse: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p) * (a - p))
        .sum();
    (sse / n as f64).sqrt()
}

fn param<'a>(params: &'a ParamSet, name: &str) -> Result<&'a ParamValue> {
    params.get(name).ok_or_else(|| Error::InvalidParam {
        name: name.to_string(),
        reason: "missing".to_string(),
    })
}

fn param_f64(params: &ParamSet, name: &str) -> Result<f64> {
    param(params, name)?
        .as_f64()
        .ok_or_else(|| Error::InvalidParam {
            name: name.to_string(),
            reason: "expected a number".to_string(),
        })
}

fn param_usize(params: &ParamSet, name: &str) -> Result<usize> {
    let value = param(params, name)?;
    value
        .as_int()
        .and_then(|v| usize::try_from(v).ok())
        .ok_or_else(|| Error::InvalidParam {
            name: name.to_string(),
            reason: format!("expected a non-negative integer, got {value}"),
        })
}
