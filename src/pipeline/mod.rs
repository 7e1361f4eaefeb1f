//! The two workflow stages.
//!
//! ```text
//! train:  splits ──> random search ──> runs in the search experiment (metric `rmse`)
//! select: top N search runs ──> re-train ──> runs in the select experiment
//!         (metrics `validation_rmse`, `test_rmse`) ──> best run by `test_rmse`
//! ```
//!
//! Promotion of the selected run lives in [`crate::registry`].

mod hpo;
mod select;

pub use hpo::{run_search, SearchConfig, Trial, DEFAULT_MAX_EVALS, SEARCH_SEED};
pub use select::{
    select_model, Evaluation, SelectionConfig, EVALUATION_ORDER, SEARCH_METRIC, SEARCH_ORDER,
    VALIDATION_METRIC,
};
