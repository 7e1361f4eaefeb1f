//! # bus-delay-mlops: model selection and staged promotion
//!
//! Picks the best bus-delay regressor out of a hyperparameter search and
//! registers it in a model registry, but only when it beats the model
//! currently in `Production`.
//!
//! ## Workflow
//!
//! 1. [`pipeline::run_search`] tries seeded random parameter sets for every
//!    [`models::ModelFamily`] and logs each trial as a run.
//! 2. [`pipeline::select_model`] re-trains the best `N` trials, scores them on
//!    the validation and test splits, and returns the run with the lowest
//!    test RMSE.
//! 3. [`registry::register_model`] compares that run with the latest
//!    `Production` version and, on a strict improvement, registers a new
//!    version in `Staging`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use bus_delay_mlops::pipeline::{select_model, SelectionConfig};
//! use bus_delay_mlops::registry::register_model;
//! use bus_delay_mlops::tracking::Tracking;
//!
//! # async fn example() -> bus_delay_mlops::Result<()> {
//! let client = Tracking::from_uri("http://127.0.0.1:5000").await?;
//! let config = SelectionConfig {
//!     input_dir: "data/processed".into(),
//!     number_top_runs: 5,
//!     hpo_experiment: "nyc-bus-delay-predictor-hpo".to_string(),
//!     select_experiment: "nyc-bus-delay-predictor-select".to_string(),
//!     target_column: "target".to_string(),
//! };
//! let best = select_model(&client, &config).await?;
//! let updated = register_model(&client, &best, "nyc-bus-delay-predictor").await?;
//! println!("model updated: {updated}");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod error;
pub mod experiment;
pub mod models;
pub mod pipeline;
pub mod registry;
pub mod search_space;
pub mod storage;
pub mod tracking;

pub use error::{Error, Result};
