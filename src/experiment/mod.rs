//! Experiment Tracking Schema
//!
//! Data structures shared by every tracking backend.
//!
//! ## Schema Overview
//!
//! ```text
//! ExperimentRecord (1) ──< RunRecord (N)
//!                              │
//!                              ├──< MetricRecord (N) [time-series]
//!                              └──< ArtifactRecord (N)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use bus_delay_mlops::experiment::{ExperimentRecord, RunRecord, MetricRecord, RunStatus};
//!
//! let experiment = ExperimentRecord::new("1", "nyc-bus-delay-predictor-select");
//!
//! let mut run = RunRecord::builder("run-001", experiment.experiment_id())
//!     .tag("model", "random-forest-regressor")
//!     .build();
//! run.start();
//!
//! let metric = MetricRecord::new(run.run_id(), "test_rmse", 0, 4.2);
//! run.log_metric(metric.key(), metric.value());
//!
//! run.complete(RunStatus::Success);
//! assert_eq!(run.metric("test_rmse"), Some(4.2));
//! ```

mod artifact_record;
mod experiment_record;
mod metric_record;
pub mod order;
pub mod ranking;
mod run_record;
mod store;

pub use artifact_record::ArtifactRecord;
pub use experiment_record::{ExperimentRecord, ExperimentRecordBuilder};
pub use metric_record::{MetricRecord, MetricRecordBuilder};
pub use order::{OrderClause, OrderDirection, OrderKey};
pub use ranking::rank_runs;
pub use run_record::{LifecycleStage, RunRecord, RunRecordBuilder, RunStatus};
pub use store::ExperimentStore;
