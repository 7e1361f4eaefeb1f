//! Experiment tracking service client
//!
//! [`TrackingClient`] is the contract the workflow needs from a tracking
//! service: experiments, runs with params/metrics/tags/artifacts, run search
//! and the model registry. The handle is passed explicitly to every
//! component; nothing reads a process-wide tracking URI.
//!
//! Backends:
//! - [`RestTracking`]: MLflow REST API 2.0 over HTTP(S)
//! - [`LocalTracking`]: in-process store, optionally persisted to a directory
//!
//! # Example
//!
//! ```rust
//! use bus_delay_mlops::tracking::{LocalTracking, TrackingClient};
//!
//! # async fn example() -> bus_delay_mlops::Result<()> {
//! let client = LocalTracking::in_memory();
//! let experiment = client.set_experiment("nyc-bus-delay-predictor-hpo").await?;
//! let run = client.create_run(experiment.experiment_id()).await?;
//! client.set_tag(run.run_id(), "model", "xgboost-regressor").await?;
//! client.log_metric(run.run_id(), "rmse", 4.2, 0).await?;
//! # Ok(())
//! # }
//! ```

mod local;
mod rest;

pub use local::LocalTracking;
pub use rest::RestTracking;

use std::collections::BTreeMap;
use std::future::Future;

use tracing::{debug, warn};

use crate::experiment::{ExperimentRecord, OrderClause, RunRecord, RunStatus};
use crate::registry::{ModelVersion, Stage};
use crate::Result;

/// Default page size of run searches.
pub const SEARCH_MAX_RESULTS_DEFAULT: usize = 1000;

/// Which runs a search considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewType {
    /// Only active runs.
    #[default]
    ActiveOnly,
    /// Only soft-deleted runs.
    DeletedOnly,
    /// Every run.
    All,
}

impl ViewType {
    /// Name used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ActiveOnly => "ACTIVE_ONLY",
            Self::DeletedOnly => "DELETED_ONLY",
            Self::All => "ALL",
        }
    }
}

/// Parameters of a run search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunQuery {
    /// Experiments to search.
    pub experiment_ids: Vec<String>,
    /// Ordering clauses, applied in order.
    pub order_by: Vec<OrderClause>,
    /// Maximum number of runs returned.
    pub max_results: usize,
    /// Lifecycle filter.
    pub view: ViewType,
}

impl RunQuery {
    /// Search one experiment, active runs only, default page size.
    #[must_use]
    pub fn experiment(experiment_id: impl Into<String>) -> Self {
        Self {
            experiment_ids: vec![experiment_id.into()],
            order_by: Vec::new(),
            max_results: SEARCH_MAX_RESULTS_DEFAULT,
            view: ViewType::ActiveOnly,
        }
    }

    /// Append an ordering clause.
    #[must_use]
    pub fn order_by(mut self, clause: OrderClause) -> Self {
        self.order_by.push(clause);
        self
    }

    /// Append a clause in the service's `order_by` syntax, e.g.
    /// `metrics.rmse ASC`.
    ///
    /// # Errors
    /// Returns [`Error::ParseError`](crate::Error::ParseError) for an invalid clause.
    pub fn order_by_expr(self, clause: &str) -> Result<Self> {
        Ok(self.order_by(OrderClause::parse(clause)?))
    }

    /// Limit the number of results.
    #[must_use]
    pub const fn max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }
}

/// Experiment tracking service contract.
///
/// All calls are individually atomic on the service side; callers do no
/// client-side locking.
pub trait TrackingClient: Send + Sync {
    /// Resolve an experiment name. `None` if it does not exist.
    fn get_experiment_by_name(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<ExperimentRecord>>> + Send;

    /// Create an experiment.
    fn create_experiment(&self, name: &str)
        -> impl Future<Output = Result<ExperimentRecord>> + Send;

    /// Create a run in `Running` status.
    fn create_run(&self, experiment_id: &str) -> impl Future<Output = Result<RunRecord>> + Send;

    /// Set a tag on a run.
    fn set_tag(&self, run_id: &str, key: &str, value: &str)
        -> impl Future<Output = Result<()>> + Send;

    /// Log a param on a run. Params are write-once.
    fn log_param(&self, run_id: &str, key: &str, value: &str)
        -> impl Future<Output = Result<()>> + Send;

    /// Log a metric data point on a run.
    fn log_metric(
        &self,
        run_id: &str,
        key: &str,
        value: f64,
        step: u64,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Store a file under the run's artifact root.
    fn log_artifact(
        &self,
        run_id: &str,
        path: &str,
        contents: Vec<u8>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Finalize a run.
    fn end_run(&self, run_id: &str, status: RunStatus) -> impl Future<Output = Result<()>> + Send;

    /// Fetch a run. [`Error::NotFound`](crate::Error::NotFound) if unknown.
    fn get_run(&self, run_id: &str) -> impl Future<Output = Result<RunRecord>> + Send;

    /// Search runs.
    fn search_runs(&self, query: &RunQuery) -> impl Future<Output = Result<Vec<RunRecord>>> + Send;

    /// Create a registered model.
    /// [`Error::AlreadyExists`](crate::Error::AlreadyExists) if the name is taken.
    fn create_registered_model(&self, name: &str) -> impl Future<Output = Result<()>> + Send;

    /// Latest version per stage of a registered model.
    /// [`Error::NotFound`](crate::Error::NotFound) if the model does not exist.
    fn get_latest_versions(
        &self,
        name: &str,
        stages: &[Stage],
    ) -> impl Future<Output = Result<Vec<ModelVersion>>> + Send;

    /// Register a new version of an existing model.
    fn create_model_version(
        &self,
        name: &str,
        source: &str,
        run_id: &str,
        tags: &BTreeMap<String, String>,
    ) -> impl Future<Output = Result<ModelVersion>> + Send;

    /// Change the stage of a model version.
    fn transition_model_version_stage(
        &self,
        name: &str,
        version: u64,
        stage: Stage,
    ) -> impl Future<Output = Result<ModelVersion>> + Send;

    /// Resolve an experiment name, creating the experiment if needed.
    fn set_experiment(&self, name: &str) -> impl Future<Output = Result<ExperimentRecord>> + Send {
        async move {
            if let Some(experiment) = self.get_experiment_by_name(name).await? {
                return Ok(experiment);
            }
            debug!(name, "Creating experiment");
            self.create_experiment(name).await
        }
    }
}

/// Any supported backend, chosen from a tracking URI.
pub enum Tracking {
    /// MLflow REST server
    Rest(RestTracking),
    /// Local store
    Local(LocalTracking),
}

impl Tracking {
    /// Pick a backend from a tracking URI.
    ///
    /// - `http://...`, `https://...`: REST client
    /// - `memory:`: in-process store
    /// - `file:<dir>`, `file://<dir>` or a bare directory: persisted local store
    ///
    /// # Errors
    /// Returns error if the local store cannot be opened.
    pub async fn from_uri(uri: &str) -> Result<Self> {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            return Ok(Self::Rest(RestTracking::new(uri)?));
        }
        if uri == "memory:" {
            return Ok(Self::Local(LocalTracking::in_memory()));
        }
        let path = uri
            .strip_prefix("file://")
            .or_else(|| uri.strip_prefix("file:"))
            .unwrap_or(uri);
        Ok(Self::Local(LocalTracking::open(path).await?))
    }
}

impl TrackingClient for Tracking {
    async fn get_experiment_by_name(&self, name: &str) -> Result<Option<ExperimentRecord>> {
        match self {
            Self::Rest(c) => c.get_experiment_by_name(name).await,
            Self::Local(c) => c.get_experiment_by_name(name).await,
        }
    }

    async fn create_experiment(&self, name: &str) -> Result<ExperimentRecord> {
        match self {
            Self::Rest(c) => c.create_experiment(name).await,
            Self::Local(c) => c.create_experiment(name).await,
        }
    }

    async fn create_run(&self, experiment_id: &str) -> Result<RunRecord> {
        match self {
            Self::Rest(c) => c.create_run(experiment_id).await,
            Self::Local(c) => c.create_run(experiment_id).await,
        }
    }

    async fn set_tag(&self, run_id: &str, key: &str, value: &str) -> Result<()> {
        match self {
            Self::Rest(c) => c.set_tag(run_id, key, value).await,
            Self::Local(c) => c.set_tag(run_id, key, value).await,
        }
    }

    async fn log_param(&self, run_id: &str, key: &str, value: &str) -> Result<()> {
        match self {
            Self::Rest(c) => c.log_param(run_id, key, value).await,
            Self::Local(c) => c.log_param(run_id, key, value).await,
        }
    }

    async fn log_metric(&self, run_id: &str, key: &str, value: f64, step: u64) -> Result<()> {
        match self {
            Self::Rest(c) => c.log_metric(run_id, key, value, step).await,
            Self::Local(c) => c.log_metric(run_id, key, value, step).await,
        }
    }

    async fn log_artifact(&self, run_id: &str, path: &str, contents: Vec<u8>) -> Result<()> {
        match self {
            Self::Rest(c) => c.log_artifact(run_id, path, contents).await,
            Self::Local(c) => c.log_artifact(run_id, path, contents).await,
        }
    }

    async fn end_run(&self, run_id: &str, status: RunStatus) -> Result<()> {
        match self {
            Self::Rest(c) => c.end_run(run_id, status).await,
            Self::Local(c) => c.end_run(run_id, status).await,
        }
    }

    async fn get_run(&self, run_id: &str) -> Result<RunRecord> {
        match self {
            Self::Rest(c) => c.get_run(run_id).await,
            Self::Local(c) => c.get_run(run_id).await,
        }
    }

    async fn search_runs(&self, query: &RunQuery) -> Result<Vec<RunRecord>> {
        match self {
            Self::Rest(c) => c.search_runs(query).await,
            Self::Local(c) => c.search_runs(query).await,
        }
    }

    async fn create_registered_model(&self, name: &str) -> Result<()> {
        match self {
            Self::Rest(c) => c.create_registered_model(name).await,
            Self::Local(c) => c.create_registered_model(name).await,
        }
    }

    async fn get_latest_versions(&self, name: &str, stages: &[Stage]) -> Result<Vec<ModelVersion>> {
        match self {
            Self::Rest(c) => c.get_latest_versions(name, stages).await,
            Self::Local(c) => c.get_latest_versions(name, stages).await,
        }
    }

    async fn create_model_version(
        &self,
        name: &str,
        source: &str,
        run_id: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<ModelVersion> {
        match self {
            Self::Rest(c) => c.create_model_version(name, source, run_id, tags).await,
            Self::Local(c) => c.create_model_version(name, source, run_id, tags).await,
        }
    }

    async fn transition_model_version_stage(
        &self,
        name: &str,
        version: u64,
        stage: Stage,
    ) -> Result<ModelVersion> {
        match self {
            Self::Rest(c) => c.transition_model_version_stage(name, version, stage).await,
            Self::Local(c) => c.transition_model_version_stage(name, version, stage).await,
        }
    }
}

/// A run being written to, closed with [`ActiveRun::finish`].
///
/// Mirrors a tracking session: a successful body ends the run as
/// `Success`, an error ends it as `Failed` and is handed back unchanged.
pub struct ActiveRun<'a, C: TrackingClient> {
    client: &'a C,
    run_id: String,
}

impl<'a, C: TrackingClient> ActiveRun<'a, C> {
    /// Create a run in `experiment_id`.
    ///
    /// # Errors
    /// Propagates tracking service errors.
    pub async fn start(client: &'a C, experiment_id: &str) -> Result<Self> {
        let run = client.create_run(experiment_id).await?;
        debug!(run_id = run.run_id(), experiment_id, "Started run");
        Ok(Self {
            client,
            run_id: run.run_id().to_string(),
        })
    }

    /// ID of the run.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Set a tag.
    ///
    /// # Errors
    /// Propagates tracking service errors.
    pub async fn set_tag(&self, key: &str, value: &str) -> Result<()> {
        self.client.set_tag(&self.run_id, key, value).await
    }

    /// Log every param of a map.
    ///
    /// # Errors
    /// Propagates tracking service errors.
    pub async fn log_params(&self, params: &BTreeMap<String, String>) -> Result<()> {
        for (key, value) in params {
            self.client.log_param(&self.run_id, key, value).await?;
        }
        Ok(())
    }

    /// Log a metric at step 0.
    ///
    /// # Errors
    /// Propagates tracking service errors.
    pub async fn log_metric(&self, key: &str, value: f64) -> Result<()> {
        self.client.log_metric(&self.run_id, key, value, 0).await
    }

    /// Store an artifact file.
    ///
    /// # Errors
    /// Propagates tracking service errors.
    pub async fn log_artifact(&self, path: &str, contents: Vec<u8>) -> Result<()> {
        self.client.log_artifact(&self.run_id, path, contents).await
    }

    /// End the run according to `outcome` and pass `outcome` through.
    ///
    /// # Errors
    /// Returns the body's error if it failed, otherwise any error ending the run.
    pub async fn finish<T>(self, outcome: Result<T>) -> Result<T> {
        match outcome {
            Ok(value) => {
                self.client.end_run(&self.run_id, RunStatus::Success).await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(end_err) = self.client.end_run(&self.run_id, RunStatus::Failed).await {
                    warn!(run_id = %self.run_id, error = %end_err, "Could not mark run as failed");
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[tokio::test]
    async fn test_finish_ok_marks_success() {
        let client = LocalTracking::in_memory();
        let exp = client.set_experiment("select").await.unwrap();
        let run = ActiveRun::start(&client, exp.experiment_id()).await.unwrap();
        let run_id = run.run_id().to_string();

        assert_eq!(run.finish(Ok::<_, Error>(3)).await.unwrap(), 3);
        assert_eq!(client.get_run(&run_id).await.unwrap().status(), RunStatus::Success);
    }

    #[tokio::test]
    async fn test_finish_err_marks_failed_and_returns_error() {
        let client = LocalTracking::in_memory();
        let exp = client.set_experiment("select").await.unwrap();
        let run = ActiveRun::start(&client, exp.experiment_id()).await.unwrap();
        let run_id = run.run_id().to_string();

        let outcome: Result<()> = Err(Error::Training("split is empty".to_string()));
        let err = run.finish(outcome).await.unwrap_err();

        assert!(matches!(err, Error::Training(ref msg) if msg == "split is empty"));
        let stored = client.get_run(&run_id).await.unwrap();
        assert_eq!(stored.status(), RunStatus::Failed);
        assert!(stored.ended_at().is_some());
    }

    #[test]
    fn test_order_by_expr_parses_service_syntax() {
        let query = RunQuery::experiment("1")
            .order_by_expr("metrics.test_rmse ASC")
            .unwrap()
            .max_results(1);
        assert_eq!(query.order_by.len(), 1);
        assert_eq!(query.order_by[0].to_string(), "metrics.`test_rmse` ASC");
        assert!(RunQuery::experiment("1")
            .order_by_expr("metrics.rmse ASC, tags.model")
            .is_err());
    }
}
