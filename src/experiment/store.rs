//! Experiment Store - in-memory state of a local tracking service
//!
//! Holds experiments, runs, the metric time series, the artifact index and
//! the model registry. It is plain data (serde) so the local tracking
//! backend can persist it as a single JSON document.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::{ArtifactRecord, ExperimentRecord, MetricRecord, RunRecord};
use crate::registry::RegisteredModel;

/// In-memory store for experiment tracking data.
///
/// ## Design
///
/// Experiments and runs are keyed by ID for O(1) lookups. Metrics are kept
/// as an append-only vector that is filtered and sorted for time-series
/// queries; each run additionally caches the latest value per metric key.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ExperimentStore {
    experiments: BTreeMap<String, ExperimentRecord>,
    runs: HashMap<String, RunRecord>,
    metrics: Vec<MetricRecord>,
    artifacts: Vec<ArtifactRecord>,
    models: BTreeMap<String, RegisteredModel>,
}

impl ExperimentStore {
    /// Create a new empty experiment store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the store is empty (no experiments, runs, metrics or models).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
            && self.runs.is_empty()
            && self.metrics.is_empty()
            && self.models.is_empty()
    }

    /// Get the number of experiments in the store.
    #[must_use]
    pub fn experiment_count(&self) -> usize {
        self.experiments.len()
    }

    /// Get the number of runs in the store.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// ID the next created experiment should get.
    #[must_use]
    pub fn next_experiment_id(&self) -> String {
        let next = self
            .experiments
            .keys()
            .filter_map(|id| id.parse::<u64>().ok())
            .max()
            .map_or(0, |max| max + 1);
        next.to_string()
    }

    /// Add an experiment to the store.
    pub fn add_experiment(&mut self, experiment: ExperimentRecord) {
        self.experiments
            .insert(experiment.experiment_id().to_string(), experiment);
    }

    /// Get an experiment by ID.
    #[must_use]
    pub fn get_experiment(&self, experiment_id: &str) -> Option<&ExperimentRecord> {
        self.experiments.get(experiment_id)
    }

    /// Resolve an experiment name.
    #[must_use]
    pub fn get_experiment_by_name(&self, name: &str) -> Option<&ExperimentRecord> {
        self.experiments.values().find(|e| e.name() == name)
    }

    /// Add a run to the store.
    pub fn add_run(&mut self, run: RunRecord) {
        self.runs.insert(run.run_id().to_string(), run);
    }

    /// Get a run by ID.
    #[must_use]
    pub fn get_run(&self, run_id: &str) -> Option<&RunRecord> {
        self.runs.get(run_id)
    }

    /// Get a run by ID for mutation.
    pub fn get_run_mut(&mut self, run_id: &str) -> Option<&mut RunRecord> {
        self.runs.get_mut(run_id)
    }

    /// Get all runs for an experiment.
    #[must_use]
    pub fn get_runs_for_experiment(&self, experiment_id: &str) -> Vec<&RunRecord> {
        self.runs
            .values()
            .filter(|run| run.experiment_id() == experiment_id)
            .collect()
    }

    /// Add a metric data point, refreshing the run's latest value.
    ///
    /// The latest value is the one at the highest step; among points at the
    /// same step, the one logged last.
    pub fn add_metric(&mut self, metric: MetricRecord) {
        let run_id = metric.run_id().to_string();
        let key = metric.key().to_string();
        self.metrics.push(metric);

        let latest = self.get_metrics_for_run(&run_id, &key).last().map(MetricRecord::value);
        if let (Some(run), Some(value)) = (self.runs.get_mut(&run_id), latest) {
            run.log_metric(key, value);
        }
    }

    /// Get metrics for a specific run and key, ordered by step.
    ///
    /// ## Example
    ///
    /// ```rust
    /// use bus_delay_mlops::experiment::{ExperimentStore, MetricRecord};
    ///
    /// let mut store = ExperimentStore::new();
    ///
    /// for step in 0..100 {
    ///     let rmse = 1.0 / (step as f64 + 1.0);
    ///     store.add_metric(MetricRecord::new("run-001", "validation_rmse", step, rmse));
    /// }
    ///
    /// let curve = store.get_metrics_for_run("run-001", "validation_rmse");
    /// assert_eq!(curve.len(), 100);
    /// ```
    #[must_use]
    pub fn get_metrics_for_run(&self, run_id: &str, key: &str) -> Vec<MetricRecord> {
        let mut metrics: Vec<MetricRecord> = self
            .metrics
            .iter()
            .filter(|m| m.run_id() == run_id && m.key() == key)
            .cloned()
            .collect();

        metrics.sort_by_key(MetricRecord::step);

        metrics
    }

    /// Index an artifact, replacing an earlier record for the same path.
    pub fn add_artifact(&mut self, artifact: ArtifactRecord) {
        self.artifacts
            .retain(|a| !(a.run_id() == artifact.run_id() && a.path() == artifact.path()));
        self.artifacts.push(artifact);
    }

    /// Artifacts of a run.
    #[must_use]
    pub fn get_artifacts_for_run(&self, run_id: &str) -> Vec<&ArtifactRecord> {
        self.artifacts
            .iter()
            .filter(|a| a.run_id() == run_id)
            .collect()
    }

    /// Get a registered model by name.
    #[must_use]
    pub fn registered_model(&self, name: &str) -> Option<&RegisteredModel> {
        self.models.get(name)
    }

    /// Get a registered model by name for mutation.
    pub fn registered_model_mut(&mut self, name: &str) -> Option<&mut RegisteredModel> {
        self.models.get_mut(name)
    }

    /// Add a registered model. Returns `false` if the name is taken.
    pub fn add_registered_model(&mut self, model: RegisteredModel) -> bool {
        if self.models.contains_key(model.name()) {
            return false;
        }
        self.models.insert(model.name().to_string(), model);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_default() {
        let store = ExperimentStore::new();
        assert!(store.is_empty());
        assert_eq!(store.experiment_count(), 0);
        assert_eq!(store.run_count(), 0);
        assert_eq!(store.next_experiment_id(), "0");
    }

    #[test]
    fn test_store_add_and_get() {
        let mut store = ExperimentStore::new();
        store.add_experiment(ExperimentRecord::new("0", "hpo"));
        store.add_run(RunRecord::new("run-1", "0"));
        store.add_metric(MetricRecord::new("run-1", "rmse", 0, 0.5));

        assert!(!store.is_empty());
        assert_eq!(store.get_experiment_by_name("hpo").unwrap().experiment_id(), "0");
        assert_eq!(store.next_experiment_id(), "1");
        assert_eq!(store.get_run("run-1").unwrap().metric("rmse"), Some(0.5));
        assert_eq!(store.get_runs_for_experiment("0").len(), 1);
    }

    #[test]
    fn test_get_metrics_for_run_ordering() {
        let mut store = ExperimentStore::new();

        store.add_metric(MetricRecord::new("run-1", "rmse", 2, 0.2));
        store.add_metric(MetricRecord::new("run-1", "rmse", 0, 0.0));
        store.add_metric(MetricRecord::new("run-1", "rmse", 1, 0.1));

        let metrics = store.get_metrics_for_run("run-1", "rmse");

        assert_eq!(metrics.len(), 3);
        assert_eq!(metrics[0].step(), 0);
        assert_eq!(metrics[1].step(), 1);
        assert_eq!(metrics[2].step(), 2);
    }

    #[test]
    fn test_latest_metric_is_highest_step() {
        let mut store = ExperimentStore::new();
        store.add_run(RunRecord::new("run-1", "0"));

        store.add_metric(MetricRecord::new("run-1", "rmse", 2, 0.2));
        store.add_metric(MetricRecord::new("run-1", "rmse", 0, 0.9));
        assert_eq!(store.get_run("run-1").unwrap().metric("rmse"), Some(0.2));

        store.add_metric(MetricRecord::new("run-1", "rmse", 2, 0.3));
        assert_eq!(store.get_run("run-1").unwrap().metric("rmse"), Some(0.3));
        assert_eq!(store.get_metrics_for_run("run-1", "rmse").len(), 3);
    }

    #[test]
    fn test_artifact_replaced_per_path() {
        let mut store = ExperimentStore::new();
        store.add_artifact(ArtifactRecord::new("run-1", "model/model.json", 10));
        store.add_artifact(ArtifactRecord::new("run-1", "model/model.json", 20));
        let artifacts = store.get_artifacts_for_run("run-1");
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].size_bytes(), 20);
    }

    #[test]
    fn test_registered_model_name_is_unique() {
        let mut store = ExperimentStore::new();
        assert!(store.add_registered_model(RegisteredModel::new("m")));
        assert!(!store.add_registered_model(RegisteredModel::new("m")));
    }

    #[test]
    fn test_store_json_round_trip() {
        let mut store = ExperimentStore::new();
        store.add_experiment(ExperimentRecord::new("0", "hpo"));
        store.add_run(RunRecord::builder("run-1", "0").tag("model", "xgboost-regressor").build());

        let json = serde_json::to_string(&store).unwrap();
        let restored: ExperimentStore = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.get_run("run-1"), store.get_run("run-1"));
    }
}
