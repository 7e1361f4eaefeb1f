//! Experiment Record - named group of runs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::LifecycleStage;

/// Experiment Record represents a tracked experiment.
///
/// The HPO stage writes into one experiment, the selection stage into
/// another; runs reference their experiment by ID.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExperimentRecord {
    experiment_id: String,
    name: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    lifecycle_stage: LifecycleStage,
    #[serde(default)]
    artifact_location: String,
}

impl ExperimentRecord {
    /// Create a new experiment record with the given ID and name.
    #[must_use]
    pub fn new(experiment_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::builder(experiment_id, name).build()
    }

    /// Create a builder for constructing an experiment record with optional fields.
    #[must_use]
    pub fn builder(
        experiment_id: impl Into<String>,
        name: impl Into<String>,
    ) -> ExperimentRecordBuilder {
        ExperimentRecordBuilder::new(experiment_id, name)
    }

    /// Get the experiment ID.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Get the experiment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Get the lifecycle stage.
    #[must_use]
    pub const fn lifecycle_stage(&self) -> LifecycleStage {
        self.lifecycle_stage
    }

    /// Default artifact root for runs of this experiment.
    #[must_use]
    pub fn artifact_location(&self) -> &str {
        &self.artifact_location
    }
}

/// Builder for `ExperimentRecord`.
#[derive(Debug)]
pub struct ExperimentRecordBuilder {
    experiment_id: String,
    name: String,
    created_at: DateTime<Utc>,
    lifecycle_stage: LifecycleStage,
    artifact_location: String,
}

impl ExperimentRecordBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(experiment_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            name: name.into(),
            created_at: Utc::now(),
            lifecycle_stage: LifecycleStage::Active,
            artifact_location: String::new(),
        }
    }

    /// Set a custom creation timestamp (useful for deserialization/testing).
    #[must_use]
    pub const fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Set the lifecycle stage.
    #[must_use]
    pub const fn lifecycle_stage(mut self, stage: LifecycleStage) -> Self {
        self.lifecycle_stage = stage;
        self
    }

    /// Set the artifact location.
    #[must_use]
    pub fn artifact_location(mut self, location: impl Into<String>) -> Self {
        self.artifact_location = location.into();
        self
    }

    /// Build the `ExperimentRecord`.
    #[must_use]
    pub fn build(self) -> ExperimentRecord {
        ExperimentRecord {
            experiment_id: self.experiment_id,
            name: self.name,
            created_at: self.created_at,
            lifecycle_stage: self.lifecycle_stage,
            artifact_location: self.artifact_location,
        }
    }
}
