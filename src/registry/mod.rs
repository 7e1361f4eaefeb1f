//! Model Registry schema and the staged promotion decision
//!
//! ## Schema Overview
//!
//! ```text
//! RegisteredModel (1) ──< ModelVersion (N) ──> RunRecord (1)
//! ```
//!
//! ## Stage State Machine
//!
//! ```text
//! None ──> Staging ──> Production ──> Archived
//!             │                          ▲
//!             └──────────────────────────┘
//! ```
//!
//! The promotion workflow only ever performs `None -> Staging`; the other
//! edges are driven by humans through the tracking service.

mod promotion;

pub use promotion::{
    lookup_baseline, register_model, should_promote, Baseline, TEST_METRIC,
};

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Readiness label of a model version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Stage {
    /// Freshly registered, no label yet.
    #[default]
    None,
    /// Candidate awaiting review.
    Staging,
    /// Serving model. At most one version per model.
    Production,
    /// Retired.
    Archived,
}

impl Stage {
    /// Every stage, in lifecycle order.
    pub const ALL: [Self; 4] = [Self::None, Self::Staging, Self::Production, Self::Archived];

    /// Whether `self -> to` is an edge of the stage state machine.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::None, Self::Staging)
                | (Self::Staging, Self::Production)
                | (Self::Staging | Self::Production, Self::Archived)
        )
    }

    /// Name used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Staging => "Staging",
            Self::Production => "Production",
            Self::Archived => "Archived",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "staging" => Ok(Self::Staging),
            "production" => Ok(Self::Production),
            "archived" => Ok(Self::Archived),
            _ => Err(Error::InvalidInput(format!("unknown model stage {s:?}"))),
        }
    }
}

/// One registered version of a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelVersion {
    name: String,
    version: u64,
    stage: Stage,
    run_id: String,
    source: String,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    created_at: DateTime<Utc>,
}

impl ModelVersion {
    /// Create a version in stage `None`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        version: u64,
        run_id: impl Into<String>,
        source: impl Into<String>,
        tags: BTreeMap<String, String>,
    ) -> Self {
        Self {
            name: name.into(),
            version,
            stage: Stage::None,
            run_id: run_id.into(),
            source: source.into(),
            tags,
            created_at: Utc::now(),
        }
    }

    /// Set the stage without checking the state machine (wire decoding).
    #[must_use]
    pub const fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = stage;
        self
    }

    /// Registered model name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version number, starting at 1.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Current stage.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// Run that produced this version.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Artifact URI the version was registered from.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Tags copied from the producing run.
    #[must_use]
    pub const fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Registration timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// A named model with its ordered versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredModel {
    name: String,
    created_at: DateTime<Utc>,
    versions: Vec<ModelVersion>,
}

impl RegisteredModel {
    /// Create an empty registered model.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created_at: Utc::now(),
            versions: Vec::new(),
        }
    }

    /// Model name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All versions, oldest first.
    #[must_use]
    pub fn versions(&self) -> &[ModelVersion] {
        &self.versions
    }

    /// Look up a version by number.
    #[must_use]
    pub fn version(&self, version: u64) -> Option<&ModelVersion> {
        self.versions.iter().find(|v| v.version == version)
    }

    /// Latest version per requested stage, ordered by version number.
    ///
    /// An empty `stages` slice means every stage.
    #[must_use]
    pub fn latest_versions(&self, stages: &[Stage]) -> Vec<ModelVersion> {
        let wanted: &[Stage] = if stages.is_empty() { &Stage::ALL } else { stages };
        let mut latest: Vec<ModelVersion> = wanted
            .iter()
            .filter_map(|stage| {
                self.versions
                    .iter()
                    .filter(|v| v.stage == *stage)
                    .max_by_key(|v| v.version)
                    .cloned()
            })
            .collect();
        latest.sort_by_key(|v| v.version);
        latest.dedup_by_key(|v| v.version);
        latest
    }

    /// Append a new version in stage `None`.
    pub fn add_version(
        &mut self,
        run_id: impl Into<String>,
        source: impl Into<String>,
        tags: BTreeMap<String, String>,
    ) -> ModelVersion {
        let next = self.versions.iter().map(|v| v.version).max().unwrap_or(0) + 1;
        let version = ModelVersion::new(self.name.clone(), next, run_id, source, tags);
        self.versions.push(version.clone());
        version
    }

    /// Move a version to `stage`.
    ///
    /// Moving a version into `Production` archives the previous production
    /// version so the label stays exclusive.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown version and
    /// [`Error::InvalidTransition`] for an edge outside the state machine.
    pub fn transition(&mut self, version: u64, stage: Stage) -> Result<ModelVersion> {
        let current = self
            .version(version)
            .ok_or_else(|| Error::NotFound(format!("model version {}/{version}", self.name)))?
            .stage;

        if !current.can_transition_to(stage) {
            return Err(Error::InvalidTransition {
                name: self.name.clone(),
                version,
                from: current.to_string(),
                to: stage.to_string(),
            });
        }

        if stage == Stage::Production {
            for v in &mut self.versions {
                if v.stage == Stage::Production {
                    v.stage = Stage::Archived;
                }
            }
        }

        let target = self
            .versions
            .iter_mut()
            .find(|v| v.version == version)
            .ok_or_else(|| Error::NotFound(format!("model version {}/{version}", self.name)))?;
        target.stage = stage;
        Ok(target.clone())
    }
}
