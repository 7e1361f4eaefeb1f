//! Artifact Record - files logged under a run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Artifact Record represents one file stored under a run's artifact root.
///
/// Paths are relative to the run (e.g. `model/model.json`); the model the
/// registry resolves through `runs:/<run_id>/model` is the `model/` prefix.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactRecord {
    run_id: String,
    path: String,
    size_bytes: u64,
    created_at: DateTime<Utc>,
}

impl ArtifactRecord {
    /// Create a new artifact record with the current timestamp.
    #[must_use]
    pub fn new(run_id: impl Into<String>, path: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            run_id: run_id.into(),
            path: path.into(),
            size_bytes,
            created_at: Utc::now(),
        }
    }

    /// Get the run ID.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Get the path relative to the run's artifact root.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Get the artifact size in bytes.
    #[must_use]
    pub const fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether the artifact lives under the given directory prefix.
    #[must_use]
    pub fn is_under(&self, dir: &str) -> bool {
        let dir = dir.trim_end_matches('/');
        self.path
            .strip_prefix(dir)
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_record_new() {
        let artifact = ArtifactRecord::new("run-1", "model/model.json", 1000);
        assert_eq!(artifact.run_id(), "run-1");
        assert_eq!(artifact.path(), "model/model.json");
        assert_eq!(artifact.size_bytes(), 1000);
    }

    #[test]
    fn test_artifact_is_under() {
        let artifact = ArtifactRecord::new("run-1", "model/model.json", 10);
        assert!(artifact.is_under("model"));
        assert!(artifact.is_under("model/"));
        assert!(!artifact.is_under("mod"));
        assert!(!artifact.is_under("plots"));
    }
}
