//! In-process tracking backend built on [`ExperimentStore`].
//!
//! With a root directory the store is persisted after every mutation:
//!
//! ```text
//! <root>/tracking.json                 experiments, runs, metrics, registry
//! <root>/artifacts/<run_id>/<path>     artifact files
//! ```
//!
//! Without one (`memory:`) everything is lost on drop.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::{RunQuery, TrackingClient, ViewType};
use crate::experiment::{
    rank_runs, ArtifactRecord, ExperimentRecord, ExperimentStore, LifecycleStage, MetricRecord,
    RunRecord, RunStatus,
};
use crate::registry::{ModelVersion, RegisteredModel, Stage};
use crate::{Error, Result};

const STORE_FILE: &str = "tracking.json";
const ARTIFACT_DIR: &str = "artifacts";

/// Local tracking service.
pub struct LocalTracking {
    store: Mutex<ExperimentStore>,
    root: Option<PathBuf>,
    blobs: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl LocalTracking {
    /// Create a store that lives only in memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            store: Mutex::new(ExperimentStore::new()),
            root: None,
            blobs: Mutex::new(HashMap::new()),
        }
    }

    /// Open (or create) a store persisted under `root`.
    ///
    /// # Errors
    /// Returns error if the directory cannot be created or the store file
    /// cannot be parsed.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(root.join(ARTIFACT_DIR)).await?;

        let store_path = root.join(STORE_FILE);
        let store = if tokio::fs::try_exists(&store_path).await? {
            let bytes = tokio::fs::read(&store_path).await?;
            serde_json::from_slice(&bytes)?
        } else {
            ExperimentStore::new()
        };
        debug!(root = %root.display(), "Opened local tracking store");

        Ok(Self {
            store: Mutex::new(store),
            root: Some(root),
            blobs: Mutex::new(HashMap::new()),
        })
    }

    /// Snapshot of the current store contents.
    pub async fn snapshot(&self) -> ExperimentStore {
        self.store.lock().await.clone()
    }

    /// Read back an artifact file.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the artifact was never logged.
    pub async fn read_artifact(&self, run_id: &str, path: &str) -> Result<Vec<u8>> {
        match &self.root {
            Some(root) => {
                let file = artifact_path(root, run_id, path);
                if !tokio::fs::try_exists(&file).await? {
                    return Err(Error::NotFound(format!("artifact {run_id}/{path}")));
                }
                Ok(tokio::fs::read(file).await?)
            }
            None => self
                .blobs
                .lock()
                .await
                .get(&(run_id.to_string(), path.to_string()))
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("artifact {run_id}/{path}"))),
        }
    }

    fn artifact_root_uri(&self, run_id: &str) -> String {
        match &self.root {
            Some(root) => format!("file://{}", root.join(ARTIFACT_DIR).join(run_id).display()),
            None => format!("memory:/{ARTIFACT_DIR}/{run_id}"),
        }
    }

    async fn persist(&self, store: &ExperimentStore) -> Result<()> {
        let Some(root) = &self.root else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(store)?;
        let tmp = root.join(format!("{STORE_FILE}.tmp"));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, root.join(STORE_FILE)).await?;
        Ok(())
    }

    /// Apply `f` to a live run and persist.
    async fn with_open_run<F>(&self, run_id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut ExperimentStore) -> Result<()> + Send,
    {
        let mut store = self.store.lock().await;
        ensure_open(&store, run_id)?;
        f(&mut store)?;
        self.persist(&store).await
    }
}

fn ensure_open(store: &ExperimentStore, run_id: &str) -> Result<()> {
    let run = store
        .get_run(run_id)
        .ok_or_else(|| Error::NotFound(format!("run {run_id}")))?;
    if run.status().is_terminal() {
        return Err(Error::Tracking {
            code: "INVALID_STATE".to_string(),
            message: format!("run {run_id} is already finished ({:?})", run.status()),
        });
    }
    Ok(())
}

fn artifact_path(root: &Path, run_id: &str, path: &str) -> PathBuf {
    let mut file = root.join(ARTIFACT_DIR).join(run_id);
    for part in path.split('/').filter(|p| !p.is_empty() && *p != "." && *p != "..") {
        file.push(part);
    }
    file
}

fn model_not_found(name: &str) -> Error {
    Error::NotFound(format!("registered model with name={name} not found"))
}

impl TrackingClient for LocalTracking {
    async fn get_experiment_by_name(&self, name: &str) -> Result<Option<ExperimentRecord>> {
        let store = self.store.lock().await;
        Ok(store
            .get_experiment_by_name(name)
            .filter(|e| e.lifecycle_stage() == LifecycleStage::Active)
            .cloned())
    }

    async fn create_experiment(&self, name: &str) -> Result<ExperimentRecord> {
        let mut store = self.store.lock().await;
        if store.get_experiment_by_name(name).is_some() {
            return Err(Error::AlreadyExists(format!("experiment {name}")));
        }
        let id = store.next_experiment_id();
        let location = match &self.root {
            Some(root) => format!("file://{}", root.join(ARTIFACT_DIR).display()),
            None => format!("memory:/{ARTIFACT_DIR}"),
        };
        let experiment = ExperimentRecord::builder(id, name)
            .artifact_location(location)
            .build();
        store.add_experiment(experiment.clone());
        self.persist(&store).await?;
        Ok(experiment)
    }

    async fn create_run(&self, experiment_id: &str) -> Result<RunRecord> {
        let mut store = self.store.lock().await;
        if store.get_experiment(experiment_id).is_none() {
            return Err(Error::NotFound(format!("experiment {experiment_id}")));
        }

        // Strictly increasing start times keep `start_time DESC` tie-breaks deterministic.
        let latest = store
            .get_runs_for_experiment(experiment_id)
            .iter()
            .filter_map(|r| r.started_at())
            .max();
        let now = Utc::now();
        let started_at = match latest {
            Some(latest) if latest >= now => latest + Duration::microseconds(1),
            _ => now,
        };

        let run_id = Uuid::new_v4().simple().to_string();
        let run = RunRecord::builder(&run_id, experiment_id)
            .status(RunStatus::Running)
            .started_at(started_at)
            .artifact_uri(self.artifact_root_uri(&run_id))
            .build();
        store.add_run(run.clone());
        self.persist(&store).await?;
        Ok(run)
    }

    async fn set_tag(&self, run_id: &str, key: &str, value: &str) -> Result<()> {
        self.with_open_run(run_id, |store| {
            if let Some(run) = store.get_run_mut(run_id) {
                run.set_tag(key, value);
            }
            Ok(())
        })
        .await
    }

    async fn log_param(&self, run_id: &str, key: &str, value: &str) -> Result<()> {
        self.with_open_run(run_id, |store| {
            let Some(run) = store.get_run_mut(run_id) else {
                return Ok(());
            };
            if let Some(existing) = run.params().get(key).filter(|e| e.as_str() != value) {
                return Err(Error::Tracking {
                    code: "INVALID_PARAMETER_VALUE".to_string(),
                    message: format!(
                        "param {key} of run {run_id} already logged as {existing:?}, got {value:?}"
                    ),
                });
            }
            run.log_param(key, value);
            Ok(())
        })
        .await
    }

    async fn log_metric(&self, run_id: &str, key: &str, value: f64, step: u64) -> Result<()> {
        self.with_open_run(run_id, |store| {
            store.add_metric(MetricRecord::new(run_id, key, step, value));
            Ok(())
        })
        .await
    }

    async fn log_artifact(&self, run_id: &str, path: &str, contents: Vec<u8>) -> Result<()> {
        let size = contents.len() as u64;
        // The store lock is held until the record is written, so a run cannot
        // finish between the check and the upload.
        let mut store = self.store.lock().await;
        ensure_open(&store, run_id)?;
        match &self.root {
            Some(root) => {
                let file = artifact_path(root, run_id, path);
                if let Some(parent) = file.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&file, contents).await?;
            }
            None => {
                self.blobs
                    .lock()
                    .await
                    .insert((run_id.to_string(), path.to_string()), contents);
            }
        }
        store.add_artifact(ArtifactRecord::new(run_id, path, size));
        self.persist(&store).await
    }

    async fn end_run(&self, run_id: &str, status: RunStatus) -> Result<()> {
        if !status.is_terminal() {
            return Err(Error::InvalidInput(format!(
                "cannot end run {run_id} with non-terminal status {status:?}"
            )));
        }
        self.with_open_run(run_id, |store| {
            if let Some(run) = store.get_run_mut(run_id) {
                run.complete(status);
            }
            Ok(())
        })
        .await
    }

    async fn get_run(&self, run_id: &str) -> Result<RunRecord> {
        self.store
            .lock()
            .await
            .get_run(run_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("run {run_id}")))
    }

    async fn search_runs(&self, query: &RunQuery) -> Result<Vec<RunRecord>> {
        let store = self.store.lock().await;
        let candidates: Vec<RunRecord> = query
            .experiment_ids
            .iter()
            .flat_map(|id| store.get_runs_for_experiment(id))
            .filter(|run| match query.view {
                ViewType::ActiveOnly => run.lifecycle_stage() == LifecycleStage::Active,
                ViewType::DeletedOnly => run.lifecycle_stage() == LifecycleStage::Deleted,
                ViewType::All => true,
            })
            .cloned()
            .collect();
        Ok(rank_runs(candidates, &query.order_by, Some(query.max_results)))
    }

    async fn create_registered_model(&self, name: &str) -> Result<()> {
        let mut store = self.store.lock().await;
        if !store.add_registered_model(RegisteredModel::new(name)) {
            return Err(Error::AlreadyExists(format!("registered model {name}")));
        }
        self.persist(&store).await
    }

    async fn get_latest_versions(&self, name: &str, stages: &[Stage]) -> Result<Vec<ModelVersion>> {
        let store = self.store.lock().await;
        store
            .registered_model(name)
            .map(|model| model.latest_versions(stages))
            .ok_or_else(|| model_not_found(name))
    }

    async fn create_model_version(
        &self,
        name: &str,
        source: &str,
        run_id: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<ModelVersion> {
        let mut store = self.store.lock().await;

        if let Some(rest) = source.strip_prefix("runs:/") {
            let (source_run, artifact_dir) = rest.split_once('/').unwrap_or((rest, ""));
            if store.get_run(source_run).is_none() {
                return Err(Error::NotFound(format!("run {source_run}")));
            }
            let has_model = store
                .get_artifacts_for_run(source_run)
                .iter()
                .any(|a| a.is_under(artifact_dir));
            if !has_model {
                return Err(Error::NotFound(format!(
                    "no artifacts under {artifact_dir:?} for run {source_run}"
                )));
            }
        }

        let version = store
            .registered_model_mut(name)
            .ok_or_else(|| model_not_found(name))?
            .add_version(run_id, source, tags.clone());
        self.persist(&store).await?;
        Ok(version)
    }

    async fn transition_model_version_stage(
        &self,
        name: &str,
        version: u64,
        stage: Stage,
    ) -> Result<ModelVersion> {
        let mut store = self.store.lock().await;
        let updated = store
            .registered_model_mut(name)
            .ok_or_else(|| model_not_found(name))?
            .transition(version, stage)?;
        self.persist(&store).await?;
        Ok(updated)
    }
}
