//! MLflow REST API 2.0 backend.
//!
//! Error bodies (`{"error_code": ..., "message": ...}`) are mapped narrowly:
//! `RESOURCE_DOES_NOT_EXIST` becomes [`Error::NotFound`],
//! `RESOURCE_ALREADY_EXISTS` becomes [`Error::AlreadyExists`], everything
//! else is an [`Error::Tracking`] carrying the service code.
//!
//! Artifacts are uploaded through the `mlflow-artifacts` proxy, so runs must
//! have an `mlflow-artifacts:/` artifact URI (the server's default when it is
//! started with `--serve-artifacts`).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{RunQuery, TrackingClient};
use crate::experiment::{ExperimentRecord, LifecycleStage, RunRecord, RunStatus};
use crate::registry::{ModelVersion, Stage};
use crate::{Error, Result};

const API: &str = "api/2.0/mlflow";
const ARTIFACTS_API: &str = "api/2.0/mlflow-artifacts/artifacts";
const MAX_PAGE_SIZE: usize = 1000;

/// HTTP client for an MLflow tracking server.
pub struct RestTracking {
    client: Client,
    base_url: String,
}

impl RestTracking {
    /// Create a client for `base_url` (e.g. `http://127.0.0.1:5000`).
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("bus-delay-mlops/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Server base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{API}/{path}", self.base_url)
    }

    async fn get<R: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<R> {
        debug!(path, "GET");
        let response = self.client.get(self.endpoint(path)).query(query).send().await?;
        decode(response).await
    }

    async fn post<B: Serialize + Sync, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R> {
        debug!(path, "POST");
        let response = self.client.post(self.endpoint(path)).json(body).send().await?;
        decode(response).await
    }
}

async fn decode<R: DeserializeOwned>(response: Response) -> Result<R> {
    let status = response.status();
    let body = response.text().await?;
    if status.is_success() {
        // Some endpoints answer with an empty body.
        let body = if body.trim().is_empty() { "{}" } else { body.as_str() };
        return Ok(serde_json::from_str(body)?);
    }
    Err(error_from_body(status, &body))
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error_code: String,
    #[serde(default)]
    message: String,
}

fn error_from_body(status: StatusCode, body: &str) -> Error {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(err) => match err.error_code.as_str() {
            "RESOURCE_DOES_NOT_EXIST" => Error::NotFound(err.message),
            "RESOURCE_ALREADY_EXISTS" => Error::AlreadyExists(err.message),
            _ => Error::Tracking {
                code: err.error_code,
                message: err.message,
            },
        },
        Err(_) => Error::Tracking {
            code: status.as_u16().to_string(),
            message: body.to_string(),
        },
    }
}

fn status_to_wire(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Pending => "SCHEDULED",
        RunStatus::Running => "RUNNING",
        RunStatus::Success => "FINISHED",
        RunStatus::Failed => "FAILED",
        RunStatus::Cancelled => "KILLED",
    }
}

fn status_from_wire(status: &str) -> RunStatus {
    match status {
        "SCHEDULED" => RunStatus::Pending,
        "FINISHED" => RunStatus::Success,
        "FAILED" => RunStatus::Failed,
        "KILLED" => RunStatus::Cancelled,
        _ => RunStatus::Running,
    }
}

fn lifecycle_from_wire(stage: Option<&str>) -> LifecycleStage {
    match stage {
        Some("deleted") => LifecycleStage::Deleted,
        _ => LifecycleStage::Active,
    }
}

fn millis(ts: Option<i64>) -> Option<DateTime<Utc>> {
    ts.and_then(DateTime::from_timestamp_millis)
}

#[derive(Debug, Deserialize)]
struct WireExperiment {
    experiment_id: String,
    name: String,
    #[serde(default)]
    artifact_location: Option<String>,
    #[serde(default)]
    lifecycle_stage: Option<String>,
    #[serde(default)]
    creation_time: Option<i64>,
}

impl From<WireExperiment> for ExperimentRecord {
    fn from(wire: WireExperiment) -> Self {
        let mut builder = Self::builder(wire.experiment_id, wire.name)
            .lifecycle_stage(lifecycle_from_wire(wire.lifecycle_stage.as_deref()))
            .artifact_location(wire.artifact_location.unwrap_or_default());
        if let Some(created) = millis(wire.creation_time) {
            builder = builder.created_at(created);
        }
        builder.build()
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct KeyValue {
    key: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct WireMetric {
    key: String,
    value: f64,
}

#[derive(Debug, Deserialize)]
struct WireRunInfo {
    run_id: String,
    experiment_id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    start_time: Option<i64>,
    #[serde(default)]
    end_time: Option<i64>,
    #[serde(default)]
    artifact_uri: Option<String>,
    #[serde(default)]
    lifecycle_stage: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireRunData {
    #[serde(default)]
    metrics: Vec<WireMetric>,
    #[serde(default)]
    params: Vec<KeyValue>,
    #[serde(default)]
    tags: Vec<KeyValue>,
}

#[derive(Debug, Deserialize)]
struct WireRun {
    info: WireRunInfo,
    #[serde(default)]
    data: WireRunData,
}

impl From<WireRun> for RunRecord {
    fn from(wire: WireRun) -> Self {
        let info = wire.info;
        let mut builder = Self::builder(info.run_id, info.experiment_id)
            .status(status_from_wire(info.status.as_deref().unwrap_or("RUNNING")))
            .lifecycle_stage(lifecycle_from_wire(info.lifecycle_stage.as_deref()))
            .artifact_uri(info.artifact_uri.unwrap_or_default());
        if let Some(started) = millis(info.start_time) {
            builder = builder.started_at(started);
        }
        if let Some(ended) = millis(info.end_time) {
            builder = builder.ended_at(ended);
        }
        for tag in wire.data.tags {
            builder = builder.tag(tag.key, tag.value);
        }
        for param in wire.data.params {
            builder = builder.param(param.key, param.value);
        }
        for metric in wire.data.metrics {
            builder = builder.metric(metric.key, metric.value);
        }
        builder.build()
    }
}

#[derive(Debug, Deserialize)]
struct WireModelVersion {
    name: String,
    version: String,
    #[serde(default)]
    current_stage: Option<String>,
    #[serde(default)]
    run_id: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    tags: Vec<KeyValue>,
}

impl TryFrom<WireModelVersion> for ModelVersion {
    type Error = Error;

    fn try_from(wire: WireModelVersion) -> Result<Self> {
        let version = wire.version.parse::<u64>().map_err(|e| Error::Tracking {
            code: "INVALID_RESPONSE".to_string(),
            message: format!("model version {:?} is not a number: {e}", wire.version),
        })?;
        let stage = wire
            .current_stage
            .as_deref()
            .map_or(Ok(Stage::None), str::parse)?;
        let tags = wire.tags.into_iter().map(|t| (t.key, t.value)).collect();
        Ok(Self::new(
            wire.name,
            version,
            wire.run_id.unwrap_or_default(),
            wire.source.unwrap_or_default(),
            tags,
        )
        .with_stage(stage))
    }
}

#[derive(Debug, Deserialize)]
struct ExperimentResponse {
    experiment: WireExperiment,
}

#[derive(Debug, Deserialize)]
struct CreateExperimentResponse {
    experiment_id: String,
}

#[derive(Debug, Deserialize)]
struct RunResponse {
    run: WireRun,
}

#[derive(Debug, Deserialize)]
struct SearchRunsResponse {
    #[serde(default)]
    runs: Vec<WireRun>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LatestVersionsResponse {
    #[serde(default)]
    model_versions: Vec<WireModelVersion>,
}

#[derive(Debug, Deserialize)]
struct ModelVersionResponse {
    model_version: WireModelVersion,
}

#[derive(Debug, Deserialize)]
struct Empty {}

/// Path of `artifact_uri` inside the artifact proxy.
fn proxied_artifact_root(artifact_uri: &str) -> Result<&str> {
    artifact_uri
        .strip_prefix("mlflow-artifacts:")
        .map(|rest| rest.trim_start_matches('/'))
        .ok_or_else(|| Error::Tracking {
            code: "UNSUPPORTED_ARTIFACT_STORE".to_string(),
            message: format!(
                "artifact URI {artifact_uri:?} is not served by the tracking server's artifact proxy"
            ),
        })
}

impl TrackingClient for RestTracking {
    async fn get_experiment_by_name(&self, name: &str) -> Result<Option<ExperimentRecord>> {
        match self
            .get::<ExperimentResponse>("experiments/get-by-name", &[("experiment_name", name)])
            .await
        {
            Ok(response) => Ok(Some(response.experiment.into())),
            Err(Error::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn create_experiment(&self, name: &str) -> Result<ExperimentRecord> {
        let created: CreateExperimentResponse = self
            .post("experiments/create", &json!({ "name": name }))
            .await?;
        let response: ExperimentResponse = self
            .get("experiments/get", &[("experiment_id", created.experiment_id.as_str())])
            .await?;
        Ok(response.experiment.into())
    }

    async fn create_run(&self, experiment_id: &str) -> Result<RunRecord> {
        let response: RunResponse = self
            .post(
                "runs/create",
                &json!({
                    "experiment_id": experiment_id,
                    "start_time": Utc::now().timestamp_millis(),
                }),
            )
            .await?;
        Ok(response.run.into())
    }

    async fn set_tag(&self, run_id: &str, key: &str, value: &str) -> Result<()> {
        let _: Empty = self
            .post("runs/set-tag", &json!({ "run_id": run_id, "key": key, "value": value }))
            .await?;
        Ok(())
    }

    async fn log_param(&self, run_id: &str, key: &str, value: &str) -> Result<()> {
        let _: Empty = self
            .post(
                "runs/log-parameter",
                &json!({ "run_id": run_id, "key": key, "value": value }),
            )
            .await?;
        Ok(())
    }

    async fn log_metric(&self, run_id: &str, key: &str, value: f64, step: u64) -> Result<()> {
        let _: Empty = self
            .post(
                "runs/log-metric",
                &json!({
                    "run_id": run_id,
                    "key": key,
                    "value": value,
                    "timestamp": Utc::now().timestamp_millis(),
                    "step": step,
                }),
            )
            .await?;
        Ok(())
    }

    async fn log_artifact(&self, run_id: &str, path: &str, contents: Vec<u8>) -> Result<()> {
        let run = self.get_run(run_id).await?;
        let root = proxied_artifact_root(run.artifact_uri())?;
        let url = format!(
            "{}/{ARTIFACTS_API}/{}/{}",
            self.base_url,
            root.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        debug!(%url, bytes = contents.len(), "PUT artifact");
        let response = self.client.put(url).body(contents).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await?;
        Err(error_from_body(status, &body))
    }

    async fn end_run(&self, run_id: &str, status: RunStatus) -> Result<()> {
        let _: Empty = self
            .post(
                "runs/update",
                &json!({
                    "run_id": run_id,
                    "status": status_to_wire(status),
                    "end_time": Utc::now().timestamp_millis(),
                }),
            )
            .await?;
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<RunRecord> {
        let response: RunResponse = self.get("runs/get", &[("run_id", run_id)]).await?;
        Ok(response.run.into())
    }

    async fn search_runs(&self, query: &RunQuery) -> Result<Vec<RunRecord>> {
        let order_by: Vec<String> = query.order_by.iter().map(ToString::to_string).collect();
        let mut runs = Vec::new();
        let mut page_token: Option<String> = None;

        while runs.len() < query.max_results {
            let page_size = (query.max_results - runs.len()).min(MAX_PAGE_SIZE);
            let mut body = json!({
                "experiment_ids": query.experiment_ids,
                "order_by": order_by,
                "max_results": page_size,
                "run_view_type": query.view.as_str(),
            });
            if let Some(token) = &page_token {
                body["page_token"] = json!(token);
            }

            let page: SearchRunsResponse = self.post("runs/search", &body).await?;
            runs.extend(page.runs.into_iter().map(RunRecord::from));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        runs.truncate(query.max_results);
        Ok(runs)
    }

    async fn create_registered_model(&self, name: &str) -> Result<()> {
        let _: serde_json::Value = self
            .post("registered-models/create", &json!({ "name": name }))
            .await?;
        Ok(())
    }

    async fn get_latest_versions(&self, name: &str, stages: &[Stage]) -> Result<Vec<ModelVersion>> {
        let stages: Vec<&str> = stages.iter().map(|s| s.as_str()).collect();
        let response: LatestVersionsResponse = self
            .post(
                "registered-models/get-latest-versions",
                &json!({ "name": name, "stages": stages }),
            )
            .await?;
        response
            .model_versions
            .into_iter()
            .map(ModelVersion::try_from)
            .collect()
    }

    async fn create_model_version(
        &self,
        name: &str,
        source: &str,
        run_id: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<ModelVersion> {
        let tags: Vec<KeyValue> = tags
            .iter()
            .map(|(key, value)| KeyValue {
                key: key.clone(),
                value: value.clone(),
            })
            .collect();
        let response: ModelVersionResponse = self
            .post(
                "model-versions/create",
                &json!({ "name": name, "source": source, "run_id": run_id, "tags": tags }),
            )
            .await?;
        response.model_version.try_into()
    }

    async fn transition_model_version_stage(
        &self,
        name: &str,
        version: u64,
        stage: Stage,
    ) -> Result<ModelVersion> {
        let response: ModelVersionResponse = self
            .post(
                "model-versions/transition-stage",
                &json!({
                    "name": name,
                    "version": version.to_string(),
                    "stage": stage.as_str(),
                    "archive_existing_versions": false,
                }),
            )
            .await?;
        response.model_version.try_into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_narrow() {
        let body = r#"{"error_code":"RESOURCE_DOES_NOT_EXIST","message":"Registered Model with name=m not found"}"#;
        assert!(error_from_body(StatusCode::NOT_FOUND, body).is_not_found());

        let body = r#"{"error_code":"INTERNAL_ERROR","message":"db down"}"#;
        let err = error_from_body(StatusCode::INTERNAL_SERVER_ERROR, body);
        assert!(!err.is_not_found());
        assert!(matches!(err, Error::Tracking { ref code, .. } if code == "INTERNAL_ERROR"));
    }

    #[test]
    fn test_unparseable_error_body_keeps_status() {
        let err = error_from_body(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>");
        assert!(matches!(err, Error::Tracking { ref code, .. } if code == "502"));
    }

    #[test]
    fn test_already_exists_maps() {
        let body = r#"{"error_code":"RESOURCE_ALREADY_EXISTS","message":"exists"}"#;
        assert!(matches!(
            error_from_body(StatusCode::BAD_REQUEST, body),
            Error::AlreadyExists(_)
        ));
    }

    #[test]
    fn test_wire_run_decodes() {
        let body = r#"{
            "run": {
                "info": {
                    "run_id": "abc",
                    "experiment_id": "3",
                    "status": "FINISHED",
                    "start_time": 1700000000000,
                    "end_time": 1700000005000,
                    "artifact_uri": "mlflow-artifacts:/3/abc/artifacts",
                    "lifecycle_stage": "active"
                },
                "data": {
                    "metrics": [{"key": "test_rmse", "value": 4.5, "timestamp": 1, "step": 0}],
                    "params": [{"key": "max_depth", "value": "12"}],
                    "tags": [{"key": "model", "value": "xgboost-regressor"}]
                }
            }
        }"#;
        let response: RunResponse = serde_json::from_str(body).unwrap();
        let run = RunRecord::from(response.run);

        assert_eq!(run.run_id(), "abc");
        assert_eq!(run.status(), RunStatus::Success);
        assert_eq!(run.metric("test_rmse"), Some(4.5));
        assert_eq!(run.params().get("max_depth").map(String::as_str), Some("12"));
        assert_eq!(run.tag("model"), Some("xgboost-regressor"));
        assert_eq!(run.started_at().unwrap().timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_wire_run_without_data() {
        let body = r#"{"run": {"info": {"run_id": "r", "experiment_id": "0"}}}"#;
        let response: RunResponse = serde_json::from_str(body).unwrap();
        let run = RunRecord::from(response.run);
        assert!(run.metrics().is_empty());
        assert_eq!(run.status(), RunStatus::Running);
    }

    #[test]
    fn test_wire_model_version_decodes() {
        let body = r#"{"model_version": {
            "name": "nyc-bus-delay-predictor",
            "version": "7",
            "current_stage": "Production",
            "run_id": "abc",
            "source": "runs:/abc/model",
            "tags": [{"key": "model", "value": "random-forest-regressor"}]
        }}"#;
        let response: ModelVersionResponse = serde_json::from_str(body).unwrap();
        let version = ModelVersion::try_from(response.model_version).unwrap();
        assert_eq!(version.version(), 7);
        assert_eq!(version.stage(), Stage::Production);
        assert_eq!(version.tags().get("model").map(String::as_str), Some("random-forest-regressor"));
    }

    #[test]
    fn test_bad_model_version_number_is_error() {
        let wire = WireModelVersion {
            name: "m".to_string(),
            version: "seven".to_string(),
            current_stage: None,
            run_id: None,
            source: None,
            tags: Vec::new(),
        };
        assert!(ModelVersion::try_from(wire).is_err());
    }

    #[test]
    fn test_status_wire_names_round_trip() {
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Success,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            assert_eq!(status_from_wire(status_to_wire(status)), status);
        }
    }

    #[test]
    fn test_proxied_artifact_root() {
        assert_eq!(
            proxied_artifact_root("mlflow-artifacts:/3/abc/artifacts").unwrap(),
            "3/abc/artifacts"
        );
        assert!(proxied_artifact_root("s3://bucket/3/abc/artifacts").is_err());
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let client = RestTracking::new("http://127.0.0.1:5000/").unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:5000");
        assert_eq!(
            client.endpoint("runs/search"),
            "http://127.0.0.1:5000/api/2.0/mlflow/runs/search"
        );
    }
}
