//! Staged promotion: register a candidate run only if it beats the baseline.

use tracing::info;

use super::{ModelVersion, Stage};
use crate::experiment::RunRecord;
use crate::tracking::TrackingClient;
use crate::{Error, Result};

/// Metric compared between candidate and baseline. Lower is better.
pub const TEST_METRIC: &str = "test_rmse";

/// What the candidate is compared against.
#[derive(Debug, Clone, PartialEq)]
pub enum Baseline {
    /// Latest `Production` version and its run's test RMSE.
    Found {
        /// The version the candidate competes with.
        version: ModelVersion,
        /// `test_rmse` of the version's source run.
        test_rmse: f64,
    },
    /// No version in `Production`.
    Absent,
}

impl Baseline {
    /// Test RMSE of the baseline, if any.
    #[must_use]
    pub const fn test_rmse(&self) -> Option<f64> {
        match self {
            Self::Found { test_rmse, .. } => Some(*test_rmse),
            Self::Absent => None,
        }
    }
}

/// Find the latest `Production` version of `model_name` and its test RMSE.
///
/// A model that does not exist, or has no `Production` version, yields
/// [`Baseline::Absent`]. Any other failure of the registry lookup is
/// propagated rather than treated as "no baseline".
///
/// # Errors
///
/// - [`Error::MissingMetric`] if the baseline run has no `test_rmse`
/// - tracking service errors other than not-found
pub async fn lookup_baseline<C: TrackingClient>(client: &C, model_name: &str) -> Result<Baseline> {
    let versions = match client.get_latest_versions(model_name, &[Stage::Production]).await {
        Ok(versions) => versions,
        Err(err) if err.is_not_found() => return Ok(Baseline::Absent),
        Err(err) => return Err(err),
    };

    let Some(version) = versions.into_iter().max_by_key(ModelVersion::version) else {
        return Ok(Baseline::Absent);
    };

    let run = client.get_run(version.run_id()).await?;
    let test_rmse = run.metric(TEST_METRIC).ok_or_else(|| Error::MissingMetric {
        run_id: run.run_id().to_string(),
        key: TEST_METRIC.to_string(),
    })?;

    Ok(Baseline::Found { version, test_rmse })
}

/// Promotion rule: strictly better than the baseline, or no baseline at all.
#[must_use]
pub fn should_promote(candidate_rmse: f64, baseline: &Baseline) -> bool {
    match baseline {
        Baseline::Found { test_rmse, .. } => candidate_rmse < *test_rmse,
        Baseline::Absent => true,
    }
}

/// Register `run`'s model under `model_name` and move it to `Staging` if it
/// beats the current baseline.
///
/// Returns `true` if a new version was registered. On `false` the registry
/// is untouched.
///
/// # Errors
///
/// - [`Error::MissingMetric`] if `run` has no `test_rmse`
/// - any error from [`lookup_baseline`] or the registry calls
pub async fn register_model<C: TrackingClient>(
    client: &C,
    run: &RunRecord,
    model_name: &str,
) -> Result<bool> {
    let candidate = run.metric(TEST_METRIC).ok_or_else(|| Error::MissingMetric {
        run_id: run.run_id().to_string(),
        key: TEST_METRIC.to_string(),
    })?;

    let baseline = lookup_baseline(client, model_name).await?;
    if !should_promote(candidate, &baseline) {
        info!(
            model_name,
            run_id = run.run_id(),
            candidate,
            baseline = ?baseline.test_rmse(),
            "Candidate does not beat the production model"
        );
        return Ok(false);
    }

    match client.create_registered_model(model_name).await {
        Ok(()) | Err(Error::AlreadyExists(_)) => {}
        Err(err) => return Err(err),
    }

    let version = client
        .create_model_version(model_name, &run.model_uri(), run.run_id(), run.tags())
        .await?;
    let version = client
        .transition_model_version_stage(model_name, version.version(), Stage::Staging)
        .await?;

    info!(
        model_name,
        version = version.version(),
        run_id = run.run_id(),
        candidate,
        baseline = ?baseline.test_rmse(),
        "Registered new model version in Staging"
    );
    Ok(true)
}
