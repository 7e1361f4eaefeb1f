//! Candidate evaluation: re-train the best search runs and pick a winner.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::experiment::RunRecord;
use crate::models::{rmse, ModelFamily, Regressor, MODEL_ARTIFACT, MODEL_TAG};
use crate::registry::TEST_METRIC;
use crate::search_space::ParamSet;
use crate::storage::{load_splits, DatasetSplits};
use crate::tracking::{ActiveRun, RunQuery, TrackingClient};
use crate::{Error, Result};

/// Metric the hyperparameter search ranks trials by.
pub const SEARCH_METRIC: &str = "rmse";

/// Ordering of the search runs: best search score first.
pub const SEARCH_ORDER: &str = "metrics.rmse ASC";

/// Ordering of the evaluation runs: best test score first.
pub const EVALUATION_ORDER: &str = "metrics.test_rmse ASC";

/// Metric logged on the validation split.
pub const VALIDATION_METRIC: &str = "validation_rmse";

/// Inputs of [`select_model`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionConfig {
    /// Directory holding the three split files.
    pub input_dir: PathBuf,
    /// How many of the best search runs to re-evaluate. At least 1.
    pub number_top_runs: usize,
    /// Experiment holding the hyperparameter search runs.
    pub hpo_experiment: String,
    /// Experiment the evaluation runs are written to.
    pub select_experiment: String,
    /// Target column of the split files.
    pub target_column: String,
}

/// Scores of one evaluated candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// RMSE on the validation split.
    pub validation_rmse: f64,
    /// RMSE on the test split.
    pub test_rmse: f64,
}

/// A search run resolved to something trainable.
struct Candidate {
    source_run_id: String,
    family: ModelFamily,
    params: ParamSet,
}

fn resolve(run: &RunRecord) -> Result<Candidate> {
    let family: ModelFamily = run
        .tag(MODEL_TAG)
        .ok_or_else(|| Error::UnknownModelFamily(String::new()))?
        .parse()?;
    let params = family.search_space().restore(run.params())?;
    Ok(Candidate {
        source_run_id: run.run_id().to_string(),
        family,
        params,
    })
}

/// Re-evaluate the `number_top_runs` best search runs and return the
/// evaluation run with the lowest test RMSE.
///
/// Splits are loaded and every candidate's family and params resolved
/// before the first run is created, so bad input fails without side
/// effects. A failing fit ends its run as `Failed` and aborts the selection.
///
/// # Errors
///
/// - [`Error::InvalidInput`] if `number_top_runs` is 0, or no evaluation run exists
/// - [`Error::StorageError`] for missing or unreadable splits
/// - [`Error::ExperimentNotFound`] if the search experiment does not exist
/// - [`Error::UnknownModelFamily`] / [`Error::InvalidParam`] for an unusable search run
/// - training and tracking service errors
pub async fn select_model<C: TrackingClient>(
    client: &C,
    config: &SelectionConfig,
) -> Result<RunRecord> {
    if config.number_top_runs < 1 {
        return Err(Error::InvalidInput(format!(
            "number_top_runs must be at least 1, got {}",
            config.number_top_runs
        )));
    }

    let splits = load_splits(&config.input_dir, &config.target_column)?;

    let select_experiment = client.set_experiment(&config.select_experiment).await?;
    let hpo_experiment = client
        .get_experiment_by_name(&config.hpo_experiment)
        .await?
        .ok_or_else(|| Error::ExperimentNotFound(config.hpo_experiment.clone()))?;

    let top_runs = client
        .search_runs(
            &RunQuery::experiment(hpo_experiment.experiment_id())
                .order_by_expr(SEARCH_ORDER)?
                .max_results(config.number_top_runs),
        )
        .await?;
    if top_runs.is_empty() {
        warn!(experiment = %config.hpo_experiment, "No search runs to evaluate");
    }

    let candidates = top_runs.iter().map(resolve).collect::<Result<Vec<_>>>()?;

    for (rank, candidate) in candidates.iter().enumerate() {
        info!(
            rank = rank + 1,
            source_run_id = %candidate.source_run_id,
            family = %candidate.family,
            "Evaluating candidate"
        );
        let evaluation =
            evaluate_candidate(client, select_experiment.experiment_id(), candidate, &splits)
                .await?;
        debug!(
            validation_rmse = evaluation.validation_rmse,
            test_rmse = evaluation.test_rmse,
            "Candidate evaluated"
        );
    }

    let best = client
        .search_runs(
            &RunQuery::experiment(select_experiment.experiment_id())
                .order_by_expr(EVALUATION_ORDER)?
                .max_results(1),
        )
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| {
            Error::InvalidInput(format!(
                "experiment {} has no evaluated runs",
                config.select_experiment
            ))
        })?;

    info!(
        run_id = best.run_id(),
        family = best.tag(MODEL_TAG).unwrap_or_default(),
        test_rmse = ?best.metric(TEST_METRIC),
        "Selected best candidate"
    );
    Ok(best)
}

/// Train one candidate inside a fresh run of `experiment_id`.
async fn evaluate_candidate<C: TrackingClient>(
    client: &C,
    experiment_id: &str,
    candidate: &Candidate,
    splits: &DatasetSplits,
) -> Result<Evaluation> {
    let run = ActiveRun::start(client, experiment_id).await?;

    let outcome = async {
        run.set_tag(MODEL_TAG, candidate.family.tag()).await?;
        run.log_params(&candidate.family.search_space().to_logged(&candidate.params))
            .await?;

        let model = candidate
            .family
            .fit(&candidate.params, &splits.train, &splits.validation)?;
        let evaluation = Evaluation {
            validation_rmse: rmse(
                &splits.validation.target,
                &model.predict(&splits.validation.features),
            ),
            test_rmse: rmse(&splits.test.target, &model.predict(&splits.test.features)),
        };

        run.log_metric(VALIDATION_METRIC, evaluation.validation_rmse).await?;
        run.log_metric(TEST_METRIC, evaluation.test_rmse).await?;
        run.log_artifact(MODEL_ARTIFACT, model.to_json()?).await?;
        Ok::<_, Error>(evaluation)
    }
    .await;

    run.finish(outcome).await
}
