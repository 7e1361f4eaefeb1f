//! Hyperparameter search: seeded random search over each family's space.
//!
//! Every trial is one run tagged with its family, carrying the sampled
//! params and the validation RMSE as metric `rmse`. The selection stage
//! ranks these runs.

use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use super::select::SEARCH_METRIC;
use crate::models::{rmse, ModelFamily, Regressor, MODEL_ARTIFACT, MODEL_TAG};
use crate::storage::{load_training_splits, Split};
use crate::tracking::{ActiveRun, TrackingClient};
use crate::{Error, Result};

/// Trials per family unless configured otherwise.
pub const DEFAULT_MAX_EVALS: usize = 10;

/// Seed of the parameter sampler.
pub const SEARCH_SEED: u64 = 42;

/// Inputs of [`run_search`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchConfig {
    /// Directory holding the split files.
    pub input_dir: PathBuf,
    /// Trials per family.
    pub max_evals: usize,
    /// Experiment the trial runs are written to.
    pub experiment: String,
    /// Target column of the split files.
    pub target_column: String,
    /// Sampler seed.
    pub seed: u64,
}

/// Outcome of one trial.
#[derive(Debug, Clone, PartialEq)]
pub struct Trial {
    /// Run that recorded the trial.
    pub run_id: String,
    /// Family trained.
    pub family: ModelFamily,
    /// Validation RMSE.
    pub rmse: f64,
}

/// Run `max_evals` trials for every family, in [`ModelFamily::ALL`] order.
///
/// # Errors
///
/// - [`Error::InvalidInput`] if `max_evals` is 0
/// - [`Error::StorageError`] for missing or unreadable splits
/// - training and tracking service errors (the failing trial's run is
///   ended as `Failed`)
pub async fn run_search<C: TrackingClient>(client: &C, config: &SearchConfig) -> Result<Vec<Trial>> {
    if config.max_evals == 0 {
        return Err(Error::InvalidInput("max_evals must be at least 1".to_string()));
    }

    let (train, validation) = load_training_splits(&config.input_dir, &config.target_column)?;
    let experiment = client.set_experiment(&config.experiment).await?;

    let mut trials = Vec::with_capacity(config.max_evals * ModelFamily::ALL.len());
    for family in ModelFamily::ALL {
        // Each family gets its own stream so adding trials to one does not
        // change the other's samples.
        let mut rng = StdRng::seed_from_u64(config.seed);
        for _ in 0..config.max_evals {
            let trial = run_trial(
                client,
                experiment.experiment_id(),
                family,
                &mut rng,
                &train,
                &validation,
            )
            .await?;
            info!(run_id = %trial.run_id, family = %family, rmse = trial.rmse, "Trial finished");
            trials.push(trial);
        }
    }

    if let Some(best) = trials.iter().min_by(|a, b| a.rmse.total_cmp(&b.rmse)) {
        info!(run_id = %best.run_id, family = %best.family, rmse = best.rmse, "Best trial");
    }
    Ok(trials)
}

async fn run_trial<C: TrackingClient>(
    client: &C,
    experiment_id: &str,
    family: ModelFamily,
    rng: &mut StdRng,
    train: &Split,
    validation: &Split,
) -> Result<Trial> {
    let space = family.search_space();
    let params = space.sample(rng);
    let run = ActiveRun::start(client, experiment_id).await?;
    let run_id = run.run_id().to_string();

    let outcome = async {
        run.set_tag(MODEL_TAG, family.tag()).await?;
        run.log_params(&space.to_logged(&params)).await?;

        let model = family.fit(&params, train, validation)?;
        let score = rmse(&validation.target, &model.predict(&validation.features));

        run.log_metric(SEARCH_METRIC, score).await?;
        run.log_artifact(MODEL_ARTIFACT, model.to_json()?).await?;
        Ok::<_, Error>(score)
    }
    .await;

    let score = run.finish(outcome).await?;
    Ok(Trial {
        run_id,
        family,
        rmse: score,
    })
}
