//! bus-delay-mlops: train, select and promote bus-delay regressors.

use std::path::PathBuf;

use anyhow::Context;
use bus_delay_mlops::config::Config;
use bus_delay_mlops::pipeline::{
    run_search, select_model, SearchConfig, SelectionConfig, DEFAULT_MAX_EVALS, SEARCH_SEED,
};
use bus_delay_mlops::registry::register_model;
use bus_delay_mlops::tracking::Tracking;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Model selection and staged promotion for the bus-delay predictor
#[derive(Parser, Debug)]
#[command(name = "bus-delay-mlops", version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Tracking service URI (overrides config and MLFLOW_TRACKING_URI)
    #[arg(long, global = true)]
    tracking_uri: Option<String>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Random hyperparameter search over every model family
    Train {
        /// Directory with train.parquet and validation.parquet
        #[arg(long = "input_dir", visible_alias = "input-dir")]
        input_dir: PathBuf,
        /// Trials per model family
        #[arg(
            long = "max_evals",
            visible_alias = "max-evals",
            default_value_t = DEFAULT_MAX_EVALS as u64,
            value_parser = clap::value_parser!(u64).range(1..)
        )]
        max_evals: u64,
    },
    /// Re-evaluate the best search runs and promote the winner to Staging
    Select {
        /// Directory with the train, validation and test splits
        #[arg(long = "input_dir", visible_alias = "input-dir")]
        input_dir: PathBuf,
        /// Number of top search runs to evaluate
        #[arg(
            long = "number_top_runs",
            visible_alias = "number-top-runs",
            default_value_t = 5,
            value_parser = clap::value_parser!(u64).range(1..)
        )]
        number_top_runs: u64,
    },
}

fn init_tracing(verbose: u8) {
    let default_filter = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(filter);

    tracing_subscriber::registry().with(stderr_layer).init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = Config::load(cli.config.as_deref()).context("Configuration error")?;
    if let Some(uri) = cli.tracking_uri {
        config.tracking_uri = uri;
    }

    let client = Tracking::from_uri(&config.tracking_uri)
        .await
        .with_context(|| format!("cannot open tracking service {}", config.tracking_uri))?;

    match cli.command {
        Commands::Train {
            input_dir,
            max_evals,
        } => {
            let search = SearchConfig {
                input_dir,
                max_evals: usize::try_from(max_evals)?,
                experiment: config.experiment_name,
                target_column: config.target_column,
                seed: SEARCH_SEED,
            };
            let trials = run_search(&client, &search).await?;
            println!("logged {} trials to {}", trials.len(), search.experiment);
        }
        Commands::Select {
            input_dir,
            number_top_runs,
        } => {
            let selection = SelectionConfig {
                input_dir,
                number_top_runs: usize::try_from(number_top_runs)?,
                hpo_experiment: config.hpo_experiment_name,
                select_experiment: config.select_experiment_name,
                target_column: config.target_column,
            };
            let best = select_model(&client, &selection).await?;
            let updated = register_model(&client, &best, &config.model_name).await?;
            if updated {
                println!("model {} updated", config.model_name);
            } else {
                println!("model {} not updated", config.model_name);
            }
        }
    }

    Ok(())
}
