//! Layered configuration
//!
//! Priority (highest to lowest):
//! 1. Command-line flags (applied by the binary)
//! 2. Environment variables prefixed with `MLFLOW_` (`MLFLOW_TRACKING_URI`, ...)
//! 3. TOML file passed with `--config`
//! 4. Built-in defaults

use std::path::Path;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Prefix of the environment variables read into [`Config`].
pub const ENV_PREFIX: &str = "MLFLOW_";

/// Workflow configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tracking service: `http(s)://...`, `file:<dir>`, a directory, or `memory:`.
    pub tracking_uri: String,
    /// Experiment holding the hyperparameter search runs.
    pub hpo_experiment_name: String,
    /// Experiment the selection stage writes to.
    pub select_experiment_name: String,
    /// Registered model name.
    pub model_name: String,
    /// Experiment the training stage writes to.
    pub experiment_name: String,
    /// Target column of the split files.
    pub target_column: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tracking_uri: "http://127.0.0.1:5000".to_string(),
            hpo_experiment_name: "nyc-bus-delay-predictor-hpo".to_string(),
            select_experiment_name: "nyc-bus-delay-predictor-select".to_string(),
            model_name: "nyc-bus-delay-predictor".to_string(),
            experiment_name: "nyc-bus-delay-predictor".to_string(),
            target_column: "target".to_string(),
        }
    }
}

impl Config {
    /// Defaults, then `file` if given, then the environment.
    #[must_use]
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(file) = file {
            figment = figment.merge(Toml::file(file));
        }
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    /// Load the configuration.
    ///
    /// # Errors
    /// Returns [`Error::Config`](crate::Error::Config) if a source is malformed.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Ok(Self::figment(file).extract().map_err(Box::new)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .extract()
            .unwrap();
        assert_eq!(config.tracking_uri, "http://127.0.0.1:5000");
        assert_eq!(config.hpo_experiment_name, "nyc-bus-delay-predictor-hpo");
        assert_eq!(config.select_experiment_name, "nyc-bus-delay-predictor-select");
        assert_eq!(config.model_name, "nyc-bus-delay-predictor");
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::string(
                r#"
                tracking_uri = "file:/tmp/mlruns"
                model_name = "bus-delay"
                "#,
            ))
            .extract()
            .unwrap();
        assert_eq!(config.tracking_uri, "file:/tmp/mlruns");
        assert_eq!(config.model_name, "bus-delay");
        assert_eq!(config.target_column, "target");
    }

    #[test]
    fn test_config_file_is_read() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "select_experiment_name = \"select-v2\"").unwrap();

        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(file.path()))
            .extract()
            .unwrap();
        assert_eq!(config.select_experiment_name, "select-v2");
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("bus.toml", "model_name = [1, 2]")?;

            let err = Config::load(Some(Path::new("bus.toml"))).unwrap_err();
            assert!(matches!(err, crate::Error::Config(_)));
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "bus.toml",
                r#"
                tracking_uri = "file:/srv/mlruns"
                hpo_experiment_name = "hpo-from-file"
                select_experiment_name = "select-from-file"
                model_name = "model-from-file"
                target_column = "delay_minutes"
                "#,
            )?;
            jail.set_env("MLFLOW_TRACKING_URI", "http://tracking:5000");
            jail.set_env("MLFLOW_HPO_EXPERIMENT_NAME", "hpo-from-env");
            jail.set_env("MLFLOW_SELECT_EXPERIMENT_NAME", "select-from-env");
            jail.set_env("MLFLOW_MODEL_NAME", "model-from-env");

            let config: Config = Config::figment(Some(Path::new("bus.toml"))).extract()?;
            assert_eq!(config.tracking_uri, "http://tracking:5000");
            assert_eq!(config.hpo_experiment_name, "hpo-from-env");
            assert_eq!(config.select_experiment_name, "select-from-env");
            assert_eq!(config.model_name, "model-from-env");
            // Not set in the environment, so the file wins.
            assert_eq!(config.target_column, "delay_minutes");
            assert_eq!(config.experiment_name, "nyc-bus-delay-predictor");
            Ok(())
        });
    }

    #[test]
    fn test_env_without_file() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("MLFLOW_TRACKING_URI", "memory:");

            let config = Config::load(None).unwrap();
            assert_eq!(config.tracking_uri, "memory:");
            assert_eq!(config.model_name, "nyc-bus-delay-predictor");
            Ok(())
        });
    }
}
