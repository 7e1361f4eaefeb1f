//! Error types for bus-delay-mlops
//!
//! Only [`Error::NotFound`] is ever recovered by the workflow (it means "no
//! production baseline"). Every other variant is fatal and propagates.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// bus-delay-mlops error types
#[derive(Error, Debug)]
pub enum Error {
    /// Run tagged with a model family this crate cannot train
    #[error("Unknown model family tag: {0:?}\nExpected one of: xgboost-regressor, random-forest-regressor")]
    UnknownModelFamily(String),

    /// Logged hyperparameter cannot be restored through the search space
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParam {
        /// Parameter name
        name: String,
        /// Why the logged value was rejected
        reason: String,
    },

    /// Caller supplied an invalid argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A run lacks a metric the workflow compares on
    #[error("Run {run_id} has no metric {key:?}")]
    MissingMetric {
        /// Run identifier
        run_id: String,
        /// Metric key
        key: String,
    },

    /// Experiment name does not resolve to an experiment
    #[error("Experiment not found: {0}")]
    ExperimentNotFound(String),

    /// Tracking service reported a missing resource (RESOURCE_DOES_NOT_EXIST)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Tracking service reported a duplicate resource (RESOURCE_ALREADY_EXISTS)
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// Any other tracking service failure
    #[error("Tracking service error {code}: {message}")]
    Tracking {
        /// Service error code (e.g. `INVALID_PARAMETER_VALUE`) or HTTP status
        code: String,
        /// Service message
        message: String,
    },

    /// Registry stage change not allowed by the stage state machine
    #[error("Invalid stage transition for {name} v{version}: {from} -> {to}")]
    InvalidTransition {
        /// Registered model name
        name: String,
        /// Model version
        version: u64,
        /// Current stage
        from: String,
        /// Requested stage
        to: String,
    },

    /// order_by clause parse error
    #[error("SQL parse error: {0}")]
    ParseError(String),

    /// Storage error (Parquet/Arrow)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Model fitting failed
    #[error("Training failed: {0}")]
    Training(String),

    /// Configuration could not be assembled
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow/Parquet error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this is the registry's "not found" signal.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
