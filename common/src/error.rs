use thiserror::Error;
use tokio::task::JoinError;

/// Crate-wide error taxonomy. Variants correspond to the error kinds the
/// sync coordinator and its collaborators distinguish when deciding whether
/// to continue, skip, or abort a run.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Credential error: {0}")]
    Credential(String),
    #[error("Sync already running")]
    Conflict,
    #[error("Upstream error (transient): {0}")]
    UpstreamTransient(String),
    #[error("Upstream error (fatal): {0}")]
    UpstreamFatal(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Cancelled")]
    Cancelled,
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Whether a run should continue past this error (skip the current
    /// account/payer) rather than abort. Mirrors the taxonomy in the
    /// error-handling design: only transient upstream failures are skip-worthy.
    #[must_use]
    pub fn is_retryable_skip(&self) -> bool {
        matches!(self, AppError::UpstreamTransient(_))
    }
}
