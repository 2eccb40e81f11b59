use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Empty result: {0}")]
    EmptyResult(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Probe error: {0}")]
    Probe(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Messaging error: {0}")]
    Messaging(String),

    #[error("User {0} is not authorized")]
    Unauthorized(u64),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Cancelled by user")]
    Cancelled,
}

impl AppError {
    /// Whether this error ends a download as a user-visible failure.
    /// Everything else is absorbed by the pipeline.
    pub fn is_pipeline_failure(&self) -> bool {
        matches!(self, AppError::Network(_) | AppError::EmptyResult(_))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
