//! Error taxonomy for summary generation.
//!
//! Each stage has its own error type; `GenerateError` gathers them for the
//! inbound trigger and maps every failure onto the status category reported to
//! the caller.

use thiserror::Error;

/// Rejections raised by the access gate, in precedence order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid anti-forgery token")]
    InvalidToken,

    #[error("Invalid content item")]
    InvalidTarget,
}

/// Failures talking to the external summarizer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExternalError {
    #[error("{0}")]
    Transport(String),
}

impl From<reqwest::Error> for ExternalError {
    fn from(error: reqwest::Error) -> Self {
        ExternalError::Transport(error.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("Error communicating with the summarization service: {0}")]
    ExternalService(#[from] ExternalError),

    #[error("Content item not found")]
    NotFound,
}

/// The storage collaborator failed; the message is the driver's own.
#[derive(Debug, Error)]
#[error("Storage error: {0}")]
pub struct StorageError(pub String);

impl From<sqlx::Error> for StorageError {
    fn from(error: sqlx::Error) -> Self {
        StorageError(error.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(error: serde_json::Error) -> Self {
        StorageError(format!("malformed stored value: {error}"))
    }
}

/// Any failure of the generate-summary trigger.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl GenerateError {
    /// HTTP status category for the failure.
    pub fn status_code(&self) -> u16 {
        match self {
            GenerateError::Auth(_) => 403,
            GenerateError::Pipeline(PipelineError::NotFound) => 404,
            GenerateError::Pipeline(PipelineError::ExternalService(_)) => 500,
            GenerateError::Storage(_) => 500,
        }
    }
}
