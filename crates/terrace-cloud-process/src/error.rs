//! Process provider error types

use terrace_cloud::CloudError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("provider command not found: {0}")]
    CommandNotFound(String),

    #[error("provider command failed ({status}): {stderr}")]
    CommandFailed { status: String, stderr: String },

    #[error("provider reported an error: {0}")]
    Reported(String),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProcessError>;

impl From<ProcessError> for CloudError {
    fn from(err: ProcessError) -> Self {
        CloudError::Provider(err.to_string())
    }
}
