use crate::types::SubjectId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Malformed input for subject '{subject_id}': {reason}")]
    MalformedInput { subject_id: SubjectId, reason: String },

    #[error("Subject '{subject_id}' not found")]
    SubjectNotFound { subject_id: SubjectId },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig { reason: reason.into() }
    }

    pub fn malformed(subject_id: &str, reason: impl Into<String>) -> Self {
        Self::MalformedInput {
            subject_id: subject_id.to_string(),
            reason:     reason.into(),
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
