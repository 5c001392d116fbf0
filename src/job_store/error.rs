use thiserror::Error;

use crate::state_machine::TransitionError;

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("invalid transition: {0}")]
    Transition(#[from] TransitionError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, JobStoreError>;
