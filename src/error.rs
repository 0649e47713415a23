//! Error types for talent-pipeline.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    /// Names both the current and the requested state.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// A compare-and-set precondition did not hold (concurrent write).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("candidate {candidate} is already a member of process {process}")]
    AlreadyMember { process: String, candidate: String },

    #[error("illegal stage: {0}")]
    IllegalStage(String),

    #[error("process {id} is {state} and no longer accepts changes")]
    ProcessClosed { id: String, state: String },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
