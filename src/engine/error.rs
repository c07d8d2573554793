// ABOUTME: Engine error types covering validation, dispatch, and record persistence
// ABOUTME: Serial exhaustion and validation failures abort before any record exists

use thiserror::Error;

use crate::condition::ConditionError;
use crate::graph::ValidationError;
use crate::serial::SerialError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Job validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Serial allocation failed: {0}")]
    Serial(#[from] SerialError),

    #[error("Record store error: {0}")]
    Store(#[from] StoreError),

    #[error("Action '{action}' failed: {reason}")]
    ActionFailed { action: String, reason: String },

    #[error("Action '{action}' timed out after {seconds}s")]
    ActionTimeout { action: String, seconds: u64 },

    #[error("Action type '{action_type}' is not supported by this runner")]
    UnsupportedAction { action_type: String },

    #[error("An execution needs at least one target")]
    NoTargets,

    #[error("Condition evaluation failed: {0}")]
    Evaluation(#[from] ConditionError),

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Branch task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ExecutionError>;
