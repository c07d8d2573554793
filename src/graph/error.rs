// ABOUTME: Validation errors raised while building a workflow graph
// ABOUTME: All of these reject the job before any execution record is created

use thiserror::Error;

use crate::condition::ConditionError;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Duplicate action id: '{action}'")]
    DuplicateAction { action: String },

    #[error("Action '{action}' depends on unknown action '{dependency}'")]
    MissingDependency { action: String, dependency: String },

    #[error("Circular dependency detected: {actions:?}")]
    CircularDependency { actions: Vec<String> },

    #[error("Malformed condition on action '{action}': {source}")]
    MalformedCondition {
        action: String,
        #[source]
        source: ConditionError,
    },

    #[error("Invalid parameters for action '{action}': {reason}")]
    InvalidParameters { action: String, reason: String },

    #[error("Action '{action}' names unknown rollback target '{target}'")]
    UnknownRollbackTarget { action: String, target: String },
}

pub type Result<T> = std::result::Result<T, ValidationError>;
