// ABOUTME: Job definition parsing module
// ABOUTME: Exposes the job/action data model and YAML parsing entry points

pub mod action;
pub mod error;
pub mod job;

pub use action::{
    ActionParams, CommandParams, Condition, ConditionParams, DatabaseParams, Dependency,
    EmailParams, FileOperation, FileParams, GroupParams, HttpParams, JobAction, Operator,
    RequiredStatus, RetryPolicy, ScriptParams,
};
pub use error::{ParserError, Result};
pub use job::{Aggregation, ErrorStrategy, Job, JobSettings, VariableDecl, VariableType};
