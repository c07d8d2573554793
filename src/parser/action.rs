// ABOUTME: Workflow action nodes: typed parameters, conditions, dependencies, retry policy
// ABOUTME: The action-type set is a closed tagged union with per-type schemas

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// One workflow node. The action id is the key of the job's `actions` map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAction {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(flatten)]
    pub params: ActionParams,
    #[serde(default)]
    pub depends_on: Vec<Dependency>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(alias = "retry")]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(with = "humantime_serde", default)]
    pub timeout: Option<Duration>,
    /// Marks this action as the rollback handler for another action. Rollback
    /// actions are held out of normal scheduling and dispatched only by the
    /// `rollback` error strategy.
    pub rollback_for: Option<String>,
}

impl JobAction {
    pub fn action_type(&self) -> &'static str {
        self.params.type_name()
    }

    pub fn is_parallel_group(&self) -> bool {
        matches!(self.params, ActionParams::ParallelGroup(_))
    }

    pub fn is_rollback(&self) -> bool {
        self.rollback_for.is_some()
    }
}

/// Per-type action parameters, tagged by `type` in the YAML definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionParams {
    Command(CommandParams),
    Script(ScriptParams),
    Http(HttpParams),
    Database(DatabaseParams),
    File(FileParams),
    Email(EmailParams),
    Condition(ConditionParams),
    ParallelGroup(GroupParams),
}

impl ActionParams {
    pub fn type_name(&self) -> &'static str {
        match self {
            ActionParams::Command(_) => "command",
            ActionParams::Script(_) => "script",
            ActionParams::Http(_) => "http",
            ActionParams::Database(_) => "database",
            ActionParams::File(_) => "file",
            ActionParams::Email(_) => "email",
            ActionParams::Condition(_) => "condition",
            ActionParams::ParallelGroup(_) => "parallel_group",
        }
    }

    /// Structural parameter checks that serde cannot express.
    pub fn validate(&self) -> std::result::Result<(), String> {
        match self {
            ActionParams::Command(p) => {
                if p.command.trim().is_empty() {
                    return Err("command cannot be empty".to_string());
                }
            }
            ActionParams::Script(p) => {
                if p.script.trim().is_empty() {
                    return Err("script cannot be empty".to_string());
                }
                if p.shell.trim().is_empty() {
                    return Err("shell interpreter cannot be empty".to_string());
                }
            }
            ActionParams::Http(p) => {
                if p.url.trim().is_empty() {
                    return Err("url cannot be empty".to_string());
                }
            }
            ActionParams::Database(p) => {
                if p.query.trim().is_empty() {
                    return Err("query cannot be empty".to_string());
                }
            }
            ActionParams::File(p) => {
                if p.path.trim().is_empty() {
                    return Err("path cannot be empty".to_string());
                }
                if matches!(p.operation, FileOperation::Copy | FileOperation::Move)
                    && p.destination.is_none()
                {
                    return Err("copy/move requires a destination".to_string());
                }
                if p.operation == FileOperation::Write && p.contents.is_none() {
                    return Err("write requires contents".to_string());
                }
            }
            ActionParams::Email(p) => {
                if p.to.is_empty() {
                    return Err("at least one recipient is required".to_string());
                }
            }
            ActionParams::Condition(_) => {}
            ActionParams::ParallelGroup(p) => {
                if p.members.is_empty() {
                    return Err("parallel group has no members".to_string());
                }
                if p.max_concurrency == 0 {
                    return Err("max_concurrency must be at least 1".to_string());
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandParams {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub working_dir: Option<String>,
    #[serde(default = "default_expected_exit_codes")]
    pub expected_exit_codes: Vec<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptParams {
    pub script: String,
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub working_dir: Option<String>,
    #[serde(default = "default_expected_exit_codes")]
    pub expected_exit_codes: Vec<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpParams {
    pub url: String,
    #[serde(default = "default_http_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    #[serde(default = "default_expected_status")]
    pub expected_status: Vec<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseParams {
    pub connection: String,
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileParams {
    pub operation: FileOperation,
    pub path: String,
    pub destination: Option<String>,
    pub contents: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOperation {
    Copy,
    Move,
    Delete,
    Write,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailParams {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// A pure gate node: succeeds immediately once its conditions hold.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConditionParams {}

/// Declares a set of member actions allowed to run concurrently. The graph
/// builder expands `members` into dependency edges; the scheduler consumes
/// the concurrency annotations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupParams {
    pub members: Vec<String>,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_wait_for_all")]
    pub wait_for_all: bool,
}

/// A required-status gate on another action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "DependencySpec")]
pub struct Dependency {
    pub action: String,
    pub status: RequiredStatus,
}

/// YAML accepts either a bare action id (requires `success`) or the full
/// `{action, status}` form.
#[derive(Deserialize)]
#[serde(untagged)]
enum DependencySpec {
    Short(String),
    Full {
        action: String,
        #[serde(default)]
        status: RequiredStatus,
    },
}

impl From<DependencySpec> for Dependency {
    fn from(spec: DependencySpec) -> Self {
        match spec {
            DependencySpec::Short(action) => Self {
                action,
                status: RequiredStatus::Success,
            },
            DependencySpec::Full { action, status } => Self { action, status },
        }
    }
}

impl Dependency {
    pub fn on_success(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            status: RequiredStatus::Success,
        }
    }

    pub fn with_status(action: impl Into<String>, status: RequiredStatus) -> Self {
        Self {
            action: action.into(),
            status,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredStatus {
    #[default]
    Success,
    Failure,
    Completed,
    Skipped,
}

impl fmt::Display for RequiredStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequiredStatus::Success => write!(f, "success"),
            RequiredStatus::Failure => write!(f, "failure"),
            RequiredStatus::Completed => write!(f, "completed"),
            RequiredStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// A runtime boolean gate over the resolved variable context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub variable: String,
    pub operator: Operator,
    pub value: String,
}

impl Condition {
    pub fn new(variable: impl Into<String>, operator: Operator, value: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            operator,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "matches")]
    Matches,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Eq => write!(f, "=="),
            Operator::Ne => write!(f, "!="),
            Operator::Gt => write!(f, ">"),
            Operator::Lt => write!(f, "<"),
            Operator::Contains => write!(f, "contains"),
            Operator::Matches => write!(f, "matches"),
        }
    }
}

/// Retry attempts after the initial one, spaced by `delay`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default)]
    pub count: u32,
    #[serde(with = "humantime_serde", default = "default_retry_delay")]
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            count: 0,
            delay: default_retry_delay(),
        }
    }
}

fn default_expected_exit_codes() -> Vec<i32> {
    vec![0]
}

fn default_shell() -> String {
    "/bin/bash".to_string()
}

fn default_http_method() -> String {
    "GET".to_string()
}

fn default_expected_status() -> Vec<u16> {
    vec![200]
}

fn default_max_concurrency() -> usize {
    4
}

fn default_wait_for_all() -> bool {
    true
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(10)
}
