// ABOUTME: Job definition model and YAML parsing
// ABOUTME: A job is a named, versioned set of actions plus settings and declared variables

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::action::{JobAction, RetryPolicy};
use super::error::{ParserError, Result};

fn default_version() -> String {
    "1.0".to_string()
}

/// A reusable workflow definition. Action declaration order is preserved:
/// it determines execution order among simultaneously ready actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    pub description: Option<String>,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub variables: IndexMap<String, VariableDecl>,
    pub actions: IndexMap<String, JobAction>,
    #[serde(default)]
    pub settings: JobSettings,
}

/// A user-declared variable with a type and optional default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableDecl {
    #[serde(rename = "type", default)]
    pub var_type: VariableType,
    pub default: Option<serde_yaml::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    #[default]
    String,
    Number,
    Boolean,
    Json,
}

impl VariableDecl {
    /// Render the declared default into the string form the resolver uses.
    pub fn default_text(&self) -> Option<String> {
        self.default.as_ref().map(|value| match value {
            serde_yaml::Value::String(s) => s.clone(),
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::Bool(b) => b.to_string(),
            other => serde_json::to_string(&other).unwrap_or_default(),
        })
    }
}

/// Global execution settings for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSettings {
    #[serde(with = "humantime_serde", default)]
    pub default_timeout: Option<Duration>,
    pub default_retry: Option<RetryPolicy>,
    #[serde(default)]
    pub error_strategy: ErrorStrategy,
    #[serde(default)]
    pub aggregation: Aggregation,
    #[serde(with = "humantime_serde", default)]
    pub branch_timeout: Option<Duration>,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            default_timeout: None,
            default_retry: None,
            error_strategy: ErrorStrategy::Stop,
            aggregation: Aggregation::AnySuccess,
            branch_timeout: None,
        }
    }
}

/// What a branch does after an action exhausts its retries without
/// `continue_on_error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStrategy {
    #[default]
    Stop,
    Continue,
    SkipRemaining,
    Rollback,
}

/// How branch outcomes roll up into the execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    #[default]
    AnySuccess,
    AllSuccess,
}

impl Job {
    /// Parse a job definition from a YAML file.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_yaml(&content)
    }

    /// Parse a job definition from a YAML string.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut job: Job = serde_yaml::from_str(content)?;

        for (action_id, action) in &mut job.actions {
            if action.name.is_none() {
                action.name = Some(action_id.clone());
            }
        }

        job.validate_structure()?;
        Ok(job)
    }

    fn validate_structure(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ParserError::MissingField("name".to_string()));
        }
        if self.actions.is_empty() {
            return Err(ParserError::EmptyJob);
        }
        Ok(())
    }

    pub fn action_ids(&self) -> Vec<String> {
        self.actions.keys().cloned().collect()
    }

    pub fn get_action(&self, action_id: &str) -> Option<&JobAction> {
        self.actions.get(action_id)
    }

    /// Effective retry policy for an action: its own, the job default, or none.
    pub fn retry_policy_for(&self, action: &JobAction) -> RetryPolicy {
        action
            .retry_policy
            .clone()
            .or_else(|| self.settings.default_retry.clone())
            .unwrap_or_default()
    }

    /// Effective per-action timeout: the action's own or the job default.
    pub fn timeout_for(&self, action: &JobAction) -> Option<Duration> {
        action.timeout.or(self.settings.default_timeout)
    }

    /// Default values of declared variables, in string form.
    pub fn variable_defaults(&self) -> IndexMap<String, String> {
        self.variables
            .iter()
            .filter_map(|(name, decl)| decl.default_text().map(|text| (name.clone(), text)))
            .collect()
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
