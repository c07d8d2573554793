// ABOUTME: Per-branch variable context and ${NAME} substitution
// ABOUTME: Immutable system variables plus an append-only log of action results

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;

pub const VAR_JOB_NAME: &str = "JOB_NAME";
pub const VAR_EXECUTION_ID: &str = "EXECUTION_ID";
pub const VAR_TARGET_HOST: &str = "TARGET_HOST";
pub const VAR_TARGET_OS: &str = "TARGET_OS";
pub const VAR_EXECUTION_TIME: &str = "EXECUTION_TIME";
pub const VAR_PREVIOUS_EXIT_CODE: &str = "PREVIOUS_ACTION_EXIT_CODE";
pub const VAR_PREVIOUS_OUTPUT: &str = "PREVIOUS_ACTION_OUTPUT";

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap())
}

/// System variables injected at branch start.
#[derive(Debug, Clone)]
pub struct SystemVars {
    pub job_name: String,
    pub execution_id: String,
    pub target_host: String,
    pub target_os: String,
    pub execution_time: DateTime<Utc>,
}

/// One recorded action outcome. The log is append-only; the most recent
/// entry backs `PREVIOUS_ACTION_EXIT_CODE` / `PREVIOUS_ACTION_OUTPUT`.
#[derive(Debug, Clone)]
pub struct RecordedResult {
    pub action_id: String,
    pub exit_code: i32,
    pub output: String,
}

/// The variable context for a single branch. Contexts are never shared
/// across targets; each branch scheduler owns its own.
#[derive(Debug, Clone)]
pub struct BranchContext {
    system: HashMap<String, String>,
    variables: HashMap<String, String>,
    results: Vec<RecordedResult>,
    warnings: Vec<String>,
}

impl BranchContext {
    pub fn new(system: SystemVars, variables: HashMap<String, String>) -> Self {
        let mut map = HashMap::new();
        map.insert(VAR_JOB_NAME.to_string(), system.job_name);
        map.insert(VAR_EXECUTION_ID.to_string(), system.execution_id);
        map.insert(VAR_TARGET_HOST.to_string(), system.target_host);
        map.insert(VAR_TARGET_OS.to_string(), system.target_os);
        map.insert(
            VAR_EXECUTION_TIME.to_string(),
            system
                .execution_time
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        );

        Self {
            system: map,
            variables,
            results: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Append an action result. Subsequent `PREVIOUS_ACTION_*` reads resolve
    /// to this entry.
    pub fn record_result(
        &mut self,
        action_id: impl Into<String>,
        exit_code: i32,
        output: impl Into<String>,
    ) {
        self.results.push(RecordedResult {
            action_id: action_id.into(),
            exit_code,
            output: output.into(),
        });
    }

    /// Look up a single variable by name: previous-result variables first,
    /// then system variables, then user variables.
    pub fn lookup(&self, name: &str) -> Option<String> {
        match name {
            VAR_PREVIOUS_EXIT_CODE => self.results.last().map(|r| r.exit_code.to_string()),
            VAR_PREVIOUS_OUTPUT => self.results.last().map(|r| r.output.clone()),
            _ => self
                .system
                .get(name)
                .or_else(|| self.variables.get(name))
                .cloned(),
        }
    }

    /// Substitute every `${NAME}` token in `text`. Unresolved names are left
    /// verbatim and recorded as warnings; resolution never fails.
    pub fn resolve(&mut self, text: &str) -> String {
        let mut unresolved = Vec::new();
        let resolved = token_re()
            .replace_all(text, |caps: &regex::Captures<'_>| {
                let name = &caps[1];
                match self.lookup(name) {
                    Some(value) => value,
                    None => {
                        unresolved.push(name.to_string());
                        caps[0].to_string()
                    }
                }
            })
            .into_owned();

        for name in unresolved {
            let warning = format!("unresolved variable '${{{name}}}'");
            if !self.warnings.contains(&warning) {
                self.warnings.push(warning);
            }
        }
        resolved
    }

    pub fn last_result(&self) -> Option<&RecordedResult> {
        self.results.last()
    }

    pub fn result_for(&self, action_id: &str) -> Option<&RecordedResult> {
        self.results.iter().rev().find(|r| r.action_id == action_id)
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    /// Fold warnings collected on a clone (e.g. during concurrent parameter
    /// resolution) back into this context.
    pub fn absorb_warnings(&mut self, warnings: Vec<String>) {
        for warning in warnings {
            if !self.warnings.contains(&warning) {
                self.warnings.push(warning);
            }
        }
    }
}
