// ABOUTME: Action dispatch: the ActionRunner trait and the local ProcessRunner
// ABOUTME: Parameter strings are resolved against the branch context before dispatch

use std::io::Write;
use std::process::Stdio;

use async_trait::async_trait;
use tracing::debug;

use crate::context::BranchContext;
use crate::parser::{ActionParams, CommandParams, FileOperation, FileParams, ScriptParams};

use super::error::{ExecutionError, Result};
use super::result::TargetRef;

/// Everything a runner needs to perform one attempt of one action.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub action_id: String,
    pub params: ActionParams,
    pub target: TargetRef,
    /// 1-based attempt number; retries increment it.
    pub attempt: u32,
}

/// What came back from one attempt.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub succeeded: bool,
    pub exit_code: Option<i32>,
    pub output: String,
    pub error: Option<String>,
}

impl Outcome {
    pub fn success(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            exit_code: Some(exit_code),
            output: output.into(),
            error: None,
        }
    }

    pub fn failure(exit_code: Option<i32>, output: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            exit_code,
            output: output.into(),
            error: Some(error.into()),
        }
    }
}

/// Executes a single action attempt. The scheduler owns retries, timeouts,
/// and cancellation; implementations only run the action to completion.
#[async_trait]
pub trait ActionRunner: Send + Sync {
    async fn dispatch(&self, dispatch: Dispatch) -> Result<Outcome>;
}

/// Substitute `${NAME}` tokens in every string field of the parameters.
/// Warnings for unresolved names accumulate on the context.
pub fn resolve_params(params: &ActionParams, ctx: &mut BranchContext) -> ActionParams {
    let Ok(value) = serde_json::to_value(params) else {
        return params.clone();
    };
    let resolved = resolve_value(value, ctx);
    serde_json::from_value(resolved).unwrap_or_else(|_| params.clone())
}

fn resolve_value(value: serde_json::Value, ctx: &mut BranchContext) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => serde_json::Value::String(ctx.resolve(&s)),
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items.into_iter().map(|item| resolve_value(item, ctx)).collect(),
        ),
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter()
                .map(|(key, item)| (ctx.resolve(&key), resolve_value(item, ctx)))
                .collect(),
        ),
        other => other,
    }
}

/// Runs command, script, file, and condition actions as local processes and
/// filesystem operations.
pub struct ProcessRunner;

#[async_trait]
impl ActionRunner for ProcessRunner {
    async fn dispatch(&self, dispatch: Dispatch) -> Result<Outcome> {
        debug!(
            action = %dispatch.action_id,
            target = %dispatch.target.host,
            attempt = dispatch.attempt,
            "dispatching action"
        );
        match &dispatch.params {
            ActionParams::Command(params) => run_command(params).await,
            ActionParams::Script(params) => run_script(params).await,
            ActionParams::File(params) => run_file_op(params).await,
            // A pure gate node: reaching dispatch means its conditions held.
            ActionParams::Condition(_) => Ok(Outcome::success(0, "conditions satisfied")),
            other => Err(ExecutionError::UnsupportedAction {
                action_type: other.type_name().to_string(),
            }),
        }
    }
}

async fn run_command(params: &CommandParams) -> Result<Outcome> {
    let mut command = tokio::process::Command::new(&params.command);
    command
        .args(&params.args)
        .envs(&params.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = &params.working_dir {
        command.current_dir(dir);
    }

    let output = command.output().await?;
    Ok(classify_exit(&output, &params.expected_exit_codes))
}

async fn run_script(params: &ScriptParams) -> Result<Outcome> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(params.script.as_bytes())?;
    file.flush()?;

    let mut command = tokio::process::Command::new(&params.shell);
    command
        .arg(file.path())
        .envs(&params.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = &params.working_dir {
        command.current_dir(dir);
    }

    let output = command.output().await?;
    Ok(classify_exit(&output, &params.expected_exit_codes))
}

fn classify_exit(output: &std::process::Output, expected: &[i32]) -> Outcome {
    let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
    // Killed by signal leaves no exit code; treat as -1.
    let code = output.status.code().unwrap_or(-1);

    if expected.contains(&code) {
        Outcome::success(code, stdout)
    } else {
        let error = if stderr.is_empty() {
            format!("exit code {code} not in expected set {expected:?}")
        } else {
            stderr
        };
        Outcome::failure(Some(code), stdout, error)
    }
}

async fn run_file_op(params: &FileParams) -> Result<Outcome> {
    let outcome = match params.operation {
        FileOperation::Copy => match &params.destination {
            Some(dest) => tokio::fs::copy(&params.path, dest)
                .await
                .map(|_| format!("copied {} to {dest}", params.path)),
            None => return Err(ExecutionError::ActionFailed {
                action: params.path.clone(),
                reason: "copy requires a destination".to_string(),
            }),
        },
        FileOperation::Move => match &params.destination {
            Some(dest) => tokio::fs::rename(&params.path, dest)
                .await
                .map(|_| format!("moved {} to {dest}", params.path)),
            None => return Err(ExecutionError::ActionFailed {
                action: params.path.clone(),
                reason: "move requires a destination".to_string(),
            }),
        },
        FileOperation::Delete => tokio::fs::remove_file(&params.path)
            .await
            .map(|_| format!("deleted {}", params.path)),
        FileOperation::Write => {
            let contents = params.contents.clone().unwrap_or_default();
            tokio::fs::write(&params.path, contents)
                .await
                .map(|_| format!("wrote {}", params.path))
        }
    };

    Ok(match outcome {
        Ok(message) => Outcome::success(0, message),
        Err(e) => Outcome::failure(Some(1), "", e.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SystemVars;
    use chrono::Utc;
    use std::collections::HashMap;

    fn ctx() -> BranchContext {
        BranchContext::new(
            SystemVars {
                job_name: "job".to_string(),
                execution_id: "J202500001.0001".to_string(),
                target_host: "web-01".to_string(),
                target_os: "linux".to_string(),
                execution_time: Utc::now(),
            },
            HashMap::new(),
        )
    }

    fn dispatch_for(params: ActionParams) -> Dispatch {
        Dispatch {
            action_id: "test".to_string(),
            params,
            target: TargetRef::new("web-01", "linux"),
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn test_command_success() {
        let params = ActionParams::Command(CommandParams {
            command: "echo".to_string(),
            args: vec!["hello".to_string()],
            env: HashMap::new(),
            working_dir: None,
            expected_exit_codes: vec![0],
        });
        let outcome = ProcessRunner.dispatch(dispatch_for(params)).await.unwrap();
        assert!(outcome.succeeded);
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(outcome.output, "hello");
    }

    #[tokio::test]
    async fn test_command_unexpected_exit_code() {
        let params = ActionParams::Command(CommandParams {
            command: "false".to_string(),
            args: vec![],
            env: HashMap::new(),
            working_dir: None,
            expected_exit_codes: vec![0],
        });
        let outcome = ProcessRunner.dispatch(dispatch_for(params)).await.unwrap();
        assert!(!outcome.succeeded);
        assert_eq!(outcome.exit_code, Some(1));
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn test_nonzero_exit_code_can_be_expected() {
        let params = ActionParams::Command(CommandParams {
            command: "false".to_string(),
            args: vec![],
            env: HashMap::new(),
            working_dir: None,
            expected_exit_codes: vec![0, 1],
        });
        let outcome = ProcessRunner.dispatch(dispatch_for(params)).await.unwrap();
        assert!(outcome.succeeded);
    }

    #[tokio::test]
    async fn test_script_runs_under_shell() {
        let params = ActionParams::Script(ScriptParams {
            script: "echo one\necho two".to_string(),
            shell: "/bin/sh".to_string(),
            env: HashMap::new(),
            working_dir: None,
            expected_exit_codes: vec![0],
        });
        let outcome = ProcessRunner.dispatch(dispatch_for(params)).await.unwrap();
        assert!(outcome.succeeded);
        assert_eq!(outcome.output, "one\ntwo");
    }

    #[tokio::test]
    async fn test_file_write_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt").to_string_lossy().to_string();

        let write = ActionParams::File(FileParams {
            operation: FileOperation::Write,
            path: path.clone(),
            destination: None,
            contents: Some("hello".to_string()),
        });
        let outcome = ProcessRunner.dispatch(dispatch_for(write)).await.unwrap();
        assert!(outcome.succeeded);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");

        let delete = ActionParams::File(FileParams {
            operation: FileOperation::Delete,
            path: path.clone(),
            destination: None,
            contents: None,
        });
        let outcome = ProcessRunner.dispatch(dispatch_for(delete)).await.unwrap();
        assert!(outcome.succeeded);
        assert!(!std::path::Path::new(&path).exists());
    }

    #[tokio::test]
    async fn test_unsupported_action_type() {
        let params = ActionParams::Database(crate::parser::DatabaseParams {
            connection: "postgres://x".to_string(),
            query: "select 1".to_string(),
        });
        let err = ProcessRunner.dispatch(dispatch_for(params)).await.unwrap_err();
        assert!(matches!(err, ExecutionError::UnsupportedAction { .. }));
    }

    #[test]
    fn test_resolve_params_substitutes_strings() {
        let mut ctx = ctx();
        let params = ActionParams::Command(CommandParams {
            command: "deploy".to_string(),
            args: vec!["--host".to_string(), "${TARGET_HOST}".to_string()],
            env: HashMap::from([("JOB".to_string(), "${JOB_NAME}".to_string())]),
            working_dir: None,
            expected_exit_codes: vec![0],
        });
        let resolved = resolve_params(&params, &mut ctx);
        match resolved {
            ActionParams::Command(p) => {
                assert_eq!(p.args[1], "web-01");
                assert_eq!(p.env["JOB"], "job");
            }
            _ => panic!("expected command params"),
        }
    }

    #[test]
    fn test_resolve_params_leaves_unknown_tokens() {
        let mut ctx = ctx();
        let params = ActionParams::Command(CommandParams {
            command: "${MISSING}".to_string(),
            args: vec![],
            env: HashMap::new(),
            working_dir: None,
            expected_exit_codes: vec![0],
        });
        let resolved = resolve_params(&params, &mut ctx);
        match resolved {
            ActionParams::Command(p) => assert_eq!(p.command, "${MISSING}"),
            _ => panic!("expected command params"),
        }
        assert_eq!(ctx.warnings().len(), 1);
    }
}
