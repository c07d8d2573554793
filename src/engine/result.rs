// ABOUTME: Status enums and result aggregates for actions, branches, and executions
// ABOUTME: These are the audit records the engine hands to the store and callers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-node scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Gated,
    Ready,
    Running,
    Success,
    Failed,
    Skipped,
    Cancelled,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeStatus::Success | NodeStatus::Failed | NodeStatus::Skipped | NodeStatus::Cancelled
        )
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Gated => "gated",
            NodeStatus::Ready => "ready",
            NodeStatus::Running => "running",
            NodeStatus::Success => "success",
            NodeStatus::Failed => "failed",
            NodeStatus::Skipped => "skipped",
            NodeStatus::Cancelled => "cancelled",
        };
        write!(f, "{text}")
    }
}

/// Outcome of one action on one branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub action_id: String,
    pub action_type: String,
    pub status: NodeStatus,
    pub exit_code: Option<i32>,
    pub output: Option<String>,
    pub error: Option<String>,
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ActionResult {
    pub fn new(action_id: impl Into<String>, action_type: impl Into<String>) -> Self {
        Self {
            action_id: action_id.into(),
            action_type: action_type.into(),
            status: NodeStatus::Pending,
            exit_code: None,
            output: None,
            error: None,
            attempts: 0,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn mark_started(&mut self) {
        self.status = NodeStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_terminal(&mut self, status: NodeStatus, error: Option<String>) {
        self.status = status;
        self.completed_at = Some(Utc::now());
        self.error = error;
    }

    pub fn skipped(action_id: impl Into<String>, action_type: impl Into<String>, reason: &str) -> Self {
        let mut result = Self::new(action_id, action_type);
        result.mark_terminal(NodeStatus::Skipped, Some(reason.to_string()));
        result
    }

    pub fn is_success(&self) -> bool {
        self.status == NodeStatus::Success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    Scheduled,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl BranchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BranchStatus::Completed | BranchStatus::Failed | BranchStatus::Cancelled
        )
    }
}

impl fmt::Display for BranchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            BranchStatus::Scheduled => "scheduled",
            BranchStatus::Running => "running",
            BranchStatus::Completed => "completed",
            BranchStatus::Failed => "failed",
            BranchStatus::Cancelled => "cancelled",
        };
        write!(f, "{text}")
    }
}

/// A target system a branch runs against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRef {
    pub host: String,
    pub os: String,
    /// Target serial (`T{YYYY}{NNNNN}`) when the target is registered.
    pub serial: Option<String>,
}

impl TargetRef {
    pub fn new(host: impl Into<String>, os: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            os: os.into(),
            serial: None,
        }
    }

    /// Stable reference string for store lookups: the serial when present,
    /// the host otherwise.
    pub fn reference(&self) -> &str {
        self.serial.as_deref().unwrap_or(&self.host)
    }
}

/// Result of one branch: the action graph executed against a single target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchResult {
    pub serial: String,
    pub target: TargetRef,
    pub status: BranchStatus,
    pub actions: Vec<ActionResult>,
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BranchResult {
    pub fn get_action(&self, action_id: &str) -> Option<&ActionResult> {
        self.actions.iter().find(|a| a.action_id == action_id)
    }

    pub fn succeeded(&self) -> bool {
        self.status == BranchStatus::Completed
    }

    /// The action result that determines the branch's recorded
    /// output/error/exit code: the first failure, or the last executed
    /// action otherwise.
    pub fn decisive_action(&self) -> Option<&ActionResult> {
        self.actions
            .iter()
            .find(|a| a.status == NodeStatus::Failed)
            .or_else(|| {
                self.actions
                    .iter()
                    .rev()
                    .find(|a| a.status.is_terminal() && a.exit_code.is_some())
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Scheduled,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ExecutionStatus::Scheduled => "scheduled",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        write!(f, "{text}")
    }
}

/// One invocation of a job against a set of targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub serial: String,
    pub job_name: String,
    pub status: ExecutionStatus,
    pub branches: Vec<BranchResult>,
    pub summary: ExecutionSummary,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub total_branches: usize,
    pub completed_branches: usize,
    pub failed_branches: usize,
    pub cancelled_branches: usize,
}

impl ExecutionSummary {
    pub fn from_branches(branches: &[BranchResult]) -> Self {
        Self {
            total_branches: branches.len(),
            completed_branches: branches
                .iter()
                .filter(|b| b.status == BranchStatus::Completed)
                .count(),
            failed_branches: branches
                .iter()
                .filter(|b| b.status == BranchStatus::Failed)
                .count(),
            cancelled_branches: branches
                .iter()
                .filter(|b| b.status == BranchStatus::Cancelled)
                .count(),
        }
    }
}

impl ExecutionResult {
    pub fn branch_for_target(&self, host: &str) -> Option<&BranchResult> {
        self.branches.iter().find(|b| b.target.host == host)
    }
}
