// ABOUTME: Execution engine module: scheduler, runner dispatch, and result types
// ABOUTME: Entry point is ExecutionEngine; BranchScheduler does the per-target work

pub mod error;
pub mod executor;
pub mod result;
pub mod runner;
pub mod scheduler;

pub use error::{ExecutionError, Result};
pub use executor::{ExecutionEngine, ExecutionHandle};
pub use result::{
    ActionResult, BranchResult, BranchStatus, ExecutionResult, ExecutionStatus, ExecutionSummary,
    NodeStatus, TargetRef,
};
pub use runner::{ActionRunner, Dispatch, Outcome, ProcessRunner};
pub use scheduler::BranchScheduler;
