// ABOUTME: Execution engine: validates the job, reserves serials, fans out branches
// ABOUTME: No record is created until the workflow graph has validated cleanly

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::context::{BranchContext, SystemVars};
use crate::graph::WorkflowGraph;
use crate::parser::{Aggregation, Job};
use crate::serial::{JobSerial, SerialService};
use crate::store::{BranchRecord, ExecutionRecord, JobRecord, RecordStore, TargetRecord};

use super::error::{ExecutionError, Result};
use super::result::{
    BranchStatus, ExecutionResult, ExecutionStatus, ExecutionSummary, TargetRef,
};
use super::runner::ActionRunner;
use super::scheduler::BranchScheduler;

/// Orchestrates executions: one engine instance serves many jobs.
pub struct ExecutionEngine {
    serials: SerialService,
    store: Arc<dyn RecordStore>,
    runner: Arc<dyn ActionRunner>,
}

/// A started execution: its serial, a cancel switch, and the running task.
pub struct ExecutionHandle {
    pub serial: String,
    cancel: watch::Sender<bool>,
    task: JoinHandle<Result<ExecutionResult>>,
}

impl ExecutionHandle {
    /// Flip the cancel flag. Running actions finish their current attempt;
    /// everything else is marked cancelled.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    pub async fn wait(self) -> Result<ExecutionResult> {
        self.task.await?
    }
}

impl ExecutionEngine {
    pub fn new(
        serials: SerialService,
        store: Arc<dyn RecordStore>,
        runner: Arc<dyn ActionRunner>,
    ) -> Self {
        Self {
            serials,
            store,
            runner,
        }
    }

    /// Register a job definition and issue its serial.
    pub async fn register_job(&self, job: &Job) -> Result<JobRecord> {
        let serial = self.serials.new_job_serial().await?;
        let mut record = JobRecord::new(serial.to_string(), &job.name, &job.version);
        record.description = job.description.clone();
        record.settings = job.settings.clone();
        record.actions = job.actions.clone();
        self.store.create_job(record.clone()).await?;
        info!(job = %job.name, serial = %record.serial, "job registered");
        Ok(record)
    }

    /// Register a target system and issue its serial.
    pub async fn register_target(&self, host: &str, os: &str) -> Result<TargetRecord> {
        let serial = self.serials.new_target_serial().await?;
        let record = TargetRecord::new(serial.to_string(), host, os);
        self.store.create_target(record.clone()).await?;
        Ok(record)
    }

    /// Run a job to completion against a set of targets.
    pub async fn execute(
        &self,
        job: Job,
        targets: Vec<TargetRef>,
        overrides: HashMap<String, String>,
    ) -> Result<ExecutionResult> {
        self.start(job, targets, overrides).await?.wait().await
    }

    /// Validate, reserve serials, create records, and launch the execution.
    /// Returns once every branch record exists; the work itself runs on the
    /// handle's task.
    pub async fn start(
        &self,
        job: Job,
        targets: Vec<TargetRef>,
        overrides: HashMap<String, String>,
    ) -> Result<ExecutionHandle> {
        if targets.is_empty() {
            return Err(ExecutionError::NoTargets);
        }

        // Validation comes first: a job that fails to validate leaves no
        // trace in the store.
        let graph = Arc::new(WorkflowGraph::build(&job)?);
        for warning in graph.warnings() {
            tracing::warn!(job = %job.name, "{warning}");
        }

        let job_serial = self.job_serial_for(&job).await?;
        let execution_serial = self.serials.new_execution_serial(&job_serial).await?;

        let execution_record = ExecutionRecord::new(
            execution_serial.to_string(),
            job_serial.to_string(),
            &job.name,
        );
        self.store.create_execution(execution_record.clone()).await?;

        let mut branches = Vec::with_capacity(targets.len());
        for target in targets {
            let serial = self.serials.new_branch_serial(&execution_serial).await?;
            let mut record =
                BranchRecord::new(serial.to_string(), execution_serial.to_string(), &target.host, &target.os);
            record.target_serial = target.serial.clone();
            self.store.create_branch(record).await?;
            branches.push((serial.to_string(), target));
        }

        info!(
            execution = %execution_serial,
            job = %job.name,
            branches = branches.len(),
            "execution scheduled"
        );

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let serial = execution_serial.to_string();
        let driver = Driver {
            job: Arc::new(job),
            graph,
            runner: Arc::clone(&self.runner),
            store: Arc::clone(&self.store),
            execution_record,
            overrides,
            cancel: cancel_rx,
        };
        let task = tokio::spawn(driver.run(branches));

        Ok(ExecutionHandle {
            serial,
            cancel: cancel_tx,
            task,
        })
    }

    /// The serial of the registered job with this name, auto-registering on
    /// first use.
    async fn job_serial_for(&self, job: &Job) -> Result<JobSerial> {
        for record in self.store.list_jobs().await? {
            if record.active && record.name == job.name {
                return Ok(record.serial.parse()?);
            }
        }
        let record = self.register_job(job).await?;
        Ok(record.serial.parse()?)
    }
}

struct Driver {
    job: Arc<Job>,
    graph: Arc<WorkflowGraph>,
    runner: Arc<dyn ActionRunner>,
    store: Arc<dyn RecordStore>,
    execution_record: ExecutionRecord,
    overrides: HashMap<String, String>,
    cancel: watch::Receiver<bool>,
}

impl Driver {
    async fn run(mut self, branches: Vec<(String, TargetRef)>) -> Result<ExecutionResult> {
        let started_at = self.execution_record.started_at;
        self.execution_record.status = ExecutionStatus::Running;
        self.store.update_execution(self.execution_record.clone()).await?;

        let mut variables: HashMap<String, String> = self
            .job
            .variable_defaults()
            .into_iter()
            .collect();
        variables.extend(self.overrides.clone());

        let mut tasks = Vec::with_capacity(branches.len());
        for (serial, target) in branches {
            let ctx = BranchContext::new(
                SystemVars {
                    job_name: self.job.name.clone(),
                    execution_id: self.execution_record.serial.clone(),
                    target_host: target.host.clone(),
                    target_os: target.os.clone(),
                    execution_time: Utc::now(),
                },
                variables.clone(),
            );
            let scheduler = BranchScheduler::new(
                Arc::clone(&self.job),
                Arc::clone(&self.graph),
                Arc::clone(&self.runner),
                serial.clone(),
                target,
                self.cancel.clone(),
            );
            let store = Arc::clone(&self.store);
            tasks.push(tokio::spawn(async move {
                if let Ok(mut record) = store.get_branch(&serial).await {
                    record.status = BranchStatus::Running;
                    if let Err(e) = store.update_branch(record).await {
                        error!(branch = %serial, "failed to persist branch start: {e}");
                    }
                }
                let result = scheduler.run(ctx).await;
                if let Ok(mut record) = store.get_branch(&result.serial).await {
                    record.status = result.status;
                    record.completed_at = result.completed_at;
                    if let Some(decisive) = result.decisive_action() {
                        record.exit_code = decisive.exit_code;
                        record.output = decisive.output.clone();
                        record.error = decisive.error.clone();
                    }
                    if let Err(e) = store.update_branch(record).await {
                        error!(branch = %result.serial, "failed to persist branch result: {e}");
                    }
                }
                result
            }));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            results.push(task.await?);
        }

        let status = aggregate_status(self.job.settings.aggregation, &results);
        self.execution_record.status = status;
        self.execution_record.completed_at = Some(Utc::now());
        self.store.update_execution(self.execution_record.clone()).await?;

        info!(execution = %self.execution_record.serial, %status, "execution finished");

        let summary = ExecutionSummary::from_branches(&results);
        Ok(ExecutionResult {
            serial: self.execution_record.serial,
            job_name: self.execution_record.job_name,
            status,
            branches: results,
            summary,
            started_at,
            completed_at: self.execution_record.completed_at,
        })
    }
}

fn aggregate_status(
    aggregation: Aggregation,
    branches: &[super::result::BranchResult],
) -> ExecutionStatus {
    if branches.iter().any(|b| b.status == BranchStatus::Cancelled) {
        return ExecutionStatus::Cancelled;
    }
    let completed = branches
        .iter()
        .filter(|b| b.status == BranchStatus::Completed)
        .count();
    let success = match aggregation {
        Aggregation::AnySuccess => completed > 0,
        Aggregation::AllSuccess => completed == branches.len(),
    };
    if success {
        ExecutionStatus::Completed
    } else {
        ExecutionStatus::Failed
    }
}
