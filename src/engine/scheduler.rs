// ABOUTME: Dependency-gated branch scheduler: gating, retries, timeouts, parallel groups
// ABOUTME: One scheduler per branch; actions run sequentially except inside group waves

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{watch, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::condition;
use crate::context::BranchContext;
use crate::graph::{EdgeKind, WorkflowGraph};
use crate::parser::{ActionParams, ErrorStrategy, GroupParams, Job, JobAction, RequiredStatus};

use super::result::{ActionResult, BranchResult, BranchStatus, NodeStatus, TargetRef};
use super::runner::{resolve_params, ActionRunner, Dispatch};

/// Gate state of a pending action.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Gate {
    /// Every requirement is satisfied.
    Open,
    /// Some upstream is not terminal yet.
    Waiting,
    /// A requirement can never be satisfied.
    Blocked,
}

fn status_matches(required: RequiredStatus, actual: NodeStatus) -> bool {
    match required {
        RequiredStatus::Success => actual == NodeStatus::Success,
        RequiredStatus::Failure => actual == NodeStatus::Failed,
        RequiredStatus::Completed => {
            actual == NodeStatus::Success || actual == NodeStatus::Failed
        }
        RequiredStatus::Skipped => actual == NodeStatus::Skipped,
    }
}

fn is_unstarted(status: NodeStatus) -> bool {
    matches!(
        status,
        NodeStatus::Pending | NodeStatus::Gated | NodeStatus::Ready
    )
}

/// A member finishing in the background: its id, result, and the private
/// context snapshot it ran with.
type MemberOutcome = (String, ActionResult, BranchContext);
type MemberTasks = FuturesUnordered<BoxFuture<'static, MemberOutcome>>;

/// Executes one branch of an execution: the full action graph against a
/// single target, with its own private variable context.
#[derive(Clone)]
pub struct BranchScheduler {
    job: Arc<Job>,
    graph: Arc<WorkflowGraph>,
    runner: Arc<dyn ActionRunner>,
    serial: String,
    target: TargetRef,
    cancel: watch::Receiver<bool>,
}

impl BranchScheduler {
    pub fn new(
        job: Arc<Job>,
        graph: Arc<WorkflowGraph>,
        runner: Arc<dyn ActionRunner>,
        serial: String,
        target: TargetRef,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            job,
            graph,
            runner,
            serial,
            target,
            cancel,
        }
    }

    pub async fn run(mut self, mut ctx: BranchContext) -> BranchResult {
        let started_at = Utc::now();
        let deadline = self
            .job
            .settings
            .branch_timeout
            .map(|t| Instant::now() + t);

        info!(branch = %self.serial, target = %self.target.host, "branch started");

        // Rollback handlers are held out of normal scheduling.
        let mut handlers: HashMap<String, String> = HashMap::new();
        for (action_id, action) in &self.job.actions {
            if let Some(ref target) = action.rollback_for {
                handlers.insert(target.clone(), action_id.clone());
            }
        }

        let schedulable: Vec<String> = self
            .graph
            .order()
            .iter()
            .filter(|id| !handlers.values().any(|h| h == *id))
            .cloned()
            .collect();

        let mut statuses: HashMap<String, NodeStatus> = schedulable
            .iter()
            .map(|id| (id.clone(), NodeStatus::Pending))
            .collect();
        let mut results: HashMap<String, ActionResult> = HashMap::new();
        let mut completed_order: Vec<String> = Vec::new();
        let mut extra_results: Vec<ActionResult> = Vec::new();
        // Members of no-wait groups finishing in the background.
        let mut detached: MemberTasks = FuturesUnordered::new();
        let mut draining: HashMap<String, Arc<Semaphore>> = HashMap::new();
        let mut cancelled = false;
        let mut timed_out = false;

        loop {
            if *self.cancel.borrow() {
                cancelled = true;
                self.finish_remaining(
                    &schedulable,
                    &mut statuses,
                    &mut results,
                    NodeStatus::Cancelled,
                    "execution cancelled",
                );
                break;
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    timed_out = true;
                    self.finish_remaining(
                        &schedulable,
                        &mut statuses,
                        &mut results,
                        NodeStatus::Skipped,
                        "branch timed out",
                    );
                    break;
                }
            }

            // Refresh gate states: a node whose gate can never open is
            // skipped (possibly cascading), one with unfinished upstreams
            // is gated, and a satisfied one becomes ready.
            let mut cascaded = false;
            for id in &schedulable {
                let status = statuses[id];
                if status.is_terminal() || status == NodeStatus::Running {
                    continue;
                }
                match self.gate_state(id, &statuses) {
                    Gate::Blocked => {
                        self.skip_action(id, &mut statuses, &mut results, "dependency requirements cannot be satisfied");
                        cascaded = true;
                    }
                    Gate::Waiting => {
                        statuses.insert(id.clone(), NodeStatus::Gated);
                    }
                    Gate::Open => {
                        statuses.insert(id.clone(), NodeStatus::Ready);
                    }
                }
            }
            if cascaded {
                continue;
            }

            // Next ready action in declaration order. Group members are
            // dispatched by their group, not by the main loop.
            let next = schedulable
                .iter()
                .find(|id| {
                    statuses[*id] == NodeStatus::Ready && self.graph.group_of(id).is_none()
                })
                .cloned();

            let Some(action_id) = next else {
                // A background member may complete and open further gates.
                if let Some(outcome) = detached.next().await {
                    self.merge_member(
                        outcome,
                        &mut statuses,
                        &mut results,
                        &mut completed_order,
                        &mut ctx,
                        deadline,
                        &mut detached,
                        &mut draining,
                    );
                    continue;
                }
                // Anything still gated waits on an action that will never
                // run (e.g. a member of a group declared later that was
                // skipped). Treat as unreachable.
                let leftover: Vec<String> = schedulable
                    .iter()
                    .filter(|id| !statuses[*id].is_terminal())
                    .cloned()
                    .collect();
                for id in &leftover {
                    self.skip_action(id, &mut statuses, &mut results, "unreachable");
                }
                break;
            };

            let Some(action) = self.job.actions.get(&action_id).cloned() else {
                break;
            };

            let result = if let ActionParams::ParallelGroup(ref group) = action.params {
                self.run_group(
                    &action_id,
                    &action,
                    group,
                    &mut statuses,
                    &mut results,
                    &mut completed_order,
                    &mut ctx,
                    deadline,
                    &mut detached,
                    &mut draining,
                )
                .await
            } else {
                self.run_gated(&action_id, &action, &mut ctx, deadline).await
            };

            let status = result.status;
            statuses.insert(action_id.clone(), status);
            if status == NodeStatus::Success {
                completed_order.push(action_id.clone());
            }
            results.insert(action_id.clone(), result);

            match status {
                NodeStatus::Cancelled => {
                    cancelled = true;
                    self.finish_remaining(
                        &schedulable,
                        &mut statuses,
                        &mut results,
                        NodeStatus::Cancelled,
                        "execution cancelled",
                    );
                    break;
                }
                NodeStatus::Failed if !action.continue_on_error => {
                    match self.job.settings.error_strategy {
                        ErrorStrategy::Continue => {}
                        ErrorStrategy::Stop => {
                            self.finish_remaining(
                                &schedulable,
                                &mut statuses,
                                &mut results,
                                NodeStatus::Skipped,
                                "stopped after failure",
                            );
                            break;
                        }
                        ErrorStrategy::SkipRemaining => {
                            self.finish_remaining(
                                &schedulable,
                                &mut statuses,
                                &mut results,
                                NodeStatus::Skipped,
                                "skipped after failure",
                            );
                            break;
                        }
                        ErrorStrategy::Rollback => {
                            self.run_rollbacks(
                                &handlers,
                                &completed_order,
                                &mut extra_results,
                                &mut ctx,
                                deadline,
                            )
                            .await;
                            self.finish_remaining(
                                &schedulable,
                                &mut statuses,
                                &mut results,
                                NodeStatus::Skipped,
                                "skipped after rollback",
                            );
                            break;
                        }
                    }
                }
                _ => {}
            }

            if schedulable.iter().all(|id| statuses[id].is_terminal()) {
                break;
            }
        }

        // Members still draining when the branch settled report their real
        // results now, replacing any placeholder the shutdown path recorded.
        while let Some((id, result, mut member_ctx)) = detached.next().await {
            ctx.absorb_warnings(member_ctx.take_warnings());
            results.insert(id, result);
        }

        let mut actions: Vec<ActionResult> = self
            .graph
            .order()
            .iter()
            .filter_map(|id| results.remove(id))
            .collect();
        actions.extend(extra_results);

        // The `continue` strategy absorbs action failures branch-wide; a
        // branch timeout still fails the branch.
        let failed = self.job.settings.error_strategy != ErrorStrategy::Continue
            && actions.iter().any(|a| {
                a.status == NodeStatus::Failed
                    && !self
                        .job
                        .actions
                        .get(&a.action_id)
                        .map(|action| action.continue_on_error)
                        .unwrap_or(false)
            });

        let status = if cancelled {
            BranchStatus::Cancelled
        } else if timed_out || failed {
            BranchStatus::Failed
        } else {
            BranchStatus::Completed
        };

        info!(branch = %self.serial, %status, "branch finished");

        BranchResult {
            serial: self.serial,
            target: self.target,
            status,
            actions,
            warnings: ctx.take_warnings(),
            started_at,
            completed_at: Some(Utc::now()),
        }
    }

    fn gate_state(&self, action_id: &str, statuses: &HashMap<String, NodeStatus>) -> Gate {
        let mut waiting = false;
        for (source, kind) in self.graph.incoming(action_id) {
            let Some(&source_status) = statuses.get(&source) else {
                // Gated on a rollback handler; those only run during rollback.
                return Gate::Blocked;
            };
            match kind {
                EdgeKind::Member => match source_status {
                    NodeStatus::Running | NodeStatus::Success | NodeStatus::Failed => {}
                    NodeStatus::Skipped | NodeStatus::Cancelled => return Gate::Blocked,
                    _ => waiting = true,
                },
                EdgeKind::Requires(required) => {
                    if source_status.is_terminal() {
                        if !status_matches(required, source_status) {
                            return Gate::Blocked;
                        }
                    } else {
                        waiting = true;
                    }
                }
            }
        }
        if waiting {
            Gate::Waiting
        } else {
            Gate::Open
        }
    }

    fn skip_action(
        &self,
        action_id: &str,
        statuses: &mut HashMap<String, NodeStatus>,
        results: &mut HashMap<String, ActionResult>,
        reason: &str,
    ) {
        debug!(branch = %self.serial, action = action_id, reason, "action skipped");
        let action_type = self
            .job
            .actions
            .get(action_id)
            .map(|a| a.action_type())
            .unwrap_or("unknown");
        statuses.insert(action_id.to_string(), NodeStatus::Skipped);
        results.insert(
            action_id.to_string(),
            ActionResult::skipped(action_id, action_type, reason),
        );
    }

    fn finish_remaining(
        &self,
        schedulable: &[String],
        statuses: &mut HashMap<String, NodeStatus>,
        results: &mut HashMap<String, ActionResult>,
        status: NodeStatus,
        reason: &str,
    ) {
        for id in schedulable {
            if statuses[id].is_terminal() {
                continue;
            }
            let action_type = self
                .job
                .actions
                .get(id)
                .map(|a| a.action_type())
                .unwrap_or("unknown");
            let mut result = ActionResult::new(id.clone(), action_type);
            result.mark_terminal(status, Some(reason.to_string()));
            statuses.insert(id.clone(), status);
            results.insert(id.clone(), result);
        }
    }

    /// Evaluate conditions, then run the action with retries and timeouts.
    async fn run_gated(
        &self,
        action_id: &str,
        action: &JobAction,
        ctx: &mut BranchContext,
        deadline: Option<Instant>,
    ) -> ActionResult {
        match condition::evaluate(&action.conditions, ctx) {
            Ok(true) => {}
            Ok(false) => {
                debug!(branch = %self.serial, action = action_id, "conditions not met");
                return ActionResult::skipped(action_id, action.action_type(), "conditions not met");
            }
            Err(e) => {
                let mut result = ActionResult::new(action_id, action.action_type());
                result.mark_terminal(NodeStatus::Failed, Some(e.to_string()));
                return result;
            }
        }
        self.run_attempts(action_id, action, ctx, deadline).await
    }

    async fn run_attempts(
        &self,
        action_id: &str,
        action: &JobAction,
        ctx: &mut BranchContext,
        deadline: Option<Instant>,
    ) -> ActionResult {
        let policy = self.job.retry_policy_for(action);
        let action_timeout = self.job.timeout_for(action);
        let mut cancel = self.cancel.clone();

        let mut result = ActionResult::new(action_id, action.action_type());
        result.mark_started();

        for attempt in 1..=policy.count + 1 {
            if attempt > 1 {
                warn!(
                    branch = %self.serial,
                    action = action_id,
                    attempt,
                    "retrying after {:?}",
                    policy.delay
                );
                tokio::select! {
                    _ = tokio::time::sleep(policy.delay) => {}
                    _ = wait_cancelled(&mut cancel) => {
                        result.mark_terminal(NodeStatus::Cancelled, Some("execution cancelled".to_string()));
                        return result;
                    }
                }
                // Conditions are re-checked before every retry; if they no
                // longer hold the retry is abandoned.
                match condition::evaluate(&action.conditions, ctx) {
                    Ok(true) => {}
                    Ok(false) | Err(_) => break,
                }
            }
            result.attempts = attempt;

            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            if remaining == Some(Duration::ZERO) {
                result.mark_terminal(NodeStatus::Failed, Some("branch timed out".to_string()));
                return result;
            }
            let effective = match (action_timeout, remaining) {
                (Some(t), Some(r)) => Some(t.min(r)),
                (Some(t), None) => Some(t),
                (None, r) => r,
            };

            let dispatch = Dispatch {
                action_id: action_id.to_string(),
                params: resolve_params(&action.params, ctx),
                target: self.target.clone(),
                attempt,
            };

            let attempt_future = self.runner.dispatch(dispatch);
            let outcome = tokio::select! {
                outcome = run_with_timeout(attempt_future, effective) => outcome,
                _ = wait_cancelled(&mut cancel) => {
                    result.mark_terminal(NodeStatus::Cancelled, Some("execution cancelled".to_string()));
                    return result;
                }
            };

            match outcome {
                Ok(Ok(outcome)) => {
                    result.exit_code = outcome.exit_code;
                    result.output = Some(outcome.output.clone());
                    if outcome.succeeded {
                        result.mark_terminal(NodeStatus::Success, None);
                        ctx.record_result(action_id, outcome.exit_code.unwrap_or(0), outcome.output);
                        return result;
                    }
                    result.error = outcome.error;
                }
                Ok(Err(e)) => {
                    result.error = Some(e.to_string());
                }
                // Timed-out attempts count as failures and are retryable.
                Err(elapsed_after) => {
                    result.error = Some(format!(
                        "timed out after {}s",
                        elapsed_after.as_secs()
                    ));
                }
            }
        }

        let exit_code = result.exit_code.unwrap_or(-1);
        let output = result.output.clone().unwrap_or_default();
        result.mark_terminal(NodeStatus::Failed, result.error.clone());
        ctx.record_result(action_id, exit_code, output);
        result
    }

    /// Run a parallel group. With `wait_for_all` the members dispatch in
    /// waves, capped by the group's concurrency limit, and the group turns
    /// terminal once every member has. Without it the group turns terminal
    /// at the first member completion and the rest drain in the background.
    #[allow(clippy::too_many_arguments)]
    async fn run_group(
        &self,
        group_id: &str,
        group_action: &JobAction,
        group: &GroupParams,
        statuses: &mut HashMap<String, NodeStatus>,
        results: &mut HashMap<String, ActionResult>,
        completed_order: &mut Vec<String>,
        ctx: &mut BranchContext,
        deadline: Option<Instant>,
        detached: &mut MemberTasks,
        draining: &mut HashMap<String, Arc<Semaphore>>,
    ) -> ActionResult {
        match condition::evaluate(&group_action.conditions, ctx) {
            Ok(true) => {}
            Ok(false) => {
                return ActionResult::skipped(group_id, group_action.action_type(), "conditions not met");
            }
            Err(e) => {
                let mut result = ActionResult::new(group_id, group_action.action_type());
                result.mark_terminal(NodeStatus::Failed, Some(e.to_string()));
                return result;
            }
        }

        let mut group_result = ActionResult::new(group_id, group_action.action_type());
        group_result.mark_started();
        statuses.insert(group_id.to_string(), NodeStatus::Running);
        info!(
            branch = %self.serial,
            group = group_id,
            members = group.members.len(),
            max_concurrency = group.max_concurrency,
            wait_for_all = group.wait_for_all,
            "parallel group started"
        );

        let semaphore = Arc::new(Semaphore::new(group.max_concurrency));

        if !group.wait_for_all {
            draining.insert(group_id.to_string(), Arc::clone(&semaphore));
            self.spawn_ready_members(group, &semaphore, statuses, results, ctx, deadline, detached);

            loop {
                let running = group
                    .members
                    .iter()
                    .any(|id| statuses.get(id) == Some(&NodeStatus::Running));
                if !running {
                    break;
                }
                let Some(outcome) = detached.next().await else {
                    break;
                };
                let (member_id, member_status) = (outcome.0.clone(), outcome.1.status);
                self.merge_member(
                    outcome,
                    statuses,
                    results,
                    completed_order,
                    ctx,
                    deadline,
                    detached,
                    draining,
                );
                // The first member to complete decides the group; skipped
                // members do not count as completions.
                if group.members.contains(&member_id)
                    && matches!(member_status, NodeStatus::Success | NodeStatus::Failed)
                {
                    group_result.output =
                        Some(format!("first completed member: {member_id}"));
                    if member_status == NodeStatus::Success {
                        group_result.mark_terminal(NodeStatus::Success, None);
                    } else {
                        group_result.mark_terminal(
                            NodeStatus::Failed,
                            Some(format!("first completed member '{member_id}' failed")),
                        );
                    }
                    return group_result;
                }
            }

            draining.remove(group_id);
            group_result.mark_terminal(
                NodeStatus::Failed,
                Some("no members completed".to_string()),
            );
            return group_result;
        }

        loop {
            let ready: Vec<String> = group
                .members
                .iter()
                .filter(|id| {
                    statuses
                        .get(*id)
                        .copied()
                        .map(is_unstarted)
                        .unwrap_or(false)
                        && self.gate_state(id, statuses) == Gate::Open
                })
                .cloned()
                .collect();

            if ready.is_empty() {
                // Cascade inside the group, then bail once nothing can move.
                let mut cascaded = false;
                for id in &group.members {
                    if statuses
                        .get(id)
                        .copied()
                        .map(is_unstarted)
                        .unwrap_or(false)
                        && self.gate_state(id, statuses) == Gate::Blocked
                    {
                        self.skip_action(id, statuses, results, "dependency requirements cannot be satisfied");
                        cascaded = true;
                    }
                }
                if cascaded {
                    continue;
                }
                for id in &group.members {
                    if !statuses.get(id).map(|s| s.is_terminal()).unwrap_or(true) {
                        self.skip_action(id, statuses, results, "unreachable within group");
                    }
                }
                break;
            }

            let outcomes = {
                let wave = ready.iter().map(|id| {
                    let mut member_ctx = ctx.clone();
                    let semaphore = Arc::clone(&semaphore);
                    async move {
                        let _permit = semaphore.acquire().await.ok();
                        let result = match self.job.actions.get(id) {
                            Some(action) => {
                                self.run_gated(id, action, &mut member_ctx, deadline).await
                            }
                            None => ActionResult::skipped(id.clone(), "unknown", "undefined member"),
                        };
                        (id.clone(), result, member_ctx)
                    }
                });
                futures::future::join_all(wave).await
            };

            for (id, result, mut member_ctx) in outcomes {
                ctx.absorb_warnings(member_ctx.take_warnings());
                if let Some(recorded) = member_ctx.result_for(&id) {
                    ctx.record_result(&id, recorded.exit_code, recorded.output.clone());
                }
                let status = result.status;
                statuses.insert(id.clone(), status);
                if status == NodeStatus::Success {
                    completed_order.push(id.clone());
                }
                results.insert(id, result);
            }
        }

        let failed: Vec<&str> = group
            .members
            .iter()
            .filter(|id| {
                statuses.get(*id) == Some(&NodeStatus::Failed)
                    && !self
                        .job
                        .actions
                        .get(*id)
                        .map(|a| a.continue_on_error)
                        .unwrap_or(false)
            })
            .map(String::as_str)
            .collect();
        let succeeded = group
            .members
            .iter()
            .filter(|id| statuses.get(*id) == Some(&NodeStatus::Success))
            .count();

        group_result.output = Some(format!(
            "{succeeded}/{} members succeeded",
            group.members.len()
        ));
        if failed.is_empty() {
            group_result.mark_terminal(NodeStatus::Success, None);
        } else {
            group_result.mark_terminal(
                NodeStatus::Failed,
                Some(format!("failed members: {}", failed.join(", "))),
            );
        }
        group_result
    }

    /// Skip blocked members and spawn gate-open ones as background tasks,
    /// until the group can make no further immediate progress.
    #[allow(clippy::too_many_arguments)]
    fn spawn_ready_members(
        &self,
        group: &GroupParams,
        semaphore: &Arc<Semaphore>,
        statuses: &mut HashMap<String, NodeStatus>,
        results: &mut HashMap<String, ActionResult>,
        ctx: &BranchContext,
        deadline: Option<Instant>,
        detached: &mut MemberTasks,
    ) {
        loop {
            let mut changed = false;
            for id in &group.members {
                let Some(&status) = statuses.get(id) else {
                    continue;
                };
                if !is_unstarted(status) {
                    continue;
                }
                match self.gate_state(id, statuses) {
                    Gate::Blocked => {
                        self.skip_action(id, statuses, results, "dependency requirements cannot be satisfied");
                        changed = true;
                    }
                    Gate::Open => {
                        self.spawn_member(id, semaphore, ctx, deadline, detached);
                        statuses.insert(id.clone(), NodeStatus::Running);
                        changed = true;
                    }
                    Gate::Waiting => {}
                }
            }
            if !changed {
                break;
            }
        }
    }

    fn spawn_member(
        &self,
        member_id: &str,
        semaphore: &Arc<Semaphore>,
        ctx: &BranchContext,
        deadline: Option<Instant>,
        detached: &mut MemberTasks,
    ) {
        let task_id = member_id.to_string();
        let scheduler = self.clone();
        let action = self.job.actions.get(member_id).cloned();
        let mut member_ctx = ctx.clone();
        let semaphore = Arc::clone(semaphore);
        let handle = tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let result = match action {
                Some(action) => {
                    scheduler
                        .run_gated(&task_id, &action, &mut member_ctx, deadline)
                        .await
                }
                None => ActionResult::skipped(task_id.clone(), "unknown", "undefined member"),
            };
            (task_id, result, member_ctx)
        });

        let join_id = member_id.to_string();
        let fallback_ctx = ctx.clone();
        detached.push(Box::pin(async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let mut result = ActionResult::new(join_id.clone(), "unknown");
                    result.mark_terminal(NodeStatus::Failed, Some(e.to_string()));
                    (join_id, result, fallback_ctx)
                }
            }
        }));
    }

    /// Fold a background member's outcome into the branch state; a completed
    /// member may open gates for siblings still draining.
    #[allow(clippy::too_many_arguments)]
    fn merge_member(
        &self,
        outcome: MemberOutcome,
        statuses: &mut HashMap<String, NodeStatus>,
        results: &mut HashMap<String, ActionResult>,
        completed_order: &mut Vec<String>,
        ctx: &mut BranchContext,
        deadline: Option<Instant>,
        detached: &mut MemberTasks,
        draining: &mut HashMap<String, Arc<Semaphore>>,
    ) {
        let (id, result, mut member_ctx) = outcome;
        ctx.absorb_warnings(member_ctx.take_warnings());
        if let Some(recorded) = member_ctx.result_for(&id) {
            ctx.record_result(&id, recorded.exit_code, recorded.output.clone());
        }
        let status = result.status;
        statuses.insert(id.clone(), status);
        if status == NodeStatus::Success {
            completed_order.push(id.clone());
        }
        results.insert(id.clone(), result);

        let Some(group_id) = self.graph.group_of(&id).map(str::to_string) else {
            return;
        };
        let Some(semaphore) = draining.get(&group_id).cloned() else {
            return;
        };
        if let Some(action) = self.job.actions.get(&group_id) {
            if let ActionParams::ParallelGroup(ref group) = action.params {
                self.spawn_ready_members(
                    group, &semaphore, statuses, results, ctx, deadline, detached,
                );
                let done = group
                    .members
                    .iter()
                    .all(|m| statuses.get(m).map(|s| s.is_terminal()).unwrap_or(true));
                if done {
                    draining.remove(&group_id);
                }
            }
        }
    }

    /// Dispatch rollback handlers for successful actions in reverse
    /// completion order.
    async fn run_rollbacks(
        &self,
        handlers: &HashMap<String, String>,
        completed_order: &[String],
        extra_results: &mut Vec<ActionResult>,
        ctx: &mut BranchContext,
        deadline: Option<Instant>,
    ) {
        for action_id in completed_order.iter().rev() {
            let Some(handler_id) = handlers.get(action_id) else {
                continue;
            };
            let Some(handler) = self.job.actions.get(handler_id) else {
                continue;
            };
            info!(
                branch = %self.serial,
                action = %action_id,
                handler = %handler_id,
                "rolling back"
            );
            let result = self.run_gated(handler_id, handler, ctx, deadline).await;
            extra_results.push(result);
        }
    }
}

/// Resolves when the cancel flag flips to true; never resolves otherwise.
async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone; cancellation can no longer arrive.
            std::future::pending::<()>().await;
        }
    }
}

/// `timeout(None)` semantics: no limit. The error carries the elapsed limit.
async fn run_with_timeout<F, T>(
    future: F,
    limit: Option<Duration>,
) -> std::result::Result<T, Duration>
where
    F: std::future::Future<Output = T>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .map_err(|_| limit),
        None => Ok(future.await),
    }
}
