// ABOUTME: Subcommand implementations for the foreman binary
// ABOUTME: Wires the parser, graph builder, engine, and store together

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};

use crate::engine::{ExecutionEngine, ExecutionResult, ExecutionStatus, ProcessRunner, TargetRef};
use crate::graph::WorkflowGraph;
use crate::parser::Job;
use crate::serial::{SerialService, SerialTier};
use crate::store::MemoryStore;

use super::args::RunArgs;

pub async fn validate(path: &Path) -> anyhow::Result<()> {
    let job = Job::from_file(path)
        .await
        .with_context(|| format!("failed to parse {}", path.display()))?;
    let graph = WorkflowGraph::build(&job)?;

    println!("{}: OK ({} actions)", job.name, graph.order().len());
    for warning in graph.warnings() {
        println!("warning: {warning}");
    }
    Ok(())
}

pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let job = Job::from_file(&args.job)
        .await
        .with_context(|| format!("failed to parse {}", args.job.display()))?;

    if args.dry_run {
        let graph = WorkflowGraph::build(&job)?;
        println!("{}: {} actions", job.name, graph.order().len());
        for (position, action_id) in graph.order().iter().enumerate() {
            let kind = job
                .get_action(action_id)
                .map(|a| a.action_type())
                .unwrap_or("unknown");
            println!("  {}. {action_id} [{kind}]", position + 1);
        }
        for warning in graph.warnings() {
            println!("warning: {warning}");
        }
        return Ok(());
    }

    let targets = parse_targets(&args.targets);
    let overrides: HashMap<String, String> = args.vars.into_iter().collect();

    let engine = ExecutionEngine::new(
        SerialService::in_memory(),
        MemoryStore::shared(),
        Arc::new(ProcessRunner),
    );
    let result = engine.execute(job, targets, overrides).await?;

    print_report(&result);
    if let Some(path) = args.output {
        let report = serde_json::to_string_pretty(&result)?;
        tokio::fs::write(&path, report)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    match result.status {
        ExecutionStatus::Completed => Ok(()),
        status => bail!("execution {} finished {status}", result.serial),
    }
}

pub fn show(serial: &str) -> anyhow::Result<()> {
    let Some(tier) = SerialTier::detect(serial) else {
        bail!("'{serial}' is not a valid serial");
    };
    match tier {
        SerialTier::Job => println!("{serial}: job"),
        SerialTier::Execution => {
            let (job, _) = split_last(serial);
            println!("{serial}: execution of job {job}");
        }
        SerialTier::Branch => {
            let (execution, _) = split_last(serial);
            let (job, _) = split_last(execution);
            println!("{serial}: branch of execution {execution} (job {job})");
        }
        SerialTier::Target => println!("{serial}: target"),
    }
    Ok(())
}

fn split_last(serial: &str) -> (&str, &str) {
    serial.rsplit_once('.').unwrap_or((serial, ""))
}

fn parse_targets(specs: &[String]) -> Vec<TargetRef> {
    if specs.is_empty() {
        return vec![TargetRef::new("localhost", std::env::consts::OS)];
    }
    specs
        .iter()
        .map(|spec| match spec.split_once(':') {
            Some((host, os)) => TargetRef::new(host, os),
            None => TargetRef::new(spec.as_str(), std::env::consts::OS),
        })
        .collect()
}

fn print_report(result: &ExecutionResult) {
    println!(
        "execution {} [{}] - {}/{} branches completed",
        result.serial,
        result.status,
        result.summary.completed_branches,
        result.summary.total_branches
    );
    for branch in &result.branches {
        println!("  {} {} [{}]", branch.serial, branch.target.host, branch.status);
        for action in &branch.actions {
            let code = action
                .exit_code
                .map(|c| format!(" exit={c}"))
                .unwrap_or_default();
            println!("    {} [{}]{code}", action.action_id, action.status);
        }
        for warning in &branch.warnings {
            println!("    warning: {warning}");
        }
    }
}
