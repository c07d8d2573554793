// ABOUTME: Integration tests for job parsing and graph validation
// ABOUTME: Full YAML definitions through Job::from_yaml and WorkflowGraph::build

use foreman::graph::{ValidationError, WorkflowGraph};
use foreman::parser::Job;

#[test]
fn test_full_definition_validates() {
    let job = Job::from_yaml(
        r#"
name: release
description: Release pipeline
version: "2.1"

variables:
  env:
    type: string
    default: production

settings:
  default_timeout: 5m
  error_strategy: rollback

actions:
  build:
    type: script
    script: ./build.sh
  tests:
    type: parallel_group
    members: [unit, lint]
    max_concurrency: 2
    depends_on: [build]
  unit:
    type: command
    command: cargo
    args: [test]
  lint:
    type: command
    command: cargo
    args: [clippy]
  publish:
    type: command
    command: ./publish.sh
    depends_on: [tests]
    conditions:
      - variable: env
        operator: "=="
        value: production
  unpublish:
    type: command
    command: ./unpublish.sh
    rollback_for: publish
"#,
    )
    .unwrap();

    let graph = WorkflowGraph::build(&job).unwrap();
    assert_eq!(graph.order().len(), 6);
    assert_eq!(graph.group_of("unit"), Some("tests"));
    assert!(graph.warnings().is_empty());
}

#[test]
fn test_unknown_rollback_target_rejected() {
    let job = Job::from_yaml(
        r#"
name: bad-rollback
actions:
  a:
    type: command
    command: "true"
  undo:
    type: command
    command: "true"
    rollback_for: ghost
"#,
    )
    .unwrap();
    assert!(matches!(
        WorkflowGraph::build(&job).unwrap_err(),
        ValidationError::UnknownRollbackTarget { .. }
    ));
}

#[test]
fn test_group_with_unknown_member_rejected() {
    let job = Job::from_yaml(
        r#"
name: bad-group
actions:
  fan:
    type: parallel_group
    members: [ghost]
"#,
    )
    .unwrap();
    assert!(matches!(
        WorkflowGraph::build(&job).unwrap_err(),
        ValidationError::MissingDependency { .. }
    ));
}

#[test]
fn test_cycle_through_group_membership_rejected() {
    // The group depends on one of its own members.
    let job = Job::from_yaml(
        r#"
name: group-loop
actions:
  fan:
    type: parallel_group
    members: [m]
    depends_on: [m]
  m:
    type: command
    command: "true"
"#,
    )
    .unwrap();
    assert!(matches!(
        WorkflowGraph::build(&job).unwrap_err(),
        ValidationError::CircularDependency { .. }
    ));
}

#[test]
fn test_numeric_operator_on_string_variable_rejected() {
    let job = Job::from_yaml(
        r#"
name: bad-compare
variables:
  env:
    type: string
    default: production
actions:
  a:
    type: command
    command: "true"
    conditions:
      - variable: env
        operator: ">"
        value: "5"
"#,
    )
    .unwrap();
    assert!(matches!(
        WorkflowGraph::build(&job).unwrap_err(),
        ValidationError::MalformedCondition { .. }
    ));
}

#[test]
fn test_invalid_regex_condition_rejected() {
    let job = Job::from_yaml(
        r#"
name: bad-regex
actions:
  a:
    type: command
    command: "true"
    conditions:
      - variable: TARGET_OS
        operator: matches
        value: "([unclosed"
"#,
    )
    .unwrap();
    assert!(matches!(
        WorkflowGraph::build(&job).unwrap_err(),
        ValidationError::MalformedCondition { .. }
    ));
}

#[test]
fn test_empty_command_rejected() {
    let job = Job::from_yaml(
        r#"
name: blank
actions:
  a:
    type: command
    command: "  "
"#,
    )
    .unwrap();
    assert!(matches!(
        WorkflowGraph::build(&job).unwrap_err(),
        ValidationError::InvalidParameters { .. }
    ));
}
