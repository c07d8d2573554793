// ABOUTME: Workflow graph construction and structural validation
// ABOUTME: Detects duplicates, missing dependencies, and cycles; flags unsatisfiable chains

pub mod error;

use std::collections::{HashMap, HashSet};

use petgraph::graph::{Graph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::condition;
use crate::parser::{ActionParams, Job, RequiredStatus};

pub use error::{Result, ValidationError};

/// Edge annotation in the action graph.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EdgeKind {
    /// Ordinary dependency: the target waits for the source to reach the
    /// required status.
    Requires(RequiredStatus),
    /// Parallel-group membership: the target may start once the group node
    /// has started.
    Member,
}

/// Validated action graph for one job. Node weights are action ids; the
/// declaration order of actions is preserved for deterministic scheduling.
#[derive(Debug)]
pub struct WorkflowGraph {
    graph: Graph<String, EdgeKind>,
    indices: HashMap<String, NodeIndex>,
    order: Vec<String>,
    group_of: HashMap<String, String>,
    warnings: Vec<String>,
}

impl WorkflowGraph {
    /// Build and validate the graph for a job. Validation order: duplicate
    /// ids, unknown dependencies, cycles, condition well-formedness,
    /// parameter checks. Unsatisfiable dependency chains are warnings.
    pub fn build(job: &Job) -> Result<Self> {
        let mut graph = Graph::new();
        let mut indices = HashMap::new();
        let mut order = Vec::new();

        let mut seen_names = HashSet::new();
        for (action_id, action) in &job.actions {
            let name = action.name.as_ref().unwrap_or(action_id);
            if !seen_names.insert(name.clone()) {
                return Err(ValidationError::DuplicateAction {
                    action: name.clone(),
                });
            }
            let index = graph.add_node(action_id.clone());
            indices.insert(action_id.clone(), index);
            order.push(action_id.clone());
        }

        // Dependency edges.
        for (action_id, action) in &job.actions {
            let target = indices[action_id];
            for dep in &action.depends_on {
                let source =
                    *indices
                        .get(&dep.action)
                        .ok_or_else(|| ValidationError::MissingDependency {
                            action: action_id.clone(),
                            dependency: dep.action.clone(),
                        })?;
                graph.add_edge(source, target, EdgeKind::Requires(dep.status));
            }
        }

        // Parallel-group membership expands into edges; the concurrency
        // annotations stay on the group's parameters.
        let mut group_of = HashMap::new();
        for (action_id, action) in &job.actions {
            if let ActionParams::ParallelGroup(ref group) = action.params {
                let source = indices[action_id];
                for member in &group.members {
                    let target = *indices.get(member).ok_or_else(|| {
                        ValidationError::MissingDependency {
                            action: action_id.clone(),
                            dependency: member.clone(),
                        }
                    })?;
                    graph.add_edge(source, target, EdgeKind::Member);
                    group_of.insert(member.clone(), action_id.clone());
                }
            }
        }

        // Rollback targets must exist.
        for (action_id, action) in &job.actions {
            if let Some(ref target) = action.rollback_for {
                if !indices.contains_key(target) {
                    return Err(ValidationError::UnknownRollbackTarget {
                        action: action_id.clone(),
                        target: target.clone(),
                    });
                }
            }
        }

        if let Some(cycle) = find_cycle(&graph) {
            return Err(ValidationError::CircularDependency { actions: cycle });
        }

        for (action_id, action) in &job.actions {
            for cond in &action.conditions {
                condition::validate(cond, &job.variables).map_err(|source| {
                    ValidationError::MalformedCondition {
                        action: action_id.clone(),
                        source,
                    }
                })?;
            }
            action
                .params
                .validate()
                .map_err(|reason| ValidationError::InvalidParameters {
                    action: action_id.clone(),
                    reason,
                })?;
        }

        let warnings = unsatisfiable_warnings(job, &graph, &indices, &order);

        Ok(Self {
            graph,
            indices,
            order,
            group_of,
            warnings,
        })
    }

    /// Action ids in declaration order.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Incoming gates of an action: `(source action id, edge kind)`.
    pub fn incoming(&self, action_id: &str) -> Vec<(String, EdgeKind)> {
        let Some(&index) = self.indices.get(action_id) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(index, Direction::Incoming)
            .map(|edge| {
                (
                    self.graph[edge.source()].clone(),
                    *edge.weight(),
                )
            })
            .collect()
    }

    /// Actions gated on this one.
    pub fn dependents(&self, action_id: &str) -> Vec<String> {
        let Some(&index) = self.indices.get(action_id) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(index, Direction::Outgoing)
            .map(|n| self.graph[n].clone())
            .collect()
    }

    /// The parallel group an action belongs to, if any.
    pub fn group_of(&self, action_id: &str) -> Option<&str> {
        self.group_of.get(action_id).map(String::as_str)
    }

    pub fn contains(&self, action_id: &str) -> bool {
        self.indices.contains_key(action_id)
    }
}

/// Depth-first search with an explicit recursion stack. On finding a back
/// edge, returns the full cycle (the stack suffix from the revisited node).
fn find_cycle(graph: &Graph<String, EdgeKind>) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let mut colors = vec![Color::White; graph.node_count()];
    let mut stack: Vec<NodeIndex> = Vec::new();

    fn visit(
        graph: &Graph<String, EdgeKind>,
        node: NodeIndex,
        colors: &mut Vec<Color>,
        stack: &mut Vec<NodeIndex>,
    ) -> Option<Vec<String>> {
        colors[node.index()] = Color::Gray;
        stack.push(node);

        for next in graph.neighbors_directed(node, Direction::Outgoing) {
            match colors[next.index()] {
                Color::Gray => {
                    let start = stack.iter().position(|&n| n == next).unwrap_or(0);
                    return Some(
                        stack[start..]
                            .iter()
                            .map(|&n| graph[n].clone())
                            .collect(),
                    );
                }
                Color::White => {
                    if let Some(cycle) = visit(graph, next, colors, stack) {
                        return Some(cycle);
                    }
                }
                Color::Black => {}
            }
        }

        stack.pop();
        colors[node.index()] = Color::Black;
        None
    }

    for node in graph.node_indices() {
        if colors[node.index()] == Color::White {
            if let Some(cycle) = visit(graph, node, &mut colors, &mut stack) {
                return Some(cycle);
            }
        }
    }
    None
}

/// Flag actions whose gates can never open: contradictory requirements on
/// the same upstream action, or a `success` requirement on an action that
/// itself can never run. These stay warnings; rare-failure-path branches
/// are legitimate workflow design.
fn unsatisfiable_warnings(
    job: &Job,
    graph: &Graph<String, EdgeKind>,
    indices: &HashMap<String, NodeIndex>,
    order: &[String],
) -> Vec<String> {
    let mut can_run: HashMap<&str, bool> = HashMap::new();

    // The graph is acyclic here, and `order` includes every node, so a
    // fixpoint over repeated passes converges quickly.
    for _ in 0..order.len() {
        let mut changed = false;
        for action_id in order {
            let index = indices[action_id];
            let mut satisfiable = true;

            let mut success_reqs: HashSet<&str> = HashSet::new();
            let mut failure_reqs: HashSet<&str> = HashSet::new();

            for edge in graph.edges_directed(index, Direction::Incoming) {
                let source: &str = &graph[edge.source()];
                match edge.weight() {
                    EdgeKind::Member => {
                        if !can_run.get(source).copied().unwrap_or(true) {
                            satisfiable = false;
                        }
                    }
                    EdgeKind::Requires(RequiredStatus::Success) => {
                        success_reqs.insert(source);
                        if !can_run.get(source).copied().unwrap_or(true) {
                            satisfiable = false;
                        }
                    }
                    EdgeKind::Requires(RequiredStatus::Failure) => {
                        failure_reqs.insert(source);
                    }
                    EdgeKind::Requires(_) => {}
                }
            }

            if success_reqs.intersection(&failure_reqs).next().is_some() {
                satisfiable = false;
            }

            let previous = can_run.insert(action_id.as_str(), satisfiable);
            if previous != Some(satisfiable) {
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    order
        .iter()
        .filter(|id| !can_run.get(id.as_str()).copied().unwrap_or(true))
        .filter(|id| !job.actions[id.as_str()].is_rollback())
        .map(|id| format!("action '{id}' is gated behind a dependency chain that can never be satisfied"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Job;

    fn job_from(yaml: &str) -> Job {
        Job::from_yaml(yaml).unwrap()
    }

    #[test]
    fn test_simple_graph_builds() {
        let job = job_from(
            r#"
name: fan-out
actions:
  a:
    type: command
    command: "true"
  b:
    type: command
    command: "true"
    depends_on: [a]
  c:
    type: command
    command: "true"
    depends_on: [a]
"#,
        );
        let graph = WorkflowGraph::build(&job).unwrap();
        assert_eq!(graph.order(), &["a", "b", "c"]);
        assert_eq!(graph.dependents("a").len(), 2);
        assert!(graph.warnings().is_empty());
    }

    #[test]
    fn test_missing_dependency_rejected() {
        let job = job_from(
            r#"
name: dangling
actions:
  a:
    type: command
    command: "true"
    depends_on: [ghost]
"#,
        );
        let err = WorkflowGraph::build(&job).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::MissingDependency { ref dependency, .. } if dependency == "ghost"
        ));
    }

    #[test]
    fn test_cycle_reported_with_all_members() {
        let job = job_from(
            r#"
name: loop
actions:
  a:
    type: command
    command: "true"
    depends_on: [c]
  b:
    type: command
    command: "true"
    depends_on: [a]
  c:
    type: command
    command: "true"
    depends_on: [b]
"#,
        );
        let err = WorkflowGraph::build(&job).unwrap_err();
        match err {
            ValidationError::CircularDependency { mut actions } => {
                actions.sort();
                assert_eq!(actions, vec!["a", "b", "c"]);
            }
            other => panic!("expected CircularDependency, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let job = job_from(
            r#"
name: selfie
actions:
  a:
    type: command
    command: "true"
    depends_on: [a]
"#,
        );
        let err = WorkflowGraph::build(&job).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::CircularDependency { ref actions } if actions == &["a"]
        ));
    }

    #[test]
    fn test_malformed_condition_rejected_at_build() {
        let job = job_from(
            r#"
name: bad-cond
actions:
  a:
    type: command
    command: "true"
    conditions:
      - variable: TARGET_OS
        operator: ">"
        value: banana
"#,
        );
        let err = WorkflowGraph::build(&job).unwrap_err();
        assert!(matches!(err, ValidationError::MalformedCondition { .. }));
    }

    #[test]
    fn test_group_membership_expands_to_edges() {
        let job = job_from(
            r#"
name: grouped
actions:
  fan:
    type: parallel_group
    members: [x, y]
    max_concurrency: 2
  x:
    type: command
    command: "true"
  y:
    type: command
    command: "true"
"#,
        );
        let graph = WorkflowGraph::build(&job).unwrap();
        assert_eq!(graph.group_of("x"), Some("fan"));
        assert_eq!(graph.group_of("y"), Some("fan"));
        let incoming = graph.incoming("x");
        assert_eq!(incoming, vec![("fan".to_string(), EdgeKind::Member)]);
    }

    #[test]
    fn test_contradictory_requirements_warn() {
        let job = job_from(
            r#"
name: contradiction
actions:
  a:
    type: command
    command: "true"
  impossible:
    type: command
    command: "true"
    depends_on:
      - action: a
        status: success
      - action: a
        status: failure
  downstream:
    type: command
    command: "true"
    depends_on: [impossible]
"#,
        );
        let graph = WorkflowGraph::build(&job).unwrap();
        // Both the contradictory node and its success-dependent are flagged.
        assert_eq!(graph.warnings().len(), 2);
        assert!(graph.warnings()[0].contains("impossible"));
    }

    #[test]
    fn test_failure_path_branches_do_not_warn() {
        let job = job_from(
            r#"
name: cleanup-on-failure
actions:
  deploy:
    type: command
    command: "true"
  cleanup:
    type: command
    command: "true"
    depends_on:
      - action: deploy
        status: failure
"#,
        );
        let graph = WorkflowGraph::build(&job).unwrap();
        assert!(graph.warnings().is_empty());
    }
}
