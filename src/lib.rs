// ABOUTME: foreman: a job workflow execution engine with hierarchical serials
// ABOUTME: Jobs parse from YAML, validate into a graph, and execute per target branch

pub mod cli;
pub mod condition;
pub mod context;
pub mod engine;
pub mod graph;
pub mod parser;
pub mod serial;
pub mod store;

pub use engine::{ExecutionEngine, ExecutionResult, ProcessRunner, TargetRef};
pub use graph::WorkflowGraph;
pub use parser::Job;
pub use serial::SerialService;
pub use store::MemoryStore;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
