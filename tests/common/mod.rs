// ABOUTME: Shared test harness: a scripted runner and engine construction helpers
// ABOUTME: Behaviors key on "action" or "action@host" so targets can diverge

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use foreman::engine::{ActionRunner, Dispatch, ExecutionEngine, Outcome, TargetRef};
use foreman::serial::SerialService;
use foreman::store::{MemoryStore, RecordStore};

/// What the scripted runner should do for an action.
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed { output: String },
    Fail { exit_code: i32 },
    /// Fail the first `failures` attempts, then succeed.
    FailTimes { failures: u32 },
    /// Sleep, then succeed. Used for timeout and concurrency tests.
    Sleep { millis: u64 },
}

#[derive(Debug, Clone)]
pub struct DispatchRecord {
    pub action_id: String,
    pub host: String,
    pub attempt: u32,
    pub params: foreman::parser::ActionParams,
    /// When the dispatch arrived, for ordering/overlap assertions.
    pub at: Instant,
}

/// An ActionRunner driven by a behavior table instead of real processes.
/// Tracks every dispatch and the peak number of concurrent dispatches.
pub struct ScriptedRunner {
    behaviors: HashMap<String, Behavior>,
    pub log: Mutex<Vec<DispatchRecord>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self {
            behaviors: HashMap::new(),
            log: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    /// Script an action, optionally per target via `action@host`.
    pub fn on(mut self, key: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(key.to_string(), behavior);
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub async fn dispatches_for(&self, action_id: &str) -> Vec<DispatchRecord> {
        self.log
            .lock()
            .await
            .iter()
            .filter(|r| r.action_id == action_id)
            .cloned()
            .collect()
    }

    fn behavior_for(&self, dispatch: &Dispatch) -> Behavior {
        let per_target = format!("{}@{}", dispatch.action_id, dispatch.target.host);
        self.behaviors
            .get(&per_target)
            .or_else(|| self.behaviors.get(&dispatch.action_id))
            .cloned()
            .unwrap_or(Behavior::Succeed {
                output: "ok".to_string(),
            })
    }
}

#[async_trait]
impl ActionRunner for ScriptedRunner {
    async fn dispatch(&self, dispatch: Dispatch) -> foreman::engine::Result<Outcome> {
        self.log.lock().await.push(DispatchRecord {
            action_id: dispatch.action_id.clone(),
            host: dispatch.target.host.clone(),
            attempt: dispatch.attempt,
            params: dispatch.params.clone(),
            at: Instant::now(),
        });

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        // A small pause so concurrent dispatches actually overlap.
        tokio::time::sleep(Duration::from_millis(10)).await;

        let outcome = match self.behavior_for(&dispatch) {
            Behavior::Succeed { output } => Outcome::success(0, output),
            Behavior::Fail { exit_code } => {
                Outcome::failure(Some(exit_code), "", format!("exit code {exit_code}"))
            }
            Behavior::FailTimes { failures } => {
                if dispatch.attempt <= failures {
                    Outcome::failure(Some(1), "", "transient failure")
                } else {
                    Outcome::success(0, "recovered")
                }
            }
            Behavior::Sleep { millis } => {
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Outcome::success(0, "slept")
            }
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(outcome)
    }
}

pub fn engine_with(runner: Arc<ScriptedRunner>) -> (ExecutionEngine, Arc<dyn RecordStore>) {
    let store = MemoryStore::shared();
    let engine = ExecutionEngine::new(SerialService::in_memory(), Arc::clone(&store), runner);
    (engine, store)
}

pub fn targets(hosts: &[&str]) -> Vec<TargetRef> {
    hosts.iter().map(|h| TargetRef::new(*h, "linux")).collect()
}
