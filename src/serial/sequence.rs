// ABOUTME: Atomic per-scope sequence reservation and serial issuance
// ABOUTME: SequenceStore is the single serialization point shared by concurrent callers

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use tokio::sync::Mutex;

use super::error::{Result, SerialError};
use super::{
    BranchSerial, ExecutionSerial, JobSerial, TargetSerial, CHILD_CAPACITY, YEAR_CAPACITY,
};

/// Durable next-sequence storage. `reserve` performs the read-increment-write
/// as one serializable operation; backends map this to a transactional
/// `UPDATE ... RETURNING` or an equivalent compare-and-swap.
#[async_trait]
pub trait SequenceStore: Send + Sync {
    /// Reserve and return the next sequence number (1-based) for a scope.
    /// Returns `SequenceExhausted` once `capacity` has been handed out.
    async fn reserve(&self, scope: &str, capacity: u32) -> Result<u32>;
}

/// In-memory sequence store. A single mutex guards every counter, so two
/// concurrent reservations for the same scope can never observe the same
/// value.
#[derive(Debug, Default)]
pub struct MemorySequences {
    counters: Mutex<HashMap<String, u32>>,
}

impl MemorySequences {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SequenceStore for MemorySequences {
    async fn reserve(&self, scope: &str, capacity: u32) -> Result<u32> {
        let mut counters = self.counters.lock().await;
        let counter = counters.entry(scope.to_string()).or_insert(0);
        if *counter >= capacity {
            return Err(SerialError::SequenceExhausted {
                scope: scope.to_string(),
                capacity,
            });
        }
        *counter += 1;
        Ok(*counter)
    }
}

/// Issues serials at every tier by reserving sequence numbers from the
/// underlying store.
#[derive(Clone)]
pub struct SerialService {
    store: Arc<dyn SequenceStore>,
}

impl SerialService {
    pub fn new(store: Arc<dyn SequenceStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemorySequences::new()))
    }

    pub async fn new_job_serial(&self) -> Result<JobSerial> {
        let year = Utc::now().year();
        let sequence = self
            .store
            .reserve(&format!("job:{year}"), YEAR_CAPACITY)
            .await?;
        Ok(JobSerial { year, sequence })
    }

    pub async fn new_execution_serial(&self, job: &JobSerial) -> Result<ExecutionSerial> {
        let sequence = self
            .store
            .reserve(&format!("execution:{job}"), CHILD_CAPACITY)
            .await?;
        Ok(ExecutionSerial {
            job: job.clone(),
            sequence,
        })
    }

    pub async fn new_branch_serial(&self, execution: &ExecutionSerial) -> Result<BranchSerial> {
        let sequence = self
            .store
            .reserve(&format!("branch:{execution}"), CHILD_CAPACITY)
            .await?;
        Ok(BranchSerial {
            execution: execution.clone(),
            sequence,
        })
    }

    pub async fn new_target_serial(&self) -> Result<TargetSerial> {
        let year = Utc::now().year();
        let sequence = self
            .store
            .reserve(&format!("target:{year}"), YEAR_CAPACITY)
            .await?;
        Ok(TargetSerial { year, sequence })
    }
}

impl std::fmt::Debug for SerialService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialService").finish()
    }
}
