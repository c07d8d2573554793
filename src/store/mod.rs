// ABOUTME: Execution record store: job, execution, branch, and target records keyed by serial
// ABOUTME: The RecordStore trait abstracts persistence; MemoryStore is the in-process backend

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::engine::{BranchStatus, ExecutionStatus};
use crate::parser::{JobAction, JobSettings};
use crate::serial::SerialTier;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("No record found for serial '{serial}'")]
    NotFound { serial: String },

    #[error("A record already exists for serial '{serial}'")]
    Conflict { serial: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A registered job definition, stored with its settings and action list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub serial: String,
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub settings: JobSettings,
    pub actions: IndexMap<String, JobAction>,
    /// Soft-delete flag; history under the serial outlives the job.
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(serial: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            serial: serial.into(),
            name: name.into(),
            version: version.into(),
            description: None,
            settings: JobSettings::default(),
            actions: IndexMap::new(),
            active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One invocation of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub serial: String,
    /// The execution's sequence component within its job.
    pub number: u32,
    pub job_serial: String,
    pub job_name: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    pub fn new(
        serial: impl Into<String>,
        job_serial: impl Into<String>,
        job_name: impl Into<String>,
    ) -> Self {
        let serial: String = serial.into();
        let number = serial
            .rsplit('.')
            .next()
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);
        Self {
            id: Uuid::new_v4(),
            serial,
            number,
            job_serial: job_serial.into(),
            job_name: job_name.into(),
            status: ExecutionStatus::Scheduled,
            started_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// One execution branch against a single target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchRecord {
    pub id: Uuid,
    pub serial: String,
    pub execution_serial: String,
    pub target_host: String,
    pub target_os: String,
    pub target_serial: Option<String>,
    pub status: BranchStatus,
    pub exit_code: Option<i32>,
    pub output: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BranchRecord {
    pub fn new(
        serial: impl Into<String>,
        execution_serial: impl Into<String>,
        target_host: impl Into<String>,
        target_os: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            serial: serial.into(),
            execution_serial: execution_serial.into(),
            target_host: target_host.into(),
            target_os: target_os.into(),
            target_serial: None,
            status: BranchStatus::Scheduled,
            exit_code: None,
            output: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// A registered target system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetRecord {
    pub id: Uuid,
    pub serial: String,
    pub host: String,
    pub os: String,
    pub created_at: DateTime<Utc>,
}

impl TargetRecord {
    pub fn new(serial: impl Into<String>, host: impl Into<String>, os: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            serial: serial.into(),
            host: host.into(),
            os: os.into(),
            created_at: Utc::now(),
        }
    }
}

/// Any record, as returned by mixed-tier lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum Record {
    Job(JobRecord),
    Execution(ExecutionRecord),
    Branch(BranchRecord),
    Target(TargetRecord),
}

impl Record {
    pub fn serial(&self) -> &str {
        match self {
            Record::Job(r) => &r.serial,
            Record::Execution(r) => &r.serial,
            Record::Branch(r) => &r.serial,
            Record::Target(r) => &r.serial,
        }
    }
}

/// Persistence boundary for execution history.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create_job(&self, record: JobRecord) -> Result<()>;
    async fn get_job(&self, serial: &str) -> Result<JobRecord>;
    async fn update_job(&self, record: JobRecord) -> Result<()>;
    /// Soft delete: the job stops accepting executions but its history stays.
    async fn delete_job(&self, serial: &str) -> Result<()>;
    async fn list_jobs(&self) -> Result<Vec<JobRecord>>;

    async fn create_execution(&self, record: ExecutionRecord) -> Result<()>;
    async fn get_execution(&self, serial: &str) -> Result<ExecutionRecord>;
    async fn update_execution(&self, record: ExecutionRecord) -> Result<()>;
    /// All executions of a job, matched by serial prefix.
    async fn executions_for_job(&self, job_serial: &str) -> Result<Vec<ExecutionRecord>>;

    async fn create_branch(&self, record: BranchRecord) -> Result<()>;
    async fn get_branch(&self, serial: &str) -> Result<BranchRecord>;
    async fn update_branch(&self, record: BranchRecord) -> Result<()>;
    /// All branches of an execution, matched by serial prefix.
    async fn branches_for_execution(&self, execution_serial: &str) -> Result<Vec<BranchRecord>>;
    /// Every branch that ever ran against a target.
    async fn branches_for_target(&self, target: &str) -> Result<Vec<BranchRecord>>;

    async fn create_target(&self, record: TargetRecord) -> Result<()>;
    async fn get_target(&self, serial: &str) -> Result<TargetRecord>;

    /// Look up a mixed batch of serials in one call. Returns the records
    /// found and the serials with no record, in input order. Serials that
    /// match no tier format land in `missing`.
    async fn lookup(&self, serials: &[String]) -> Result<(Vec<Record>, Vec<String>)> {
        let mut found = Vec::new();
        let mut missing = Vec::new();
        for serial in serials {
            let record = match SerialTier::detect(serial) {
                Some(SerialTier::Job) => self.get_job(serial).await.map(Record::Job),
                Some(SerialTier::Execution) => {
                    self.get_execution(serial).await.map(Record::Execution)
                }
                Some(SerialTier::Branch) => self.get_branch(serial).await.map(Record::Branch),
                Some(SerialTier::Target) => self.get_target(serial).await.map(Record::Target),
                None => Err(StoreError::NotFound {
                    serial: serial.clone(),
                }),
            };
            match record {
                Ok(record) => found.push(record),
                Err(StoreError::NotFound { .. }) => missing.push(serial.clone()),
                Err(e) => return Err(e),
            }
        }
        Ok((found, missing))
    }
}

/// In-process store backed by serial-keyed maps.
#[derive(Default)]
pub struct MemoryStore {
    jobs: RwLock<HashMap<String, JobRecord>>,
    executions: RwLock<HashMap<String, ExecutionRecord>>,
    branches: RwLock<HashMap<String, BranchRecord>>,
    targets: RwLock<HashMap<String, TargetRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<dyn RecordStore> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create_job(&self, record: JobRecord) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&record.serial) {
            return Err(StoreError::Conflict {
                serial: record.serial,
            });
        }
        jobs.insert(record.serial.clone(), record);
        Ok(())
    }

    async fn get_job(&self, serial: &str) -> Result<JobRecord> {
        self.jobs
            .read()
            .await
            .get(serial)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                serial: serial.to_string(),
            })
    }

    async fn update_job(&self, mut record: JobRecord) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if !jobs.contains_key(&record.serial) {
            return Err(StoreError::NotFound {
                serial: record.serial,
            });
        }
        record.updated_at = Utc::now();
        jobs.insert(record.serial.clone(), record);
        Ok(())
    }

    async fn delete_job(&self, serial: &str) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(serial) {
            Some(record) => {
                record.active = false;
                record.updated_at = Utc::now();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                serial: serial.to_string(),
            }),
        }
    }

    async fn list_jobs(&self) -> Result<Vec<JobRecord>> {
        let mut jobs: Vec<_> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| a.serial.cmp(&b.serial));
        Ok(jobs)
    }

    async fn create_execution(&self, record: ExecutionRecord) -> Result<()> {
        let mut executions = self.executions.write().await;
        if executions.contains_key(&record.serial) {
            return Err(StoreError::Conflict {
                serial: record.serial,
            });
        }
        executions.insert(record.serial.clone(), record);
        Ok(())
    }

    async fn get_execution(&self, serial: &str) -> Result<ExecutionRecord> {
        self.executions
            .read()
            .await
            .get(serial)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                serial: serial.to_string(),
            })
    }

    async fn update_execution(&self, record: ExecutionRecord) -> Result<()> {
        let mut executions = self.executions.write().await;
        if !executions.contains_key(&record.serial) {
            return Err(StoreError::NotFound {
                serial: record.serial,
            });
        }
        executions.insert(record.serial.clone(), record);
        Ok(())
    }

    async fn executions_for_job(&self, job_serial: &str) -> Result<Vec<ExecutionRecord>> {
        let prefix = format!("{job_serial}.");
        let mut records: Vec<_> = self
            .executions
            .read()
            .await
            .values()
            .filter(|r| r.serial.starts_with(&prefix))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.serial.cmp(&b.serial));
        Ok(records)
    }

    async fn create_branch(&self, record: BranchRecord) -> Result<()> {
        let mut branches = self.branches.write().await;
        if branches.contains_key(&record.serial) {
            return Err(StoreError::Conflict {
                serial: record.serial,
            });
        }
        branches.insert(record.serial.clone(), record);
        Ok(())
    }

    async fn get_branch(&self, serial: &str) -> Result<BranchRecord> {
        self.branches
            .read()
            .await
            .get(serial)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                serial: serial.to_string(),
            })
    }

    async fn update_branch(&self, record: BranchRecord) -> Result<()> {
        let mut branches = self.branches.write().await;
        if !branches.contains_key(&record.serial) {
            return Err(StoreError::NotFound {
                serial: record.serial,
            });
        }
        branches.insert(record.serial.clone(), record);
        Ok(())
    }

    async fn branches_for_execution(&self, execution_serial: &str) -> Result<Vec<BranchRecord>> {
        let prefix = format!("{execution_serial}.");
        let mut records: Vec<_> = self
            .branches
            .read()
            .await
            .values()
            .filter(|r| r.serial.starts_with(&prefix))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.serial.cmp(&b.serial));
        Ok(records)
    }

    async fn branches_for_target(&self, target: &str) -> Result<Vec<BranchRecord>> {
        let mut records: Vec<_> = self
            .branches
            .read()
            .await
            .values()
            .filter(|r| {
                r.target_serial.as_deref() == Some(target) || r.target_host == target
            })
            .cloned()
            .collect();
        records.sort_by(|a, b| a.serial.cmp(&b.serial));
        Ok(records)
    }

    async fn create_target(&self, record: TargetRecord) -> Result<()> {
        let mut targets = self.targets.write().await;
        if targets.contains_key(&record.serial) {
            return Err(StoreError::Conflict {
                serial: record.serial,
            });
        }
        targets.insert(record.serial.clone(), record);
        Ok(())
    }

    async fn get_target(&self, serial: &str) -> Result<TargetRecord> {
        self.targets
            .read()
            .await
            .get(serial)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                serial: serial.to_string(),
            })
    }
}
