//! The run registry records the state of every job instance.
//!
//! The dependency gate is its only reader; the instance executor drives
//! the state transitions.

mod memory;
mod sqlite;

pub use memory::MemoryRunRegistry;
pub use sqlite::SqliteRunRegistry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use weir_protocol::{InstanceState, JobId, JobInstance, RunId};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Instance {job_id} @ {execution_ts} is already running")]
    AlreadyRunning {
        job_id: JobId,
        execution_ts: DateTime<Utc>,
    },

    #[error("Cannot claim {job_id} @ {execution_ts}: instance @ {running_ts} is running")]
    CadenceBusy {
        job_id: JobId,
        execution_ts: DateTime<Utc>,
        running_ts: DateTime<Utc>,
    },

    #[error("Instance {job_id} @ {execution_ts} is not running under run {run_id}")]
    NotRunning {
        job_id: JobId,
        execution_ts: DateTime<Utc>,
        run_id: RunId,
    },

    #[error("Cannot finish an instance in non-terminal state {0}")]
    NonTerminalState(InstanceState),

    #[error("Corrupt registry row: {0}")]
    Corrupt(String),

    #[error("Registry database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Filter on an instance's execution timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampPredicate {
    Any,
    /// Strictly earlier than the given timestamp.
    Before(DateTime<Utc>),
    At(DateTime<Utc>),
}

impl TimestampPredicate {
    pub fn matches(&self, ts: DateTime<Utc>) -> bool {
        match self {
            TimestampPredicate::Any => true,
            TimestampPredicate::Before(bound) => ts < *bound,
            TimestampPredicate::At(at) => ts == *at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceQuery {
    pub job_id: JobId,
    pub state: Option<InstanceState>,
    pub execution_ts: TimestampPredicate,
}

impl InstanceQuery {
    pub fn all(job_id: &JobId) -> Self {
        Self {
            job_id: job_id.clone(),
            state: None,
            execution_ts: TimestampPredicate::Any,
        }
    }

    pub fn in_state(job_id: &JobId, state: InstanceState, execution_ts: TimestampPredicate) -> Self {
        Self {
            job_id: job_id.clone(),
            state: Some(state),
            execution_ts,
        }
    }

    pub fn matches(&self, instance: &JobInstance) -> bool {
        instance.job_id == self.job_id
            && self.state.map_or(true, |s| instance.state == s)
            && self.execution_ts.matches(instance.execution_ts)
    }
}

#[async_trait]
pub trait RunRegistry: Send + Sync {
    /// Instances matching the query, ordered by execution timestamp.
    async fn instances(&self, query: &InstanceQuery) -> Result<Vec<JobInstance>, RegistryError>;

    async fn get(
        &self,
        job_id: &JobId,
        execution_ts: DateTime<Utc>,
    ) -> Result<Option<JobInstance>, RegistryError> {
        let query = InstanceQuery {
            job_id: job_id.clone(),
            state: None,
            execution_ts: TimestampPredicate::At(execution_ts),
        };
        Ok(self.instances(&query).await?.into_iter().next())
    }

    /// Record a scheduled instance. Existing rows are left untouched.
    async fn record_pending(
        &self,
        job_id: &JobId,
        execution_ts: DateTime<Utc>,
    ) -> Result<JobInstance, RegistryError>;

    /// Atomically move an instance to `running`.
    ///
    /// Fails with [`RegistryError::AlreadyRunning`] if another run holds it,
    /// and with [`RegistryError::CadenceBusy`] if any other instance of the
    /// same job is running, so at most one instance per job is ever running.
    /// Pending, failed and succeeded instances may all be claimed (retries
    /// and explicit re-runs).
    async fn claim_running(
        &self,
        job_id: &JobId,
        execution_ts: DateTime<Utc>,
        run_id: &RunId,
    ) -> Result<JobInstance, RegistryError>;

    /// Move a running instance to a terminal state.
    async fn finish(
        &self,
        job_id: &JobId,
        execution_ts: DateTime<Utc>,
        run_id: &RunId,
        state: InstanceState,
    ) -> Result<(), RegistryError>;
}
