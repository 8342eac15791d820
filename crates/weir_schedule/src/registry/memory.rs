use super::{InstanceQuery, RegistryError, RunRegistry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;
use weir_protocol::{InstanceState, JobId, JobInstance, RunId};

type Key = (JobId, DateTime<Utc>);

/// Process-local registry. Used by tests and single-shot CLI runs.
#[derive(Debug, Default)]
pub struct MemoryRunRegistry {
    rows: Mutex<BTreeMap<Key, JobInstance>>,
}

impl MemoryRunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a row as-is. Lets tests seed arbitrary states.
    pub fn put(&self, instance: JobInstance) -> Result<(), RegistryError> {
        let mut rows = self.lock()?;
        rows.insert((instance.job_id.clone(), instance.execution_ts), instance);
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<Key, JobInstance>>, RegistryError> {
        self.rows
            .lock()
            .map_err(|_| RegistryError::Corrupt("registry lock poisoned".to_string()))
    }
}

#[async_trait]
impl RunRegistry for MemoryRunRegistry {
    async fn instances(&self, query: &InstanceQuery) -> Result<Vec<JobInstance>, RegistryError> {
        let rows = self.lock()?;
        Ok(rows.values().filter(|i| query.matches(i)).cloned().collect())
    }

    async fn record_pending(
        &self,
        job_id: &JobId,
        execution_ts: DateTime<Utc>,
    ) -> Result<JobInstance, RegistryError> {
        let mut rows = self.lock()?;
        let instance = rows
            .entry((job_id.clone(), execution_ts))
            .or_insert_with(|| JobInstance::pending(job_id.clone(), execution_ts));
        Ok(instance.clone())
    }

    async fn claim_running(
        &self,
        job_id: &JobId,
        execution_ts: DateTime<Utc>,
        run_id: &RunId,
    ) -> Result<JobInstance, RegistryError> {
        let mut rows = self.lock()?;
        let running_ts = rows
            .values()
            .find(|i| i.job_id == *job_id && i.state == InstanceState::Running)
            .map(|i| i.execution_ts);
        match running_ts {
            Some(ts) if ts == execution_ts => {
                return Err(RegistryError::AlreadyRunning {
                    job_id: job_id.clone(),
                    execution_ts,
                });
            }
            Some(running_ts) => {
                return Err(RegistryError::CadenceBusy {
                    job_id: job_id.clone(),
                    execution_ts,
                    running_ts,
                });
            }
            None => {}
        }
        let instance = rows
            .entry((job_id.clone(), execution_ts))
            .or_insert_with(|| JobInstance::pending(job_id.clone(), execution_ts));
        instance.state = InstanceState::Running;
        instance.run_id = Some(run_id.clone());
        instance.updated_at = Utc::now();
        Ok(instance.clone())
    }

    async fn finish(
        &self,
        job_id: &JobId,
        execution_ts: DateTime<Utc>,
        run_id: &RunId,
        state: InstanceState,
    ) -> Result<(), RegistryError> {
        if !state.is_terminal() {
            return Err(RegistryError::NonTerminalState(state));
        }
        let mut rows = self.lock()?;
        match rows.get_mut(&(job_id.clone(), execution_ts)) {
            Some(instance)
                if instance.state == InstanceState::Running
                    && instance.run_id.as_ref() == Some(run_id) =>
            {
                instance.state = state;
                instance.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(RegistryError::NotRunning {
                job_id: job_id.clone(),
                execution_ts,
                run_id: run_id.clone(),
            }),
        }
    }
}
