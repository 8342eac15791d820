//! Executes one instance of a pipeline cadence.
//!
//! The instance is recorded as pending, waits on its dependency gate, is
//! claimed as running, loads every table job and finally moves to a terminal
//! state. Each table job is its own commit unit; the instance succeeds only
//! when all of them do.

use crate::config::PipelineConfig;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};
use weir_loader::{
    DirectTransport, Endpoint, InstanceTiming, Job, LoadError, RunContext, RunDeps, RunReport,
    Runner, SourceConnector, Transport,
};
use weir_protocol::defaults::CANCELLED_MESSAGE;
use weir_protocol::{format_duration, InstanceState, JobId, RunId};
use weir_schedule::{
    AlignedSchedule, Cadence, CancellationToken, DependencyGate, GateDecision, GatePoller,
    RunRegistry,
};
use weir_sinks::{EngineConnector, StoreConnector};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableFailure {
    pub table: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct InstanceOutcome {
    pub job_id: JobId,
    pub execution_ts: DateTime<Utc>,
    pub run_id: RunId,
    pub state: InstanceState,
    pub reports: Vec<RunReport>,
    pub failures: Vec<TableFailure>,
}

impl InstanceOutcome {
    pub fn succeeded(&self) -> bool {
        self.state == InstanceState::Success
    }
}

pub struct InstanceExecutor {
    schedule: AlignedSchedule,
    full_refresh_jobs: Vec<Job>,
    incremental_jobs: Vec<Job>,
    registry: Arc<dyn RunRegistry>,
    poller: GatePoller,
    source: Arc<dyn SourceConnector>,
    source_endpoint: Endpoint,
    source_transport: Arc<dyn Transport>,
    stores: Arc<dyn StoreConnector>,
    target_endpoint: Endpoint,
    target_transport: Arc<dyn Transport>,
}

impl InstanceExecutor {
    pub fn new(
        schedule: AlignedSchedule,
        registry: Arc<dyn RunRegistry>,
        source: Arc<dyn SourceConnector>,
        source_endpoint: Endpoint,
        stores: Arc<dyn StoreConnector>,
        target_endpoint: Endpoint,
    ) -> Self {
        Self {
            schedule,
            full_refresh_jobs: Vec::new(),
            incremental_jobs: Vec::new(),
            registry,
            poller: GatePoller::default(),
            source,
            source_endpoint,
            source_transport: Arc::new(DirectTransport),
            stores,
            target_endpoint,
            target_transport: Arc::new(DirectTransport),
        }
    }

    /// Wire an executor from a pipeline file. `schedule` is passed in so the
    /// caller decides the alignment instant.
    pub fn from_config(
        config: &PipelineConfig,
        schedule: AlignedSchedule,
        registry: Arc<dyn RunRegistry>,
    ) -> Result<Self> {
        let source = Arc::new(config.source_connector()?);
        let stores = Arc::new(EngineConnector::new(config.target.engine));
        Ok(Self::new(
            schedule,
            registry,
            source,
            Endpoint::new(config.source_url()),
            stores,
            Endpoint::new(config.target.url.clone()),
        )
        .with_jobs(Cadence::FullRefresh, config.jobs(Cadence::FullRefresh)?)
        .with_jobs(Cadence::Incremental, config.jobs(Cadence::Incremental)?)
        .with_poller(config.poller()?))
    }

    pub fn with_jobs(mut self, cadence: Cadence, jobs: Vec<Job>) -> Self {
        match cadence {
            Cadence::FullRefresh => self.full_refresh_jobs = jobs,
            Cadence::Incremental => self.incremental_jobs = jobs,
        }
        self
    }

    pub fn with_poller(mut self, poller: GatePoller) -> Self {
        self.poller = poller;
        self
    }

    pub fn with_transports(mut self, source: Arc<dyn Transport>, target: Arc<dyn Transport>) -> Self {
        self.source_transport = source;
        self.target_transport = target;
        self
    }

    pub fn schedule(&self) -> &AlignedSchedule {
        &self.schedule
    }

    pub fn registry(&self) -> &dyn RunRegistry {
        self.registry.as_ref()
    }

    fn jobs(&self, cadence: Cadence) -> &[Job] {
        match cadence {
            Cadence::FullRefresh => &self.full_refresh_jobs,
            Cadence::Incremental => &self.incremental_jobs,
        }
    }

    fn check_execution_ts(&self, cadence: Cadence, execution_ts: DateTime<Utc>) -> Result<()> {
        let schedule = self.schedule.cadence(cadence);
        if !schedule.is_execution_ts(execution_ts) {
            bail!(
                "{} is not an execution of {} (starts {}, every {})",
                execution_ts,
                schedule.job_id,
                schedule.start,
                format_duration(schedule.interval)
            );
        }
        Ok(())
    }

    /// Evaluate the gate once, without touching the registry.
    pub async fn evaluate_gate(
        &self,
        cadence: Cadence,
        execution_ts: DateTime<Utc>,
    ) -> Result<GateDecision> {
        self.check_execution_ts(cadence, execution_ts)?;
        let gate = DependencyGate::for_cadence(cadence, &self.schedule);
        Ok(gate.evaluate(self.registry.as_ref(), execution_ts).await?)
    }

    /// Run the instance of `cadence` at `execution_ts` to a terminal state.
    ///
    /// Cancellation while waiting on the gate leaves the instance pending and
    /// returns an error. Cancellation after the claim fails the instance.
    pub async fn execute(
        &self,
        cadence: Cadence,
        execution_ts: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<InstanceOutcome> {
        self.check_execution_ts(cadence, execution_ts)?;
        let jobs = self.jobs(cadence);
        let schedule = self.schedule.cadence(cadence);
        let job_id = schedule.job_id.clone();
        if jobs.is_empty() {
            bail!("No table jobs configured for {}", job_id);
        }

        self.registry.record_pending(&job_id, execution_ts).await?;
        let gate = DependencyGate::for_cadence(cadence, &self.schedule);
        self.poller
            .wait(&gate, self.registry.as_ref(), execution_ts, cancel)
            .await
            .with_context(|| format!("Gate for {} @ {}", job_id, execution_ts))?;

        let run_id = RunId::new();
        self.registry
            .claim_running(&job_id, execution_ts, &run_id)
            .await?;
        info!(%job_id, %execution_ts, %run_id, tables = jobs.len(), "instance started");

        let timing = InstanceTiming {
            execution_ts,
            next_execution_ts: schedule.next_execution(execution_ts),
            cadence_start: schedule.start,
        };
        let deps = RunDeps {
            source: self.source.as_ref(),
            source_endpoint: self.source_endpoint.clone(),
            source_transport: self.source_transport.as_ref(),
            stores: self.stores.as_ref(),
            target_endpoint: self.target_endpoint.clone(),
            target_transport: self.target_transport.as_ref(),
        };

        let mut reports = Vec::with_capacity(jobs.len());
        let mut failures = Vec::new();
        for job in jobs {
            let table = job.target().table.clone();
            let ctx = RunContext::new(run_id.clone(), timing);
            match Runner::run(job, &ctx, &deps, cancel).await {
                Ok(report) => reports.push(report),
                Err(LoadError::Cancelled) => {
                    warn!(%job_id, %table, "table load cancelled");
                    failures.push(TableFailure {
                        table,
                        message: CANCELLED_MESSAGE.to_string(),
                    });
                }
                Err(err) => {
                    error!(%job_id, %table, "table load failed: {}", err);
                    failures.push(TableFailure {
                        table,
                        message: err.to_string(),
                    });
                }
            }
        }

        let state = if failures.is_empty() {
            InstanceState::Success
        } else {
            InstanceState::Failed
        };
        self.registry
            .finish(&job_id, execution_ts, &run_id, state)
            .await?;
        info!(%job_id, %execution_ts, %run_id, state = %state, "instance finished");

        Ok(InstanceOutcome {
            job_id,
            execution_ts,
            run_id,
            state,
            reports,
            failures,
        })
    }
}
