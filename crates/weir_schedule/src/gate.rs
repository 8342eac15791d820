//! Dependency gate: may the instance of a cadence at `T` start now?
//!
//! Either cadence at `T` first waits until no other instance of the same
//! cadence is running.
//!
//! Full refresh at `T` also waits until no incremental instance before
//! `T + interval_incremental` is running.
//!
//! Incremental at `T` also waits until the incremental instance at
//! `T - interval_incremental` succeeded, or, at a period boundary, the full
//! refresh at `T - interval_full` succeeded.

use crate::aligner::AlignedSchedule;
use crate::cadence::Cadence;
use crate::registry::{InstanceQuery, RegistryError, RunRegistry, TimestampPredicate};
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use weir_protocol::{InstanceState, JobId, JobInstance};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Pass,
    Unmet(String),
}

impl GateDecision {
    pub fn is_pass(&self) -> bool {
        matches!(self, GateDecision::Pass)
    }
}

impl fmt::Display for GateDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateDecision::Pass => write!(f, "pass"),
            GateDecision::Unmet(reason) => write!(f, "unmet: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGate {
    cadence: Cadence,
    full_refresh_job: JobId,
    incremental_job: JobId,
    interval_full: Duration,
    interval_incremental: Duration,
}

impl DependencyGate {
    pub fn full_refresh(schedule: &AlignedSchedule) -> Self {
        Self::for_cadence(Cadence::FullRefresh, schedule)
    }

    pub fn incremental(schedule: &AlignedSchedule) -> Self {
        Self::for_cadence(Cadence::Incremental, schedule)
    }

    pub fn for_cadence(cadence: Cadence, schedule: &AlignedSchedule) -> Self {
        Self {
            cadence,
            full_refresh_job: schedule.full_refresh.job_id.clone(),
            incremental_job: schedule.incremental.job_id.clone(),
            interval_full: schedule.interval_full(),
            interval_incremental: schedule.interval_incremental(),
        }
    }

    pub fn cadence(&self) -> Cadence {
        self.cadence
    }

    /// Evaluate once against the registry. Side-effect free.
    pub async fn evaluate(
        &self,
        registry: &dyn RunRegistry,
        execution_ts: DateTime<Utc>,
    ) -> Result<GateDecision, RegistryError> {
        match self.cadence {
            Cadence::FullRefresh => self.evaluate_full_refresh(registry, execution_ts).await,
            Cadence::Incremental => self.evaluate_incremental(registry, execution_ts).await,
        }
    }

    async fn evaluate_full_refresh(
        &self,
        registry: &dyn RunRegistry,
        ts: DateTime<Utc>,
    ) -> Result<GateDecision, RegistryError> {
        let other_full = running_elsewhere(registry, &self.full_refresh_job, ts).await?;
        if !other_full.is_empty() {
            return Ok(GateDecision::Unmet(format!(
                "full refresh still running: {}",
                describe(&other_full)
            )));
        }

        let overlapping_incremental = registry
            .instances(&InstanceQuery::in_state(
                &self.incremental_job,
                InstanceState::Running,
                TimestampPredicate::Before(ts + self.interval_incremental),
            ))
            .await?;
        if !overlapping_incremental.is_empty() {
            return Ok(GateDecision::Unmet(format!(
                "incremental still running: {}",
                describe(&overlapping_incremental)
            )));
        }

        Ok(GateDecision::Pass)
    }

    async fn evaluate_incremental(
        &self,
        registry: &dyn RunRegistry,
        ts: DateTime<Utc>,
    ) -> Result<GateDecision, RegistryError> {
        let other_incremental = running_elsewhere(registry, &self.incremental_job, ts).await?;
        if !other_incremental.is_empty() {
            return Ok(GateDecision::Unmet(format!(
                "incremental still running: {}",
                describe(&other_incremental)
            )));
        }

        let previous = ts - self.interval_incremental;
        if succeeded(registry, &self.incremental_job, previous).await? {
            return Ok(GateDecision::Pass);
        }

        let period_start = ts - self.interval_full;
        if succeeded(registry, &self.full_refresh_job, period_start).await? {
            return Ok(GateDecision::Pass);
        }

        Ok(GateDecision::Unmet(format!(
            "waiting for {} @ {} or {} @ {} to succeed",
            self.incremental_job, previous, self.full_refresh_job, period_start
        )))
    }
}

async fn succeeded(
    registry: &dyn RunRegistry,
    job_id: &JobId,
    ts: DateTime<Utc>,
) -> Result<bool, RegistryError> {
    let rows = registry
        .instances(&InstanceQuery::in_state(
            job_id,
            InstanceState::Success,
            TimestampPredicate::At(ts),
        ))
        .await?;
    Ok(!rows.is_empty())
}

/// Running instances of `job_id` other than the one at `ts`.
async fn running_elsewhere(
    registry: &dyn RunRegistry,
    job_id: &JobId,
    ts: DateTime<Utc>,
) -> Result<Vec<JobInstance>, RegistryError> {
    let mut rows = registry
        .instances(&InstanceQuery::in_state(
            job_id,
            InstanceState::Running,
            TimestampPredicate::Any,
        ))
        .await?;
    rows.retain(|i| i.execution_ts != ts);
    Ok(rows)
}

fn describe(instances: &[JobInstance]) -> String {
    instances
        .iter()
        .map(|i| format!("{} @ {}", i.job_id, i.execution_ts))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aligner::ScheduleAligner;
    use crate::registry::MemoryRunRegistry;
    use chrono::TimeZone;
    use weir_protocol::RunId;

    fn schedule() -> AlignedSchedule {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        ScheduleAligner::new("shop", start, Duration::days(1), Duration::hours(1))
            .unwrap()
            .align_at(start - Duration::days(1))
    }

    async fn seed(registry: &MemoryRunRegistry, job: &JobId, ts: DateTime<Utc>, state: InstanceState) {
        let run = RunId::new();
        registry.claim_running(job, ts, &run).await.unwrap();
        if state != InstanceState::Running {
            registry.finish(job, ts, &run, state).await.unwrap();
        }
    }

    #[tokio::test]
    async fn first_incremental_waits_for_full_refresh() {
        let schedule = schedule();
        let registry = MemoryRunRegistry::new();
        let gate = DependencyGate::incremental(&schedule);
        let first = schedule.incremental.start;

        assert!(!gate.evaluate(&registry, first).await.unwrap().is_pass());

        seed(&registry, &schedule.full_refresh.job_id, schedule.full_refresh.start, InstanceState::Success).await;
        assert!(gate.evaluate(&registry, first).await.unwrap().is_pass());
    }

    #[tokio::test]
    async fn incremental_chain_requires_success_not_failure() {
        let schedule = schedule();
        let registry = MemoryRunRegistry::new();
        let gate = DependencyGate::incremental(&schedule);
        let first = schedule.incremental.start;
        let second = first + Duration::hours(1);

        seed(&registry, &schedule.incremental.job_id, first, InstanceState::Failed).await;
        assert!(!gate.evaluate(&registry, second).await.unwrap().is_pass());

        seed(&registry, &schedule.incremental.job_id, first, InstanceState::Success).await;
        assert!(gate.evaluate(&registry, second).await.unwrap().is_pass());
    }

    #[tokio::test]
    async fn full_refresh_blocked_by_overlapping_incremental() {
        let schedule = schedule();
        let registry = MemoryRunRegistry::new();
        let gate = DependencyGate::full_refresh(&schedule);
        let next_period = schedule.full_refresh.start + Duration::days(1);

        // Incremental at exactly T overlaps the boundary.
        seed(&registry, &schedule.incremental.job_id, next_period, InstanceState::Running).await;
        let decision = gate.evaluate(&registry, next_period).await.unwrap();
        assert!(matches!(decision, GateDecision::Unmet(ref r) if r.contains("incremental")));
    }

    #[tokio::test]
    async fn full_refresh_ignores_later_incremental() {
        let schedule = schedule();
        let registry = MemoryRunRegistry::new();
        let gate = DependencyGate::full_refresh(&schedule);
        let t = schedule.full_refresh.start + Duration::days(1);

        seed(&registry, &schedule.incremental.job_id, t + Duration::hours(1), InstanceState::Running).await;
        assert!(gate.evaluate(&registry, t).await.unwrap().is_pass());
    }

    #[tokio::test]
    async fn full_refresh_blocked_by_earlier_full_refresh() {
        let schedule = schedule();
        let registry = MemoryRunRegistry::new();
        let gate = DependencyGate::full_refresh(&schedule);
        let t0 = schedule.full_refresh.start;

        seed(&registry, &schedule.full_refresh.job_id, t0, InstanceState::Running).await;
        assert!(!gate.evaluate(&registry, t0 + Duration::days(1)).await.unwrap().is_pass());
        // Its own timestamp does not block itself.
        assert!(gate.evaluate(&registry, t0).await.unwrap().is_pass());
    }

    #[tokio::test]
    async fn full_refresh_blocked_by_later_full_refresh() {
        let schedule = schedule();
        let registry = MemoryRunRegistry::new();
        let gate = DependencyGate::full_refresh(&schedule);
        let t0 = schedule.full_refresh.start;
        let t1 = t0 + Duration::days(1);

        seed(&registry, &schedule.full_refresh.job_id, t1, InstanceState::Running).await;
        let decision = gate.evaluate(&registry, t0).await.unwrap();
        assert!(matches!(decision, GateDecision::Unmet(ref r) if r.contains("full refresh")));
    }

    #[tokio::test]
    async fn incremental_rerun_blocked_by_running_successor() {
        let schedule = schedule();
        let registry = MemoryRunRegistry::new();
        let gate = DependencyGate::incremental(&schedule);
        let first = schedule.incremental.start;
        let second = first + Duration::hours(1);

        seed(&registry, &schedule.full_refresh.job_id, schedule.full_refresh.start, InstanceState::Success).await;
        seed(&registry, &schedule.incremental.job_id, first, InstanceState::Success).await;
        seed(&registry, &schedule.incremental.job_id, second, InstanceState::Running).await;

        let decision = gate.evaluate(&registry, first).await.unwrap();
        assert!(matches!(decision, GateDecision::Unmet(ref r) if r.contains("incremental")));
    }
}
