use crate::cancel::{sleep_unless_cancelled, CancellationToken};
use crate::gate::{DependencyGate, GateDecision};
use crate::registry::{RegistryError, RunRegistry};
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::info;
use weir_protocol::defaults::DEFAULT_POKE_INTERVAL_SECS;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("Gate wait cancelled")]
    Cancelled,

    #[error("Gate still unmet after {waited:?}: {reason}")]
    DeadlineExceeded { waited: Duration, reason: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Re-evaluates a gate on a timer until it passes.
///
/// Waiting holds no resources beyond the registry handle. Without a deadline
/// the wait is unbounded.
#[derive(Debug, Clone)]
pub struct GatePoller {
    pub poke_interval: Duration,
    pub deadline: Option<Duration>,
}

impl Default for GatePoller {
    fn default() -> Self {
        Self {
            poke_interval: Duration::from_secs(DEFAULT_POKE_INTERVAL_SECS),
            deadline: None,
        }
    }
}

impl GatePoller {
    pub fn new(poke_interval: Duration) -> Self {
        Self {
            poke_interval,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub async fn wait(
        &self,
        gate: &DependencyGate,
        registry: &dyn RunRegistry,
        execution_ts: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<(), GateError> {
        let started = Instant::now();
        let mut attempts: u64 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(GateError::Cancelled);
            }
            attempts += 1;
            let reason = match gate.evaluate(registry, execution_ts).await? {
                GateDecision::Pass => {
                    info!(cadence = %gate.cadence(), %execution_ts, attempts, "gate passed");
                    return Ok(());
                }
                GateDecision::Unmet(reason) => reason,
            };

            let waited = started.elapsed();
            let nap = match self.deadline {
                Some(deadline) if waited >= deadline => {
                    return Err(GateError::DeadlineExceeded { waited, reason });
                }
                Some(deadline) => self.poke_interval.min(deadline - waited),
                None => self.poke_interval,
            };
            info!(
                cadence = %gate.cadence(),
                %execution_ts,
                attempts,
                retry_in_secs = nap.as_secs(),
                "gate unmet: {}",
                reason
            );
            if !sleep_unless_cancelled(cancel, nap).await {
                return Err(GateError::Cancelled);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aligner::ScheduleAligner;
    use crate::registry::MemoryRunRegistry;
    use chrono::TimeZone;
    use std::sync::Arc;
    use weir_protocol::{InstanceState, RunId};

    fn gate() -> (DependencyGate, crate::aligner::AlignedSchedule) {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let schedule = ScheduleAligner::new("shop", start, chrono::Duration::days(1), chrono::Duration::hours(1))
            .unwrap()
            .align_at(start);
        (DependencyGate::incremental(&schedule), schedule)
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_turns_into_error() {
        let (gate, schedule) = gate();
        let registry = MemoryRunRegistry::new();
        let poller = GatePoller::new(Duration::from_secs(300)).with_deadline(Duration::from_secs(900));

        let err = poller
            .wait(&gate, &registry, schedule.incremental.start, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::DeadlineExceeded { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn passes_once_dependency_succeeds() {
        let (gate, schedule) = gate();
        let registry = Arc::new(MemoryRunRegistry::new());
        let poller = GatePoller::new(Duration::from_secs(300));

        let writer = Arc::clone(&registry);
        let full = schedule.full_refresh.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1000)).await;
            let run = RunId::new();
            writer.claim_running(&full.job_id, full.start, &run).await.unwrap();
            writer.finish(&full.job_id, full.start, &run, InstanceState::Success).await.unwrap();
        });

        poller
            .wait(&gate, registry.as_ref(), schedule.incremental.start, &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_discards_the_attempt() {
        let (gate, schedule) = gate();
        let registry = MemoryRunRegistry::new();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            trigger.cancel();
        });

        let err = GatePoller::default()
            .wait(&gate, &registry, schedule.incremental.start, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Cancelled));
    }
}
