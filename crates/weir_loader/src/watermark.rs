//! Extraction windows.

use crate::error::LoadError;
use crate::job::Job;
use chrono::{DateTime, Duration, Utc};
use tracing::info;
use weir_protocol::defaults::QUIESCENCE_SLICE_SECS;
use weir_protocol::{Strategy, Watermark};
use weir_schedule::{sleep_unless_cancelled, CancellationToken};

/// Schedule facts about the instance being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceTiming {
    pub execution_ts: DateTime<Utc>,
    pub next_execution_ts: DateTime<Utc>,
    /// Aligned start of the instance's cadence; first-load backfills start here.
    pub cadence_start: DateTime<Utc>,
}

pub struct WatermarkResolver;

impl WatermarkResolver {
    /// Window for one instance of `job`.
    ///
    /// Incremental: `from` is the execution timestamp (or `load_from`) minus
    /// the look-back when the target exists, else `reload_from` or the cadence
    /// start. `until` is the next execution timestamp (or `load_until`) plus
    /// the look-ahead. Full refresh and append use the static overrides only.
    pub fn resolve(job: &Job, timing: &InstanceTiming, target_exists: bool) -> Watermark {
        let window = job.window();
        match job.strategy() {
            Strategy::Incremental => {
                let from = if target_exists {
                    window.load_from.unwrap_or(timing.execution_ts)
                        - window.from_offset.unwrap_or_else(Duration::zero)
                } else {
                    window.reload_from.unwrap_or(timing.cadence_start)
                };
                let until = window.load_until.unwrap_or(timing.next_execution_ts)
                    + window.until_offset.unwrap_or_else(Duration::zero);
                Watermark::new(Some(from), Some(until))
            }
            Strategy::FullRefresh | Strategy::Append => {
                Watermark::new(window.reload_from.or(window.load_from), window.load_until)
            }
        }
    }

    /// The moment an incremental instance may start extracting, if it has to wait.
    pub fn quiescence_deadline(job: &Job, watermark: &Watermark) -> Option<DateTime<Utc>> {
        let wait = job.window().wait_for_seconds;
        if wait == 0 || !job.strategy().is_incremental() {
            return None;
        }
        let wait = i64::try_from(wait).ok().map(Duration::seconds)?;
        watermark.until.map(|until| until + wait)
    }
}

/// Sleep until wall-clock time reaches `deadline`, in slices of at most
/// five seconds so cancellation is observed promptly.
pub async fn wait_for_quiescence(
    deadline: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Result<(), LoadError> {
    let slice = std::time::Duration::from_secs(QUIESCENCE_SLICE_SECS);
    let mut announced = false;
    loop {
        if cancel.is_cancelled() {
            return Err(LoadError::Cancelled);
        }
        let remaining = deadline - Utc::now();
        let Ok(remaining) = remaining.to_std() else {
            return Ok(());
        };
        if remaining.is_zero() {
            return Ok(());
        }
        if !announced {
            info!(until = %deadline, "waiting for source quiescence");
            announced = true;
        }
        if !sleep_unless_cancelled(cancel, remaining.min(slice)).await {
            return Err(LoadError::Cancelled);
        }
    }
}
