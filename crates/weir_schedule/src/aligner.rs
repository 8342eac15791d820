//! Derive the paired full-refresh / incremental cadences of a pipeline.

use crate::cadence::{Cadence, CadenceSchedule};
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::debug;
use weir_protocol::{JobId, ParseError};

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Intervals must be positive (full refresh: {full}, incremental: {incremental})")]
    NonPositiveInterval { full: Duration, incremental: Duration },

    #[error("Incremental interval {incremental} must be shorter than full refresh interval {full}")]
    IncrementalNotShorter { full: Duration, incremental: Duration },

    #[error("End date {end} is before start date {start}")]
    EndBeforeStart {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("Invalid pipeline name: {0}")]
    InvalidName(#[from] ParseError),
}

/// Computes aligned start timestamps for the two cadences of one pipeline.
///
/// Construction validates the intervals; alignment itself never fails.
#[derive(Debug, Clone)]
pub struct ScheduleAligner {
    pipeline: String,
    full_refresh_job: JobId,
    incremental_job: JobId,
    start_date: DateTime<Utc>,
    interval_full: Duration,
    interval_incremental: Duration,
    end_date: Option<DateTime<Utc>>,
}

/// Result of alignment: one schedule per cadence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignedSchedule {
    pub full_refresh: CadenceSchedule,
    pub incremental: CadenceSchedule,
}

impl AlignedSchedule {
    pub fn cadence(&self, cadence: Cadence) -> &CadenceSchedule {
        match cadence {
            Cadence::FullRefresh => &self.full_refresh,
            Cadence::Incremental => &self.incremental,
        }
    }

    pub fn interval_full(&self) -> Duration {
        self.full_refresh.interval
    }

    pub fn interval_incremental(&self) -> Duration {
        self.incremental.interval
    }
}

impl ScheduleAligner {
    /// `start_date` is timezone aware by construction; see
    /// [`weir_protocol::parse_aware_timestamp`] for parsing it from text.
    pub fn new(
        pipeline: &str,
        start_date: DateTime<Utc>,
        interval_full: Duration,
        interval_incremental: Duration,
    ) -> Result<Self, ScheduleError> {
        if interval_full <= Duration::zero() || interval_incremental <= Duration::zero() {
            return Err(ScheduleError::NonPositiveInterval {
                full: interval_full,
                incremental: interval_incremental,
            });
        }
        if interval_incremental >= interval_full {
            return Err(ScheduleError::IncrementalNotShorter {
                full: interval_full,
                incremental: interval_incremental,
            });
        }
        Ok(Self {
            pipeline: pipeline.to_string(),
            full_refresh_job: Cadence::FullRefresh.job_id(pipeline)?,
            incremental_job: Cadence::Incremental.job_id(pipeline)?,
            start_date,
            interval_full,
            interval_incremental,
            end_date: None,
        })
    }

    pub fn with_end_date(mut self, end_date: DateTime<Utc>) -> Result<Self, ScheduleError> {
        if end_date < self.start_date {
            return Err(ScheduleError::EndBeforeStart {
                start: self.start_date,
                end: end_date,
            });
        }
        self.end_date = Some(end_date);
        Ok(self)
    }

    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    pub fn align(&self) -> AlignedSchedule {
        self.align_at(Utc::now())
    }

    /// Align relative to `now`.
    ///
    /// A start date in the past is moved forward to the last full-refresh
    /// period boundary but one, which bounds catch-up to a couple of periods.
    /// The incremental cadence always starts one full period after the full
    /// refresh cadence.
    pub fn align_at(&self, now: DateTime<Utc>) -> AlignedSchedule {
        // Half an incremental interval of slack avoids off-by-one at exact boundaries.
        let reference = now + self.interval_incremental / 2;
        let full_start = if self.start_date > reference {
            self.start_date
        } else {
            let elapsed = (reference - self.start_date).num_milliseconds();
            let periods = elapsed / self.interval_full.num_milliseconds() - 1;
            self.start_date + Duration::milliseconds(self.interval_full.num_milliseconds() * periods)
        };
        let incremental_start = full_start + self.interval_full;

        debug!(
            pipeline = %self.pipeline,
            %full_start,
            %incremental_start,
            "aligned cadences"
        );

        AlignedSchedule {
            full_refresh: self.schedule(Cadence::FullRefresh, full_start, self.interval_full),
            incremental: self.schedule(
                Cadence::Incremental,
                incremental_start,
                self.interval_incremental,
            ),
        }
    }

    fn schedule(&self, cadence: Cadence, start: DateTime<Utc>, interval: Duration) -> CadenceSchedule {
        CadenceSchedule {
            cadence,
            job_id: match cadence {
                Cadence::FullRefresh => self.full_refresh_job.clone(),
                Cadence::Incremental => self.incremental_job.clone(),
            },
            start,
            interval,
            end: self.end_date,
        }
    }
}
