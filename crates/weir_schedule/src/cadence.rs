use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use weir_protocol::defaults::{FULL_REFRESH_JOB_SUFFIX, INCREMENTAL_JOB_SUFFIX};
use weir_protocol::{JobId, ParseError, Strategy};

/// The two cadences every pipeline is split into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    FullRefresh,
    Incremental,
}

impl Cadence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cadence::FullRefresh => "full_refresh",
            Cadence::Incremental => "incremental",
        }
    }

    /// Job id of this cadence for a pipeline name.
    pub fn job_id(&self, pipeline: &str) -> Result<JobId, ParseError> {
        let suffix = match self {
            Cadence::FullRefresh => FULL_REFRESH_JOB_SUFFIX,
            Cadence::Incremental => INCREMENTAL_JOB_SUFFIX,
        };
        JobId::new(format!("{}{}", pipeline, suffix))
    }

    /// Load strategy used by the table jobs of this cadence.
    pub fn strategy(&self) -> Strategy {
        match self {
            Cadence::FullRefresh => Strategy::FullRefresh,
            Cadence::Incremental => Strategy::Incremental,
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Cadence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "full_refresh" | "full" => Ok(Cadence::FullRefresh),
            "incremental" | "inc" => Ok(Cadence::Incremental),
            _ => Err(format!(
                "Invalid cadence: '{}'. Expected: full_refresh or incremental",
                s
            )),
        }
    }
}

/// A fixed-interval cadence: executions at `start + k * interval`, `k >= 0`,
/// optionally bounded by `end`.
///
/// An execution at `ts` covers the period `[ts, ts + interval)` and becomes
/// due once that period has ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CadenceSchedule {
    pub cadence: Cadence,
    pub job_id: JobId,
    pub start: DateTime<Utc>,
    pub interval: Duration,
    pub end: Option<DateTime<Utc>>,
}

impl CadenceSchedule {
    pub fn is_execution_ts(&self, ts: DateTime<Utc>) -> bool {
        if ts < self.start || self.end.is_some_and(|end| ts > end) {
            return false;
        }
        let step = self.interval.num_milliseconds();
        step > 0 && (ts - self.start).num_milliseconds() % step == 0
    }

    /// Execution following `ts`. This is the end of the period `ts` covers.
    pub fn next_execution(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        ts + self.interval
    }

    /// Execution preceding `ts`, if it lies within the cadence.
    pub fn previous_execution(&self, ts: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let prev = ts - self.interval;
        (prev >= self.start).then_some(prev)
    }

    /// Executions whose period has fully elapsed by `now`, oldest first.
    pub fn due_executions(&self, now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let mut out = Vec::new();
        let mut ts = self.start;
        while ts + self.interval <= now && self.end.map_or(true, |end| ts <= end) {
            out.push(ts);
            ts = ts + self.interval;
        }
        out
    }
}
