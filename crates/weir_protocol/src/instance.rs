use crate::ids::{JobId, RunId};
use crate::types::InstanceState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One scheduled execution of a job cadence, keyed by `(job_id, execution_ts)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInstance {
    pub job_id: JobId,
    pub execution_ts: DateTime<Utc>,
    pub run_id: Option<RunId>,
    pub state: InstanceState,
    pub updated_at: DateTime<Utc>,
}

impl JobInstance {
    pub fn pending(job_id: JobId, execution_ts: DateTime<Utc>) -> Self {
        Self {
            job_id,
            execution_ts,
            run_id: None,
            state: InstanceState::Pending,
            updated_at: Utc::now(),
        }
    }
}

/// Half-open extraction window `[from, until)`. Either bound may be open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Watermark {
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl Watermark {
    pub fn new(from: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        Self { from, until }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.until.is_none()
    }

    /// Whether `ts` falls inside the window.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| ts >= from) && self.until.map_or(true, |until| ts < until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn window_is_half_open() {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let until = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        let window = Watermark::new(Some(from), Some(until));

        assert!(window.contains(from));
        assert!(!window.contains(until));
        assert!(Watermark::unbounded().contains(until));
    }
}
