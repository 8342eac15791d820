use chrono::{DateTime, TimeZone, Utc};
use weir_protocol::RecordBatch;

/// Batch from a JSON array of objects.
pub fn json_batch(rows: serde_json::Value) -> RecordBatch {
    match rows {
        serde_json::Value::Array(rows) => RecordBatch::from_json_rows(rows),
        other => RecordBatch::from_json_rows(vec![other]),
    }
}

/// Whole-hour UTC timestamp.
pub fn utc(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0)
        .single()
        .unwrap_or_else(|| panic!("invalid fixture timestamp {year}-{month}-{day} {hour}:00"))
}
