//! ISO-8601 style durations: `PnW`, `PnD`, `PTnH`, `PTnM`, `PTnS` and
//! combinations such as `P1DT12H`.

use crate::error::ParseError;
use chrono::Duration;

const HINT: &str = "Use PnW, PnD, PTnH, PTnM, PTnS or a combination such as P1DT6H.";

pub fn parse_duration(raw: &str) -> Result<Duration, ParseError> {
    let invalid = || ParseError::invalid("duration", raw, HINT);
    let body = raw.trim().strip_prefix('P').ok_or_else(invalid)?;
    if body.is_empty() {
        return Err(invalid());
    }

    let (date_part, time_part) = match body.split_once('T') {
        Some((date, time)) if !time.is_empty() => (date, Some(time)),
        Some(_) => return Err(invalid()),
        None => (body, None),
    };

    let mut total = Duration::zero();
    for (amount, unit) in components(date_part).ok_or_else(invalid)? {
        total = total
            + match unit {
                'W' => Duration::weeks(amount),
                'D' => Duration::days(amount),
                _ => return Err(invalid()),
            };
    }
    if let Some(time_part) = time_part {
        for (amount, unit) in components(time_part).ok_or_else(invalid)? {
            total = total
                + match unit {
                    'H' => Duration::hours(amount),
                    'M' => Duration::minutes(amount),
                    'S' => Duration::seconds(amount),
                    _ => return Err(invalid()),
                };
        }
    }
    Ok(total)
}

fn components(part: &str) -> Option<Vec<(i64, char)>> {
    let mut out = Vec::new();
    let mut digits = String::new();
    for ch in part.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
        } else {
            if digits.is_empty() {
                return None;
            }
            out.push((digits.parse().ok()?, ch));
            digits.clear();
        }
    }
    if !digits.is_empty() {
        return None;
    }
    Some(out)
}

/// Render a duration in the same notation `parse_duration` accepts.
pub fn format_duration(duration: Duration) -> String {
    let mut secs = duration.num_seconds();
    if secs == 0 {
        return "PT0S".to_string();
    }
    let sign = if secs < 0 { "-" } else { "" };
    secs = secs.abs();
    let days = secs / 86_400;
    secs %= 86_400;
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);

    let mut out = format!("{}P", sign);
    if days > 0 {
        out.push_str(&format!("{}D", days));
    }
    if hours > 0 || minutes > 0 || seconds > 0 {
        out.push('T');
        if hours > 0 {
            out.push_str(&format!("{}H", hours));
        }
        if minutes > 0 {
            out.push_str(&format!("{}M", minutes));
        }
        if seconds > 0 {
            out.push_str(&format!("{}S", seconds));
        }
    }
    out
}
