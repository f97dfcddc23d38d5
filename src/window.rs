use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Timestamp format used by the monitoring API, both in request windows and
/// in per-sample dates. Naive local time; the API never reports an offset.
pub const DT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const LOOKBACK_DAYS: i64 = 30;

/// Request window for one poll cycle, in site-local time. Computed fresh
/// every cycle, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct PollWindow {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
}

impl PollWindow {
    /// Window from the last checkpoint through `now`.
    ///
    /// The start is one minute past the checkpoint so the checkpoint instant
    /// itself is not re-requested. Without a checkpoint the window falls back
    /// to a fixed 30-day lookback.
    pub fn compute(checkpoint: Option<DateTime<Utc>>, now: DateTime<Utc>, tz: Tz) -> Self {
        let start = match checkpoint {
            Some(ts) => (ts + Duration::minutes(1)).with_timezone(&tz),
            None => (now - Duration::days(LOOKBACK_DAYS)).with_timezone(&tz),
        };
        Self {
            start,
            end: now.with_timezone(&tz),
        }
    }

    pub fn start_param(&self) -> String {
        self.start.format(DT_FORMAT).to_string()
    }

    pub fn end_param(&self) -> String {
        self.end.format(DT_FORMAT).to_string()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LocalizeError {
    #[error("invalid timestamp '{0}'")]
    Parse(String),
    #[error("local time '{0}' does not exist in zone {1}")]
    Nonexistent(String, Tz),
}

/// Parses a naive `YYYY-MM-DD HH:MM:SS` string and localizes it in `tz`.
///
/// Ambiguous local times (DST fall-back) resolve to the earlier instant.
/// Nonexistent local times (spring-forward gap) are rejected: the API
/// reports quarter-hour slots in local time, so a nonexistent slot means
/// payload and configured zone disagree.
pub fn localize(s: &str, tz: Tz) -> Result<DateTime<Utc>, LocalizeError> {
    let naive = NaiveDateTime::parse_from_str(s, DT_FORMAT)
        .map_err(|_| LocalizeError::Parse(s.to_string()))?;
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earlier, _) => Ok(earlier.with_timezone(&Utc)),
        LocalResult::None => Err(LocalizeError::Nonexistent(s.to_string(), tz)),
    }
}
