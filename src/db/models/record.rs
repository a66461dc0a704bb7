use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SessionType;

/// Durable artifact handed to downstream reporting once a session finishes.
/// At most one record exists per (user, task, start, end) tuple; duplicate
/// completion attempts no-op against the existing row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedActivityRecord {
    pub id: String,
    pub user_id: String,
    pub task_id: String,
    pub session_type: SessionType,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Rounded to the nearest minute, never below 1.
    pub duration_minutes: i64,
    /// Calendar date of `start_time` (UTC); timezone shaping belongs to the
    /// reporting layer.
    pub local_date: NaiveDate,
}

impl CompletedActivityRecord {
    /// Build a record from a finished span. `active_seconds` is the elapsed
    /// time with pauses already excluded and the target cap already applied.
    pub fn from_span(
        user_id: String,
        task_id: String,
        session_type: SessionType,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        active_seconds: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            task_id,
            session_type,
            start_time,
            end_time,
            duration_minutes: round_minutes(active_seconds),
            local_date: start_time.date_naive(),
        }
    }
}

/// Round seconds to the nearest whole minute with a floor of 1, so even a
/// 10-second session reports as one minute.
pub fn round_minutes(seconds: i64) -> i64 {
    ((seconds.max(0) + 30) / 60).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_never_produces_zero() {
        assert_eq!(round_minutes(0), 1);
        assert_eq!(round_minutes(10), 1);
        assert_eq!(round_minutes(29), 1);
    }

    #[test]
    fn rounds_to_nearest_minute() {
        assert_eq!(round_minutes(89), 1);
        assert_eq!(round_minutes(90), 2);
        assert_eq!(round_minutes(1500), 25);
    }
}
