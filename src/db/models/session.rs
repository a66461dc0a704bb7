use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionType {
    Focus,
    ShortBreak,
    LongBreak,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Focus => "Focus",
            SessionType::ShortBreak => "ShortBreak",
            SessionType::LongBreak => "LongBreak",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Focusing,
    Paused,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Focusing => "Focusing",
            SessionStatus::Paused => "Paused",
            SessionStatus::Completed => "Completed",
        }
    }

    /// Focusing and Paused sessions occupy the single active slot for a
    /// (user, task) pair; Completed is terminal.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Focusing | SessionStatus::Paused)
    }
}

/// One timed focus/break interval bound to a task and a user. At most one
/// row per (user_id, task_id) holds an active status at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub task_id: String,
    pub task_title: String,
    pub session_type: SessionType,
    pub status: SessionStatus,
    /// Set once at creation, immutable thereafter. Elapsed time is always
    /// derived from this, never from accumulated client counters.
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub target_duration_seconds: i64,
    /// Last checkpointed elapsed; monotonically non-decreasing, <= target.
    pub current_duration_seconds: i64,
    /// Accumulated paused wall-clock, excluded from elapsed.
    pub paused_seconds: i64,
    /// Set while status is Paused, folded into `paused_seconds` on resume.
    pub paused_at: Option<DateTime<Utc>>,
    /// Last device to write this row; diagnostics only, never a lock.
    pub owner_device_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied by the caller when activating a task.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: String,
    pub task_id: String,
    pub task_title: String,
    pub session_type: SessionType,
    pub target_duration_seconds: i64,
    pub device_id: String,
}
