use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    Start,
    Pause,
    Resume,
    Sync,
    Stop,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Start => "start",
            EventType::Pause => "pause",
            EventType::Resume => "resume",
            EventType::Sync => "sync",
            EventType::Stop => "stop",
        }
    }
}

/// Append-only audit entry for session lifecycle transitions. Rows are never
/// rewritten; `start` and `stop` are guarded to appear at most once per
/// session via existence checks at insert time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    pub id: String,
    pub session_id: String,
    pub event_type: EventType,
    /// Free-form payload: durations, flags. Kept loose for forensics.
    pub event_data: Option<serde_json::Value>,
    pub device_id: String,
    pub created_at: DateTime<Utc>,
}
