use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};

use crate::db::models::{EventType, SessionStatus, SessionType};

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

pub fn parse_date(value: &str, field: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_status(value: &str) -> Result<SessionStatus> {
    match value {
        "Focusing" => Ok(SessionStatus::Focusing),
        "Paused" => Ok(SessionStatus::Paused),
        "Completed" => Ok(SessionStatus::Completed),
        other => Err(anyhow!("unknown session status {other}")),
    }
}

pub fn parse_session_type(value: &str) -> Result<SessionType> {
    match value {
        "Focus" => Ok(SessionType::Focus),
        "ShortBreak" => Ok(SessionType::ShortBreak),
        "LongBreak" => Ok(SessionType::LongBreak),
        other => Err(anyhow!("unknown session type {other}")),
    }
}

pub fn parse_event_type(value: &str) -> Result<EventType> {
    match value {
        "start" => Ok(EventType::Start),
        "pause" => Ok(EventType::Pause),
        "resume" => Ok(EventType::Resume),
        "sync" => Ok(EventType::Sync),
        "stop" => Ok(EventType::Stop),
        other => Err(anyhow!("unknown event type {other}")),
    }
}

pub fn parse_optional_json(value: Option<String>) -> Result<Option<serde_json::Value>> {
    match value {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .context("failed to parse event_data"),
        None => Ok(None),
    }
}
