//! Append-only session event log, used for diagnostics and conflict
//! forensics. Entries are never rewritten; `start`/`stop` uniqueness comes
//! from existence checks at insert time, not locking.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::{
    helpers::{parse_datetime, parse_event_type, parse_optional_json},
    models::{EventType, SessionEvent},
    Database,
};

/// Append one audit entry on the worker thread's connection, so callers can
/// bundle it with the mutation it describes.
pub(crate) fn append_event(
    conn: &Connection,
    session_id: &str,
    event_type: EventType,
    event_data: Option<serde_json::Value>,
    device_id: &str,
    created_at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO session_events (id, session_id, event_type, event_data, device_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            Uuid::new_v4().to_string(),
            session_id,
            event_type.as_str(),
            event_data.map(|value| value.to_string()),
            device_id,
            created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub(crate) fn has_event(
    conn: &Connection,
    session_id: &str,
    event_type: EventType,
) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM session_events
             WHERE session_id = ?1 AND event_type = ?2
             LIMIT 1",
            params![session_id, event_type.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Append an event only if none of its type exists for the session yet.
/// Returns whether a row was written. Guards `start` and `stop`, which must
/// each appear at most once even under concurrent completion attempts.
pub(crate) fn append_event_once(
    conn: &Connection,
    session_id: &str,
    event_type: EventType,
    event_data: Option<serde_json::Value>,
    device_id: &str,
    created_at: DateTime<Utc>,
) -> Result<bool> {
    if has_event(conn, session_id, event_type)? {
        return Ok(false);
    }
    append_event(conn, session_id, event_type, event_data, device_id, created_at)?;
    Ok(true)
}

impl Database {
    /// Full audit trail for one session, oldest first.
    pub async fn list_events(&self, session_id: &str) -> Result<Vec<SessionEvent>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, event_type, event_data, device_id, created_at
                 FROM session_events
                 WHERE session_id = ?1
                 ORDER BY created_at ASC, id ASC",
            )?;

            let mut rows = stmt.query(params![session_id])?;
            let mut events = Vec::new();
            while let Some(row) = rows.next()? {
                events.push(SessionEvent {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    event_type: parse_event_type(&row.get::<_, String>(2)?)?,
                    event_data: parse_optional_json(row.get::<_, Option<String>>(3)?)?,
                    device_id: row.get(4)?,
                    created_at: parse_datetime(&row.get::<_, String>(5)?, "created_at")?,
                });
            }

            Ok(events)
        })
        .await
    }
}
