//! Durable completed-activity sink consumed by downstream reporting.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::db::{
    helpers::{parse_date, parse_datetime, parse_session_type},
    models::CompletedActivityRecord,
    Database,
};

fn row_to_record(row: &Row) -> Result<CompletedActivityRecord> {
    Ok(CompletedActivityRecord {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        task_id: row.get("task_id")?,
        session_type: parse_session_type(&row.get::<_, String>("session_type")?)?,
        start_time: parse_datetime(&row.get::<_, String>("start_time")?, "start_time")?,
        end_time: parse_datetime(&row.get::<_, String>("end_time")?, "end_time")?,
        duration_minutes: row.get("duration_minutes")?,
        local_date: parse_date(&row.get::<_, String>("local_date")?, "local_date")?,
    })
}

pub(crate) fn find_record(
    conn: &Connection,
    user_id: &str,
    task_id: &str,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
) -> Result<Option<CompletedActivityRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, task_id, session_type, start_time, end_time,
                duration_minutes, local_date
         FROM completed_activities
         WHERE user_id = ?1 AND task_id = ?2 AND start_time = ?3 AND end_time = ?4",
    )?;

    let mut rows = stmt.query(params![
        user_id,
        task_id,
        start_time.to_rfc3339(),
        end_time.to_rfc3339(),
    ])?;

    match rows.next()? {
        Some(row) => Ok(Some(row_to_record(row)?)),
        None => Ok(None),
    }
}

/// Insert the record unless one already exists for the same span. Returns the
/// surviving row either way, so racing completions converge on one result.
pub(crate) fn insert_record_if_absent(
    conn: &Connection,
    record: &CompletedActivityRecord,
) -> Result<CompletedActivityRecord> {
    if let Some(existing) = find_record(
        conn,
        &record.user_id,
        &record.task_id,
        record.start_time,
        record.end_time,
    )? {
        return Ok(existing);
    }

    conn.execute(
        "INSERT INTO completed_activities
             (id, user_id, task_id, session_type, start_time, end_time,
              duration_minutes, local_date)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            record.id,
            record.user_id,
            record.task_id,
            record.session_type.as_str(),
            record.start_time.to_rfc3339(),
            record.end_time.to_rfc3339(),
            record.duration_minutes,
            record.local_date.to_string(),
        ],
    )?;

    Ok(record.clone())
}

impl Database {
    /// Completed activity history for a user, newest first.
    pub async fn list_completed(&self, user_id: &str) -> Result<Vec<CompletedActivityRecord>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, task_id, session_type, start_time, end_time,
                        duration_minutes, local_date
                 FROM completed_activities
                 WHERE user_id = ?1
                 ORDER BY start_time DESC",
            )?;

            let mut rows = stmt.query(params![user_id])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(row_to_record(row)?);
            }

            Ok(records)
        })
        .await
    }
}
