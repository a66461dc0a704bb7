//! Authoritative session store. One active row per (user, task), enforced by
//! find-or-create semantics rather than unique-constraint violations, and an
//! idempotent finalize path that racing devices can both call safely.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use rusqlite::{params, Connection, Row};

use crate::db::{
    helpers::{parse_datetime, parse_optional_datetime, parse_session_type, parse_status},
    models::{CompletedActivityRecord, EventType, NewSession, Session, SessionStatus},
    repositories::events::{append_event, append_event_once},
    repositories::records::{find_record, insert_record_if_absent},
    Database,
};
use crate::elapsed;

const SESSION_COLUMNS: &str = "id, user_id, task_id, task_title, session_type, status, \
     start_time, end_time, target_duration_seconds, current_duration_seconds, \
     paused_seconds, paused_at, owner_device_id, created_at, updated_at";

fn row_to_session(row: &Row) -> Result<Session> {
    Ok(Session {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        task_id: row.get("task_id")?,
        task_title: row.get("task_title")?,
        session_type: parse_session_type(&row.get::<_, String>("session_type")?)?,
        status: parse_status(&row.get::<_, String>("status")?)?,
        start_time: parse_datetime(&row.get::<_, String>("start_time")?, "start_time")?,
        end_time: parse_optional_datetime(row.get::<_, Option<String>>("end_time")?, "end_time")?,
        target_duration_seconds: row.get("target_duration_seconds")?,
        current_duration_seconds: row.get("current_duration_seconds")?,
        paused_seconds: row.get("paused_seconds")?,
        paused_at: parse_optional_datetime(row.get::<_, Option<String>>("paused_at")?, "paused_at")?,
        owner_device_id: row.get("owner_device_id")?,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?, "created_at")?,
        updated_at: parse_datetime(&row.get::<_, String>("updated_at")?, "updated_at")?,
    })
}

fn get_session_on_conn(conn: &Connection, session_id: &str) -> Result<Option<Session>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"
    ))?;

    let mut rows = stmt.query(params![session_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_session(row)?)),
        None => Ok(None),
    }
}

fn get_active_on_conn(conn: &Connection, user_id: &str, task_id: &str) -> Result<Option<Session>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SESSION_COLUMNS} FROM sessions
         WHERE user_id = ?1 AND task_id = ?2 AND status IN ('Focusing', 'Paused')
         ORDER BY start_time DESC
         LIMIT 1"
    ))?;

    let mut rows = stmt.query(params![user_id, task_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_session(row)?)),
        None => Ok(None),
    }
}

fn fold_open_pause(session: &Session, now: DateTime<Utc>) -> i64 {
    let mut paused = session.paused_seconds;
    if session.status == SessionStatus::Paused {
        if let Some(paused_at) = session.paused_at {
            paused += (now - paused_at).num_seconds().max(0);
        }
    }
    paused
}

/// Transition a session to Completed and produce its permanent record.
/// Idempotent: an already-completed session returns the existing record, and
/// the `stop` event is written at most once. The whole operation runs in one
/// transaction on the worker thread's connection.
pub(crate) fn finalize_on_conn(
    conn: &mut Connection,
    session_id: &str,
    device_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<CompletedActivityRecord>> {
    let tx = conn.transaction()?;

    let Some(session) = get_session_on_conn(&tx, session_id)? else {
        return Ok(None);
    };

    if session.status == SessionStatus::Completed {
        let end_time = session.end_time.unwrap_or(session.updated_at);
        let record = match find_record(
            &tx,
            &session.user_id,
            &session.task_id,
            session.start_time,
            end_time,
        )? {
            Some(existing) => existing,
            None => {
                // Completed row without its record: rebuild from stored fields.
                warn!("Session {session_id} completed without a record; repairing");
                let rebuilt = CompletedActivityRecord::from_span(
                    session.user_id.clone(),
                    session.task_id.clone(),
                    session.session_type,
                    session.start_time,
                    end_time,
                    session.current_duration_seconds,
                );
                insert_record_if_absent(&tx, &rebuilt)?
            }
        };
        tx.commit()?;
        return Ok(Some(record));
    }

    let paused = fold_open_pause(&session, now);
    let computed = elapsed::compute(
        session.start_time,
        session.target_duration_seconds,
        paused,
        now,
    );
    // Recomputed from the actual span, not the last checkpoint, to correct
    // for checkpoint drift.
    let active_seconds = computed.capped_seconds;

    let record = CompletedActivityRecord::from_span(
        session.user_id.clone(),
        session.task_id.clone(),
        session.session_type,
        session.start_time,
        now,
        active_seconds,
    );
    let record = insert_record_if_absent(&tx, &record)?;

    tx.execute(
        "UPDATE sessions
         SET status = ?1,
             end_time = ?2,
             current_duration_seconds = ?3,
             paused_seconds = ?4,
             paused_at = NULL,
             owner_device_id = ?5,
             updated_at = ?6
         WHERE id = ?7",
        params![
            SessionStatus::Completed.as_str(),
            now.to_rfc3339(),
            active_seconds,
            paused,
            device_id,
            now.to_rfc3339(),
            session_id,
        ],
    )?;

    append_event_once(
        &tx,
        session_id,
        EventType::Stop,
        Some(serde_json::json!({ "activeSeconds": active_seconds })),
        device_id,
        now,
    )?;

    tx.commit()?;
    info!(
        "Finalized session {session_id}: {active_seconds}s active, {} min recorded",
        record.duration_minutes
    );
    Ok(Some(record))
}

impl Database {
    /// Create-or-reattach the single active session for (user, task). An
    /// existing Focusing/Paused row is updated in place (a paused one is
    /// resumed); only first creation writes the `start` event.
    pub async fn upsert_active(
        &self,
        new: NewSession,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        self.execute(move |conn| {
            if let Some(existing) = get_active_on_conn(conn, &new.user_id, &new.task_id)? {
                let (status, paused_seconds) = match existing.status {
                    SessionStatus::Paused => (
                        SessionStatus::Focusing,
                        fold_open_pause(&existing, now),
                    ),
                    _ => (existing.status, existing.paused_seconds),
                };

                conn.execute(
                    "UPDATE sessions
                     SET status = ?1,
                         paused_seconds = ?2,
                         paused_at = NULL,
                         owner_device_id = ?3,
                         updated_at = ?4
                     WHERE id = ?5",
                    params![
                        status.as_str(),
                        paused_seconds,
                        new.device_id,
                        now.to_rfc3339(),
                        existing.id,
                    ],
                )?;

                append_event(
                    conn,
                    &existing.id,
                    EventType::Sync,
                    Some(serde_json::json!({ "reattached": true })),
                    &new.device_id,
                    now,
                )?;

                return get_session_on_conn(conn, &existing.id)?
                    .ok_or_else(|| anyhow::anyhow!("session vanished during upsert"));
            }

            let session = Session {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: new.user_id.clone(),
                task_id: new.task_id.clone(),
                task_title: new.task_title.clone(),
                session_type: new.session_type,
                status: SessionStatus::Focusing,
                start_time: now,
                end_time: None,
                target_duration_seconds: new.target_duration_seconds,
                current_duration_seconds: 0,
                paused_seconds: 0,
                paused_at: None,
                owner_device_id: new.device_id.clone(),
                created_at: now,
                updated_at: now,
            };

            conn.execute(
                "INSERT INTO sessions
                     (id, user_id, task_id, task_title, session_type, status,
                      start_time, end_time, target_duration_seconds,
                      current_duration_seconds, paused_seconds, paused_at,
                      owner_device_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8, 0, 0, NULL, ?9, ?10, ?11)",
                params![
                    session.id,
                    session.user_id,
                    session.task_id,
                    session.task_title,
                    session.session_type.as_str(),
                    session.status.as_str(),
                    session.start_time.to_rfc3339(),
                    session.target_duration_seconds,
                    session.owner_device_id,
                    session.created_at.to_rfc3339(),
                    session.updated_at.to_rfc3339(),
                ],
            )?;

            append_event_once(
                conn,
                &session.id,
                EventType::Start,
                Some(serde_json::json!({
                    "targetDurationSeconds": session.target_duration_seconds,
                    "sessionType": session.session_type.as_str(),
                })),
                &new.device_id,
                now,
            )?;

            Ok(session)
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| get_session_on_conn(conn, &session_id))
            .await
    }

    pub async fn get_active(&self, user_id: &str, task_id: &str) -> Result<Option<Session>> {
        let user_id = user_id.to_string();
        let task_id = task_id.to_string();
        self.execute(move |conn| get_active_on_conn(conn, &user_id, &task_id))
            .await
    }

    /// Focusing -> Paused. Already-paused or completed sessions are returned
    /// unchanged; callers read the status off the result.
    pub async fn mark_paused(
        &self,
        session_id: &str,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        let session_id = session_id.to_string();
        let device_id = device_id.to_string();
        self.execute(move |conn| {
            let Some(session) = get_session_on_conn(conn, &session_id)? else {
                return Ok(None);
            };
            if session.status != SessionStatus::Focusing {
                return Ok(Some(session));
            }

            conn.execute(
                "UPDATE sessions
                 SET status = ?1, paused_at = ?2, owner_device_id = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![
                    SessionStatus::Paused.as_str(),
                    now.to_rfc3339(),
                    device_id,
                    now.to_rfc3339(),
                    session_id,
                ],
            )?;

            append_event(
                conn,
                &session_id,
                EventType::Pause,
                Some(serde_json::json!({
                    "elapsedSeconds": elapsed::for_session(&session, now).capped_seconds,
                })),
                &device_id,
                now,
            )?;

            get_session_on_conn(conn, &session_id)
        })
        .await
    }

    /// Paused -> Focusing, folding the open pause span into `paused_seconds`
    /// so paused wall-clock stays excluded from elapsed.
    pub async fn mark_resumed(
        &self,
        session_id: &str,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        let session_id = session_id.to_string();
        let device_id = device_id.to_string();
        self.execute(move |conn| {
            let Some(session) = get_session_on_conn(conn, &session_id)? else {
                return Ok(None);
            };
            if session.status != SessionStatus::Paused {
                return Ok(Some(session));
            }

            let paused_seconds = fold_open_pause(&session, now);

            conn.execute(
                "UPDATE sessions
                 SET status = ?1, paused_seconds = ?2, paused_at = NULL,
                     owner_device_id = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![
                    SessionStatus::Focusing.as_str(),
                    paused_seconds,
                    device_id,
                    now.to_rfc3339(),
                    session_id,
                ],
            )?;

            append_event(
                conn,
                &session_id,
                EventType::Resume,
                Some(serde_json::json!({ "pausedSeconds": paused_seconds })),
                &device_id,
                now,
            )?;

            get_session_on_conn(conn, &session_id)
        })
        .await
    }

    /// Persist a recomputed elapsed value. The MAX keeps the checkpoint
    /// monotonically non-decreasing even if writes land out of order.
    pub async fn checkpoint_progress(
        &self,
        session_id: &str,
        elapsed_seconds: i64,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        let device_id = device_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE sessions
                 SET current_duration_seconds = MAX(current_duration_seconds, ?1),
                     owner_device_id = ?2,
                     updated_at = ?3
                 WHERE id = ?4",
                params![
                    elapsed_seconds,
                    device_id,
                    now.to_rfc3339(),
                    session_id,
                ],
            )?;

            append_event(
                conn,
                &session_id,
                EventType::Sync,
                Some(serde_json::json!({ "elapsedSeconds": elapsed_seconds })),
                &device_id,
                now,
            )?;

            Ok(())
        })
        .await
    }

    /// Idempotent completion; see [`finalize_on_conn`]. Returns `None` when
    /// the session does not exist.
    pub async fn finalize(
        &self,
        session_id: &str,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CompletedActivityRecord>> {
        let session_id = session_id.to_string();
        let device_id = device_id.to_string();
        self.execute(move |conn| finalize_on_conn(conn, &session_id, &device_id, now))
            .await
    }

    /// Force-complete Focusing sessions whose last checkpoint is older than
    /// `staleness`. Returns the finalized sessions with their records.
    /// Idempotent; skipping a run only delays cleanup.
    pub async fn sweep_abandoned(
        &self,
        staleness: Duration,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<(Session, CompletedActivityRecord)>> {
        let device_id = device_id.to_string();
        self.execute(move |conn| {
            let cutoff = now - staleness;

            let stale_ids: Vec<String> = {
                let mut stmt = conn.prepare(
                    "SELECT id, updated_at FROM sessions WHERE status = 'Focusing'",
                )?;
                let mut rows = stmt.query([])?;
                let mut ids = Vec::new();
                while let Some(row) = rows.next()? {
                    let id: String = row.get(0)?;
                    let updated_at =
                        parse_datetime(&row.get::<_, String>(1)?, "updated_at")?;
                    if updated_at < cutoff {
                        ids.push(id);
                    }
                }
                ids
            };

            let mut records = Vec::new();
            for id in stale_ids {
                warn!("Sweeping abandoned session {id}");
                if let Some(record) = finalize_on_conn(conn, &id, &device_id, now)? {
                    if let Some(session) = get_session_on_conn(conn, &id)? {
                        records.push((session, record));
                    }
                }
            }

            Ok(records)
        })
        .await
    }
}
