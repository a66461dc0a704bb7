#![allow(dead_code)]

use chrono::{Duration, Utc};
use deepwork::db::Database;
use deepwork::{EngineConfig, FocusEngine};
use rusqlite::params;
use tempfile::TempDir;

pub const USER: &str = "student-1";
pub const TASK: &str = "task-essay";

pub fn test_engine() -> (FocusEngine, TempDir) {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().expect("temp dir");
    let engine = FocusEngine::new(EngineConfig::new(dir.path().join("deepwork.sqlite3")))
        .expect("engine should initialize");
    (engine, dir)
}

pub fn test_engine_with(config_fn: impl FnOnce(&mut EngineConfig)) -> (FocusEngine, TempDir) {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().expect("temp dir");
    let mut config = EngineConfig::new(dir.path().join("deepwork.sqlite3"));
    config_fn(&mut config);
    let engine = FocusEngine::new(config).expect("engine should initialize");
    (engine, dir)
}

/// Backdate a session's start and last-checkpoint timestamps to simulate a
/// client that went away for a while.
pub async fn shift_session(db: &Database, session_id: &str, start_secs: i64, updated_secs: i64) {
    let session_id = session_id.to_string();
    db.execute(move |conn| {
        conn.execute(
            "UPDATE sessions SET start_time = ?1, updated_at = ?2 WHERE id = ?3",
            params![
                (Utc::now() - Duration::seconds(start_secs)).to_rfc3339(),
                (Utc::now() - Duration::seconds(updated_secs)).to_rfc3339(),
                session_id,
            ],
        )?;
        Ok(())
    })
    .await
    .expect("shift session timestamps");
}

/// Break a session row so fetches fail to parse it, simulating a transient
/// store fault on the read path.
pub async fn corrupt_start_time(db: &Database, session_id: &str) {
    let session_id = session_id.to_string();
    db.execute(move |conn| {
        conn.execute(
            "UPDATE sessions SET start_time = 'not-a-timestamp' WHERE id = ?1",
            params![session_id],
        )?;
        Ok(())
    })
    .await
    .expect("corrupt start_time");
}

/// Backdate the open pause marker to simulate time spent paused.
pub async fn shift_paused_at(db: &Database, session_id: &str, secs: i64) {
    let session_id = session_id.to_string();
    db.execute(move |conn| {
        conn.execute(
            "UPDATE sessions SET paused_at = ?1 WHERE id = ?2",
            params![
                (Utc::now() - Duration::seconds(secs)).to_rfc3339(),
                session_id,
            ],
        )?;
        Ok(())
    })
    .await
    .expect("shift paused_at");
}
