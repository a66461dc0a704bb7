//! Translates timer-driver intents (start/checkpoint/pause/resume/stop) into
//! store operations, enforcing the "server time is truth" rule: elapsed is
//! always recomputed from the stored start time, and a checkpoint that lands
//! past the target routes to finalize instead of persisting a partial value.

use chrono::Utc;
use log::warn;

use crate::{
    db::{
        models::{CompletedActivityRecord, NewSession, Session, SessionStatus},
        Database,
    },
    elapsed,
    error::{EngineError, Result},
    notifier::{ChangeNotifier, SessionDelta},
};

/// Checkpoint write-suppression policy. Near-simultaneous ticks from many
/// open tabs would otherwise amplify into a write per tick.
#[derive(Debug, Clone, Copy)]
pub struct ReconcilerConfig {
    /// Minimum spacing between persisted checkpoints.
    pub min_checkpoint_spacing_seconds: i64,
    /// Minimum elapsed delta over the last checkpoint before writing.
    pub checkpoint_delta_seconds: i64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            min_checkpoint_spacing_seconds: 5,
            checkpoint_delta_seconds: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointOutcome {
    pub completed: bool,
    /// Server-recomputed elapsed, capped at the target. Returned even when
    /// the debounce policy skipped the write.
    pub elapsed_seconds: i64,
}

#[derive(Clone)]
pub struct SessionReconciler {
    db: Database,
    notifier: ChangeNotifier,
    config: ReconcilerConfig,
}

impl SessionReconciler {
    pub fn new(db: Database, notifier: ChangeNotifier, config: ReconcilerConfig) -> Self {
        Self {
            db,
            notifier,
            config,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Activate a task: reattach to the existing active session for
    /// (user, task) or create a fresh one with `start_time = now`.
    pub async fn start(&self, new: NewSession) -> Result<Session> {
        if new.user_id.trim().is_empty() {
            return Err(EngineError::NotAuthenticated);
        }

        let device_id = new.device_id.clone();
        let session = self.db.upsert_active(new, Utc::now()).await?;
        self.publish(&session, &device_id);
        Ok(session)
    }

    /// Recompute elapsed from the stored start time and either persist a
    /// checkpoint (subject to debounce) or, on overrun, finalize. This is the
    /// auto-completion path that keeps a continuously-open app from silently
    /// running past its target.
    pub async fn checkpoint(
        &self,
        session_id: &str,
        device_id: &str,
    ) -> Result<CheckpointOutcome> {
        let session = self
            .db
            .get_session(session_id)
            .await?
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;

        if session.status == SessionStatus::Completed {
            return Ok(CheckpointOutcome {
                completed: true,
                elapsed_seconds: session.current_duration_seconds,
            });
        }

        let now = Utc::now();
        let computed = elapsed::for_session(&session, now);

        if computed.should_complete {
            self.finalize_session(&session, device_id).await?;
            return Ok(CheckpointOutcome {
                completed: true,
                elapsed_seconds: computed.capped_seconds,
            });
        }

        if session.status == SessionStatus::Focusing && self.should_write(&session, computed) {
            // Non-critical path: a failed checkpoint write is logged and
            // swallowed so the caller's timer keeps running.
            match self
                .db
                .checkpoint_progress(session_id, computed.capped_seconds, device_id, now)
                .await
            {
                Ok(()) => {
                    let mut synced = session.clone();
                    synced.current_duration_seconds = computed.capped_seconds;
                    self.publish(&synced, device_id);
                }
                Err(err) => {
                    warn!("Checkpoint write failed for session {session_id}: {err:#}");
                }
            }
        }

        Ok(CheckpointOutcome {
            completed: false,
            elapsed_seconds: computed.capped_seconds,
        })
    }

    pub async fn pause(&self, session_id: &str, device_id: &str) -> Result<Session> {
        let session = self
            .db
            .mark_paused(session_id, device_id, Utc::now())
            .await?
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;
        self.publish(&session, device_id);
        Ok(session)
    }

    pub async fn resume(&self, session_id: &str, device_id: &str) -> Result<Session> {
        let session = self
            .db
            .mark_resumed(session_id, device_id, Utc::now())
            .await?
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;
        self.publish(&session, device_id);
        Ok(session)
    }

    /// Explicit user stop: same finalize path as auto-completion, with
    /// `end_time = now`, so the record carries actual elapsed time rather
    /// than the target.
    pub async fn stop(
        &self,
        session_id: &str,
        device_id: &str,
    ) -> Result<CompletedActivityRecord> {
        let session = self
            .db
            .get_session(session_id)
            .await?
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;

        self.finalize_session(&session, device_id).await
    }

    async fn finalize_session(
        &self,
        session: &Session,
        device_id: &str,
    ) -> Result<CompletedActivityRecord> {
        let record = self
            .db
            .finalize(&session.id, device_id, Utc::now())
            .await?
            .ok_or_else(|| EngineError::SessionNotFound(session.id.clone()))?;

        // Refetch so the delta carries the finalized duration, not the last
        // checkpoint. A fetch failure here only degrades the notification.
        let completed = match self.db.get_session(&session.id).await {
            Ok(Some(updated)) => updated,
            _ => {
                let mut fallback = session.clone();
                fallback.status = SessionStatus::Completed;
                fallback
            }
        };
        self.publish(&completed, device_id);

        Ok(record)
    }

    fn should_write(&self, session: &Session, computed: elapsed::Elapsed) -> bool {
        let now = Utc::now();
        let spacing = (now - session.updated_at).num_seconds();
        let delta = computed.capped_seconds - session.current_duration_seconds;

        spacing >= self.config.min_checkpoint_spacing_seconds
            && delta >= self.config.checkpoint_delta_seconds
    }

    fn publish(&self, session: &Session, device_id: &str) {
        self.notifier
            .publish(&session.user_id, SessionDelta::from_session(session, device_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::SessionType;
    use chrono::Duration;
    use rusqlite::params;
    use tempfile::TempDir;

    fn test_reconciler() -> (SessionReconciler, TempDir) {
        let dir = TempDir::new().expect("temp dir");
        let db = Database::new(dir.path().join("reconciler.sqlite3")).expect("open db");
        let reconciler = SessionReconciler::new(db, ChangeNotifier::new(), ReconcilerConfig::default());
        (reconciler, dir)
    }

    fn new_session(task_id: &str) -> NewSession {
        NewSession {
            user_id: "student-1".to_string(),
            task_id: task_id.to_string(),
            task_title: "Essay".to_string(),
            session_type: SessionType::Focus,
            target_duration_seconds: 1500,
            device_id: "device-a".to_string(),
        }
    }

    async fn backdate(db: &Database, session_id: &str, start_secs: i64, updated_secs: i64) {
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
        .expect("backdate");
    }

    #[tokio::test]
    async fn empty_user_fails_closed() {
        let (reconciler, _dir) = test_reconciler();
        let mut new = new_session("task-1");
        new.user_id = "  ".to_string();
        let err = reconciler.start(new).await.unwrap_err();
        assert!(matches!(err, EngineError::NotAuthenticated));
    }

    #[tokio::test]
    async fn checkpoint_of_unknown_session_is_not_found() {
        let (reconciler, _dir) = test_reconciler();
        let err = reconciler.checkpoint("no-such-id", "device-a").await.unwrap_err();
        assert!(matches!(err, EngineError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn debounce_skips_write_but_returns_recomputed_elapsed() {
        let (reconciler, _dir) = test_reconciler();
        let session = reconciler.start(new_session("task-1")).await.unwrap();

        // Fresh updated_at: spacing is under the minimum, so no write lands.
        backdate(reconciler.database(), &session.id, 3, 0).await;
        let outcome = reconciler.checkpoint(&session.id, "device-a").await.unwrap();
        assert!(!outcome.completed);
        assert_eq!(outcome.elapsed_seconds, 3);

        let stored = reconciler
            .database()
            .get_session(&session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.current_duration_seconds, 0);
    }

    #[tokio::test]
    async fn debounce_skips_write_when_delta_is_too_small() {
        let dir = TempDir::new().expect("temp dir");
        let db = Database::new(dir.path().join("reconciler.sqlite3")).expect("open db");
        let reconciler = SessionReconciler::new(
            db,
            ChangeNotifier::new(),
            ReconcilerConfig {
                min_checkpoint_spacing_seconds: 5,
                checkpoint_delta_seconds: 60,
            },
        );
        let session = reconciler.start(new_session("task-1")).await.unwrap();

        // Spacing has long passed, but elapsed has not moved far enough past
        // the stored checkpoint to justify a write.
        backdate(reconciler.database(), &session.id, 20, 20).await;
        let outcome = reconciler.checkpoint(&session.id, "device-a").await.unwrap();
        assert!(!outcome.completed);
        assert!((20..=22).contains(&outcome.elapsed_seconds));

        let stored = reconciler
            .database()
            .get_session(&session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.current_duration_seconds, 0);
    }

    #[tokio::test]
    async fn spaced_checkpoint_persists_progress() {
        let (reconciler, _dir) = test_reconciler();
        let session = reconciler.start(new_session("task-1")).await.unwrap();

        backdate(reconciler.database(), &session.id, 30, 30).await;
        let outcome = reconciler.checkpoint(&session.id, "device-b").await.unwrap();
        assert!(!outcome.completed);
        assert_eq!(outcome.elapsed_seconds, 30);

        let stored = reconciler
            .database()
            .get_session(&session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.current_duration_seconds, 30);
        assert_eq!(stored.owner_device_id, "device-b");
    }

    #[tokio::test]
    async fn overrun_checkpoint_finalizes_with_capped_elapsed() {
        let (reconciler, _dir) = test_reconciler();
        let session = reconciler.start(new_session("task-1")).await.unwrap();

        backdate(reconciler.database(), &session.id, 2000, 2000).await;
        let outcome = reconciler.checkpoint(&session.id, "device-a").await.unwrap();
        assert!(outcome.completed);
        assert_eq!(outcome.elapsed_seconds, 1500);

        let stored = reconciler
            .database()
            .get_session(&session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, SessionStatus::Completed);
        assert_eq!(stored.current_duration_seconds, 1500);
    }

    #[tokio::test]
    async fn start_reattaches_instead_of_duplicating() {
        let (reconciler, _dir) = test_reconciler();
        let first = reconciler.start(new_session("task-1")).await.unwrap();
        let second = reconciler.start(new_session("task-1")).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.start_time, second.start_time);

        let count: i64 = reconciler
            .database()
            .execute(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sessions
                     WHERE user_id = 'student-1' AND task_id = 'task-1'
                       AND status IN ('Focusing', 'Paused')",
                    [],
                    |row| row.get(0),
                )?)
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
