//! Application root for the focus-session engine: owns the database,
//! reconciler, and notifier, exposes the external operations, and runs the
//! abandoned-session sweeper. Per-process client pieces (driver, recovery
//! coordinator) are constructed through it so everything shares one stack.

use std::{path::PathBuf, time::Duration};

use chrono::Utc;
use log::{error, info};
use tokio::{sync::broadcast, task::JoinHandle, time};
use tokio_util::sync::CancellationToken;

use crate::{
    db::{
        models::{CompletedActivityRecord, NewSession, Session, SessionEvent, SessionType},
        Database,
    },
    error::{EngineError, Result},
    notifier::{ChangeNotifier, SessionDelta},
    reconciler::{CheckpointOutcome, ReconcilerConfig, SessionReconciler},
    recovery::RecoveryCoordinator,
    timer::{ClientTimerDriver, DriverConfig},
};

const SWEEP_DEVICE_ID: &str = "sweeper";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub db_path: PathBuf,
    pub reconciler: ReconcilerConfig,
    pub driver: DriverConfig,
    /// A Focusing session with no checkpoint for this long is presumed
    /// abandoned and force-completed.
    pub staleness_window: chrono::Duration,
    pub sweep_interval: Duration,
}

impl EngineConfig {
    pub fn new(db_path: PathBuf) -> Self {
        Self {
            db_path,
            reconciler: ReconcilerConfig::default(),
            driver: DriverConfig::default(),
            staleness_window: chrono::Duration::hours(1),
            sweep_interval: Duration::from_secs(300),
        }
    }
}

#[derive(Clone)]
pub struct FocusEngine {
    db: Database,
    notifier: ChangeNotifier,
    reconciler: SessionReconciler,
    config: EngineConfig,
}

impl FocusEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let db = Database::new(config.db_path.clone())?;
        let notifier = ChangeNotifier::new();
        let reconciler = SessionReconciler::new(db.clone(), notifier.clone(), config.reconciler);

        Ok(Self {
            db,
            notifier,
            reconciler,
            config,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn reconciler(&self) -> &SessionReconciler {
        &self.reconciler
    }

    /// Activate a task. Reattaches to an existing active session for the
    /// same (user, task) instead of ever creating a duplicate.
    #[allow(clippy::too_many_arguments)]
    pub async fn start_session(
        &self,
        user_id: &str,
        task_id: &str,
        task_title: &str,
        session_type: SessionType,
        target_duration_seconds: i64,
        device_id: &str,
    ) -> Result<Session> {
        self.reconciler
            .start(NewSession {
                user_id: user_id.to_string(),
                task_id: task_id.to_string(),
                task_title: task_title.to_string(),
                session_type,
                target_duration_seconds,
                device_id: device_id.to_string(),
            })
            .await
    }

    pub async fn checkpoint_session(
        &self,
        session_id: &str,
        device_id: &str,
    ) -> Result<CheckpointOutcome> {
        self.reconciler.checkpoint(session_id, device_id).await
    }

    pub async fn pause_session(&self, session_id: &str, device_id: &str) -> Result<Session> {
        self.reconciler.pause(session_id, device_id).await
    }

    pub async fn resume_session(&self, session_id: &str, device_id: &str) -> Result<Session> {
        self.reconciler.resume(session_id, device_id).await
    }

    pub async fn stop_session(
        &self,
        session_id: &str,
        device_id: &str,
    ) -> Result<CompletedActivityRecord> {
        self.reconciler.stop(session_id, device_id).await
    }

    pub async fn get_active_session(
        &self,
        user_id: &str,
        task_id: &str,
    ) -> Result<Option<Session>> {
        if user_id.trim().is_empty() {
            return Err(EngineError::NotAuthenticated);
        }
        Ok(self.db.get_active(user_id, task_id).await?)
    }

    /// Audit trail for one session.
    pub async fn session_events(&self, session_id: &str) -> Result<Vec<SessionEvent>> {
        Ok(self.db.list_events(session_id).await?)
    }

    /// Completed-activity history for reporting.
    pub async fn completed_activities(
        &self,
        user_id: &str,
    ) -> Result<Vec<CompletedActivityRecord>> {
        if user_id.trim().is_empty() {
            return Err(EngineError::NotAuthenticated);
        }
        Ok(self.db.list_completed(user_id).await?)
    }

    /// Change-notification subscription scoped to one user.
    pub fn subscribe(&self, user_id: &str) -> broadcast::Receiver<SessionDelta> {
        self.notifier.subscribe(user_id)
    }

    /// Construct the per-process local countdown.
    pub fn new_driver(&self, device_id: &str) -> ClientTimerDriver {
        ClientTimerDriver::new(
            self.reconciler.clone(),
            device_id.to_string(),
            self.config.driver,
        )
    }

    /// Construct the per-process recovery coordinator bound to a driver.
    pub fn new_recovery(&self, driver: ClientTimerDriver) -> RecoveryCoordinator {
        RecoveryCoordinator::new(self.db.clone(), self.reconciler.clone(), driver)
    }

    /// One sweep pass: force-complete sessions whose last checkpoint is
    /// older than the staleness window.
    pub async fn sweep_abandoned(&self) -> Result<Vec<CompletedActivityRecord>> {
        let swept = self
            .db
            .sweep_abandoned(self.config.staleness_window, SWEEP_DEVICE_ID, Utc::now())
            .await?;

        let mut records = Vec::with_capacity(swept.len());
        for (session, record) in swept {
            self.notifier.publish(
                &session.user_id,
                SessionDelta::from_session(&session, SWEEP_DEVICE_ID),
            );
            records.push(record);
        }

        Ok(records)
    }

    /// Periodic maintenance task. A skipped or failed pass only delays
    /// cleanup; the next pass picks the same sessions up again.
    pub fn spawn_sweeper(&self) -> (JoinHandle<()>, CancellationToken) {
        let engine = self.clone();
        let token = CancellationToken::new();
        let child = token.child_token();

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(engine.config.sweep_interval);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = interval.tick() => {
                        match engine.sweep_abandoned().await {
                            Ok(records) if !records.is_empty() => {
                                info!("Sweep force-completed {} sessions", records.len());
                            }
                            Ok(_) => {}
                            Err(err) => error!("Abandoned-session sweep failed: {err}"),
                        }
                    }
                }
            }
        });

        (handle, token)
    }
}
