//! Reconciliation of a resumed client against the authoritative store after
//! an arbitrary gap: app start, tab-visibility regain, device wake. Fetches
//! the active session, asks the elapsed calculator whether it should already
//! be complete, and either finalizes it or reseeds the local driver with the
//! corrected elapsed value.

use chrono::Utc;
use log::{info, warn};
use tokio::sync::{watch, Mutex};

use crate::{
    db::{models::SessionStatus, Database},
    elapsed,
    reconciler::SessionReconciler,
    timer::ClientTimerDriver,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPhase {
    Idle,
    Recovering,
    Resumed,
    Completed,
}

/// Result of one recovery run. `Failed` is retryable: the local driver keeps
/// ticking on its last-known state, and the caller retries on the next
/// visibility event. It never implies completion or a reset to zero.
#[derive(Debug, Clone)]
pub enum RecoveryOutcome {
    NoSession,
    Resumed {
        session_id: String,
        elapsed_seconds: i64,
        target_duration_seconds: i64,
    },
    Completed {
        session_id: String,
        duration_seconds: i64,
    },
    Failed {
        message: String,
    },
}

struct Gate {
    phase: RecoveryPhase,
    inflight: Option<watch::Receiver<Option<RecoveryOutcome>>>,
}

pub struct RecoveryCoordinator {
    db: Database,
    reconciler: SessionReconciler,
    driver: ClientTimerDriver,
    gate: Mutex<Gate>,
}

impl RecoveryCoordinator {
    pub fn new(db: Database, reconciler: SessionReconciler, driver: ClientTimerDriver) -> Self {
        Self {
            db,
            reconciler,
            driver,
            gate: Mutex::new(Gate {
                phase: RecoveryPhase::Idle,
                inflight: None,
            }),
        }
    }

    pub async fn phase(&self) -> RecoveryPhase {
        self.gate.lock().await.phase
    }

    /// Safe to invoke repeatedly and concurrently (rapid tab-switch spam):
    /// only one run is in flight per process, and callers arriving while it
    /// runs await that run's outcome instead of starting a second one.
    pub async fn recover(
        &self,
        user_id: &str,
        task_id: &str,
        device_id: &str,
    ) -> RecoveryOutcome {
        let (tx, rx) = watch::channel(None);

        let joined = {
            let mut gate = self.gate.lock().await;
            match gate.inflight.clone() {
                Some(existing) => Some(existing),
                None => {
                    gate.phase = RecoveryPhase::Recovering;
                    gate.inflight = Some(rx);
                    None
                }
            }
        };

        if let Some(mut shared) = joined {
            loop {
                if let Some(outcome) = shared.borrow().clone() {
                    return outcome;
                }
                if shared.changed().await.is_err() {
                    return RecoveryOutcome::Failed {
                        message: "in-flight recovery run dropped".to_string(),
                    };
                }
            }
        }

        let outcome = self.run(user_id, task_id, device_id).await;

        {
            let mut gate = self.gate.lock().await;
            gate.inflight = None;
            gate.phase = match &outcome {
                RecoveryOutcome::Resumed { .. } => RecoveryPhase::Resumed,
                RecoveryOutcome::Completed { .. } => RecoveryPhase::Completed,
                RecoveryOutcome::NoSession | RecoveryOutcome::Failed { .. } => RecoveryPhase::Idle,
            };
        }

        let _ = tx.send(Some(outcome.clone()));
        outcome
    }

    async fn run(&self, user_id: &str, task_id: &str, device_id: &str) -> RecoveryOutcome {
        let session = match self.db.get_active(user_id, task_id).await {
            Ok(session) => session,
            Err(err) => {
                // Transient fetch failure: leave the driver on its last-known
                // state and let the next visibility event retry.
                warn!("Recovery fetch failed for {user_id}/{task_id}: {err:#}");
                return RecoveryOutcome::Failed {
                    message: err.to_string(),
                };
            }
        };

        let Some(session) = session else {
            self.driver.cancel_local().await;
            return RecoveryOutcome::NoSession;
        };

        let computed = elapsed::for_session(&session, Utc::now());

        if computed.should_complete {
            // The checkpoint path finalizes internally, so racing devices
            // converge on the same record.
            match self.reconciler.checkpoint(&session.id, device_id).await {
                Ok(outcome) if outcome.completed => {
                    info!(
                        "Recovery completed session {} at {}s",
                        session.id, outcome.elapsed_seconds
                    );
                    self.driver
                        .finish(&session.id, outcome.elapsed_seconds)
                        .await;
                    RecoveryOutcome::Completed {
                        session_id: session.id,
                        duration_seconds: outcome.elapsed_seconds,
                    }
                }
                Ok(outcome) => {
                    self.driver
                        .resume_with(&session, outcome.elapsed_seconds)
                        .await;
                    RecoveryOutcome::Resumed {
                        session_id: session.id,
                        elapsed_seconds: outcome.elapsed_seconds,
                        target_duration_seconds: session.target_duration_seconds,
                    }
                }
                Err(err) => {
                    warn!("Recovery completion failed for {}: {err}", session.id);
                    RecoveryOutcome::Failed {
                        message: err.to_string(),
                    }
                }
            }
        } else {
            self.driver
                .resume_with(&session, computed.capped_seconds)
                .await;
            if session.status == SessionStatus::Paused {
                // Authoritative state says paused: seed the counter but keep
                // the local countdown frozen.
                self.driver.pause_local().await;
            }
            RecoveryOutcome::Resumed {
                session_id: session.id,
                elapsed_seconds: computed.capped_seconds,
                target_duration_seconds: session.target_duration_seconds,
            }
        }
    }
}
