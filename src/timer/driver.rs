//! Cooperatively-scheduled local countdown: one tick per second while a
//! session is running, independently on every device/tab, purely for display.
//! Completion authority stays with the reconciler; the driver only notices
//! overrun early and hands it to the reconciler's checkpoint path.

use std::{sync::Arc, time::{Duration, Instant}};

use chrono::Utc;
use log::warn;
use serde::Serialize;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
    time,
};

use crate::{
    db::models::{Session, SessionStatus},
    elapsed,
    notifier::SessionDelta,
    reconciler::SessionReconciler,
};

use super::{DriverStatus, TimerState};

#[derive(Debug, Clone, Copy)]
pub struct DriverConfig {
    pub tick_interval: Duration,
    /// Checkpoint attempt cadence, in ticks. The reconciler's debounce still
    /// decides whether each attempt actually writes.
    pub checkpoint_every_ticks: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            checkpoint_every_ticks: 10,
        }
    }
}

/// Emitted on the driver's "session finished" hook, whether the finish came
/// from a local tick, recovery, or a sibling device's completion.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionFinished {
    pub session_id: String,
    pub duration_seconds: i64,
}

#[derive(Clone)]
pub struct ClientTimerDriver {
    state: Arc<Mutex<TimerState>>,
    reconciler: SessionReconciler,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
    finished_tx: broadcast::Sender<SessionFinished>,
    config: DriverConfig,
    device_id: String,
}

impl ClientTimerDriver {
    pub fn new(reconciler: SessionReconciler, device_id: String, config: DriverConfig) -> Self {
        let (finished_tx, _) = broadcast::channel(16);
        Self {
            state: Arc::new(Mutex::new(TimerState::new())),
            reconciler,
            ticker: Arc::new(Mutex::new(None)),
            finished_tx,
            config,
            device_id,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// The UI layer's "session finished" hook.
    pub fn on_finished(&self) -> broadcast::Receiver<SessionFinished> {
        self.finished_tx.subscribe()
    }

    pub async fn snapshot(&self) -> TimerState {
        let mut guard = self.state.lock().await;
        guard.sync_active_from_anchor();
        guard.clone()
    }

    /// Begin ticking for a freshly started (or reattached) session. The
    /// display seeds from recomputed elapsed, not the stored checkpoint,
    /// which can lag by a full checkpoint interval on reattach.
    pub async fn start(&self, session: &Session) {
        let computed = elapsed::for_session(session, Utc::now());
        self.seed_and_run(session, computed.capped_seconds).await;
    }

    /// Resume ticking with an authoritative elapsed value, overwriting any
    /// locally-accumulated counter.
    pub async fn resume_with(&self, session: &Session, elapsed_seconds: i64) {
        self.seed_and_run(session, elapsed_seconds).await;
    }

    async fn seed_and_run(&self, session: &Session, elapsed_seconds: i64) {
        {
            let mut state = self.state.lock().await;
            state.begin(
                session.id.clone(),
                session.task_id.clone(),
                session.target_duration_seconds,
                elapsed_seconds,
                session.start_time,
                Instant::now(),
            );
        }
        self.spawn_ticker().await;
    }

    /// Overwrite the display counter; a no-op unless a session is loaded.
    pub async fn reseed(&self, elapsed_seconds: i64) {
        let mut state = self.state.lock().await;
        if state.session_id.is_some() {
            state.reseed(elapsed_seconds, Instant::now());
        }
    }

    /// Freeze the local countdown; the ticker exits on its next tick.
    pub async fn pause_local(&self) {
        {
            let mut state = self.state.lock().await;
            if state.status == DriverStatus::Running {
                state.pause_local();
            }
        }
        self.cancel_ticker().await;
    }

    /// Terminal display transition plus the finished hook. Ignores session
    /// ids that no longer match the loaded session (a late echo).
    pub async fn finish(&self, session_id: &str, duration_seconds: i64) {
        let finished = self.apply_finish(session_id, duration_seconds).await;
        self.cancel_ticker().await;
        if let Some(event) = finished {
            let _ = self.finished_tx.send(event);
        }
    }

    /// State transition for a finish; the caller decides how the ticker goes
    /// away (aborted from outside, or breaking out of its own loop).
    async fn apply_finish(
        &self,
        session_id: &str,
        duration_seconds: i64,
    ) -> Option<SessionFinished> {
        let mut state = self.state.lock().await;
        if state.session_id.as_deref() != Some(session_id)
            || state.status == DriverStatus::Finished
        {
            return None;
        }
        state.finish(duration_seconds);
        Some(SessionFinished {
            session_id: session_id.to_string(),
            duration_seconds,
        })
    }

    /// Drop local state without touching the server (no active session).
    pub async fn cancel_local(&self) {
        {
            let mut state = self.state.lock().await;
            state.clear();
        }
        self.cancel_ticker().await;
    }

    /// Consume sibling-device deltas: a completion for the loaded session
    /// force-stops the local countdown through the same finished hook, and a
    /// Focusing sync from another device reseeds the display counter.
    pub fn spawn_delta_listener(
        &self,
        mut deltas: broadcast::Receiver<SessionDelta>,
    ) -> JoinHandle<()> {
        let driver = self.clone();
        tokio::spawn(async move {
            loop {
                let delta = match deltas.recv().await {
                    Ok(delta) => delta,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Delta listener lagged, skipped {skipped} updates");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                if delta.device_id == driver.device_id {
                    continue;
                }

                let matches_loaded = {
                    let state = driver.state.lock().await;
                    state.session_id.as_deref() == Some(delta.session_id.as_str())
                };
                if !matches_loaded {
                    continue;
                }

                match delta.status {
                    SessionStatus::Completed => {
                        driver
                            .finish(&delta.session_id, delta.current_duration_seconds)
                            .await;
                    }
                    SessionStatus::Focusing => {
                        driver.reseed(delta.current_duration_seconds).await;
                    }
                    SessionStatus::Paused => {
                        driver.pause_local().await;
                    }
                }
            }
        })
    }

    /// One ticker per driver: re-arming aborts the previous task, so an
    /// accidental second instantiation cannot make elapsed advance twice as
    /// fast.
    async fn spawn_ticker(&self) {
        let mut ticker_guard = self.ticker.lock().await;
        if let Some(handle) = ticker_guard.take() {
            handle.abort();
        }

        let driver = self.clone();
        let tick_interval = self.config.tick_interval;
        let checkpoint_every = self.config.checkpoint_every_ticks.max(1);

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(tick_interval);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
            let mut ticks: u32 = 0;

            loop {
                interval.tick().await;

                let (session_id, active, target) = {
                    let mut guard = driver.state.lock().await;
                    if guard.status != DriverStatus::Running {
                        break;
                    }
                    guard.sync_active_from_anchor();
                    let Some(session_id) = guard.session_id.clone() else {
                        break;
                    };
                    (session_id, guard.active_seconds, guard.target_seconds)
                };

                // Local overrun check: route to the reconciler immediately
                // instead of waiting for the next checkpoint interval.
                let force_checkpoint = active >= target;
                ticks = ticks.wrapping_add(1);

                if force_checkpoint || ticks % checkpoint_every == 0 {
                    match driver
                        .reconciler
                        .checkpoint(&session_id, &driver.device_id)
                        .await
                    {
                        Ok(outcome) => {
                            if outcome.completed {
                                // Break out of our own loop rather than
                                // aborting ourselves through cancel_ticker.
                                if let Some(event) = driver
                                    .apply_finish(&session_id, outcome.elapsed_seconds)
                                    .await
                                {
                                    let _ = driver.finished_tx.send(event);
                                }
                                break;
                            }
                            // Authoritative correction of the display value.
                            driver.reseed(outcome.elapsed_seconds).await;
                        }
                        Err(err) => {
                            // Keep running on last-known state; the next tick
                            // or visibility change retries naturally.
                            warn!("Checkpoint failed for session {session_id}: {err}");
                        }
                    }
                }
            }
        });

        *ticker_guard = Some(handle);
    }

    async fn cancel_ticker(&self) {
        if let Some(handle) = self.ticker.lock().await.take() {
            handle.abort();
        }
    }
}
