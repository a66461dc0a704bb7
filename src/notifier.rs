//! Fan-out of session mutations to sibling devices/tabs of the same user.
//!
//! One broadcast channel per user id; subscribers on other devices feed the
//! deltas into their own recovery/driver path. Publishing never blocks and
//! never fails: a lagged or dropped receiver is the subscriber's problem.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::db::models::{Session, SessionStatus};

const CHANNEL_CAPACITY: usize = 64;

/// Mutation notice sent to every subscriber of the owning user.
///
/// `current_duration_seconds` is display advice (last writer wins); the
/// authoritative elapsed is always recomputed from the stored start time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDelta {
    pub session_id: String,
    pub task_id: String,
    pub status: SessionStatus,
    pub current_duration_seconds: i64,
    /// Device that caused the mutation, so its own tabs can ignore the echo.
    pub device_id: String,
}

impl SessionDelta {
    pub fn from_session(session: &Session, device_id: &str) -> Self {
        Self {
            session_id: session.id.clone(),
            task_id: session.task_id.clone(),
            status: session.status,
            current_duration_seconds: session.current_duration_seconds,
            device_id: device_id.to_string(),
        }
    }
}

#[derive(Clone, Default)]
pub struct ChangeNotifier {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<SessionDelta>>>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to all session mutations scoped to `user_id`.
    pub fn subscribe(&self, user_id: &str) -> broadcast::Receiver<SessionDelta> {
        let mut channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
        channels
            .entry(user_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn publish(&self, user_id: &str, delta: SessionDelta) {
        let sender = {
            let mut channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
            match channels.get(user_id) {
                // Every receiver is gone; drop the channel so the map does
                // not grow with departed users.
                Some(sender) if sender.receiver_count() == 0 => {
                    channels.remove(user_id);
                    None
                }
                Some(sender) => Some(sender.clone()),
                None => None,
            }
        };

        if let Some(sender) = sender {
            let delivered = sender.send(delta).unwrap_or(0);
            debug!("Published session delta for {user_id} to {delivered} subscribers");
        }
    }

    /// Number of live per-user channels; diagnostics only.
    pub fn channel_count(&self) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }
}
