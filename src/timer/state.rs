use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp;
use std::time::Instant;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DriverStatus {
    Idle,
    Running,
    Paused,
    Finished,
}

impl Default for DriverStatus {
    fn default() -> Self {
        DriverStatus::Idle
    }
}

/// Advisory local countdown state. Display only: elapsed here is derived
/// from a monotonic anchor and is overwritten whenever an authoritative
/// recomputation arrives (recovery, checkpoint response, sibling-device
/// delta). That overwrite is a correction, never a conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    pub status: DriverStatus,
    pub session_id: Option<String>,
    pub task_id: Option<String>,
    pub target_seconds: i64,
    pub active_seconds: i64,
    pub started_at: Option<DateTime<Utc>>,
    /// Seconds accumulated before the current running window; combines with
    /// `running_anchor` to derive the live value.
    #[serde(skip)]
    pub active_baseline_seconds: i64,
    #[serde(skip)]
    pub running_anchor: Option<Instant>,
}

impl Default for TimerState {
    fn default() -> Self {
        Self {
            status: DriverStatus::Idle,
            session_id: None,
            task_id: None,
            target_seconds: 0,
            active_seconds: 0,
            started_at: None,
            active_baseline_seconds: 0,
            running_anchor: None,
        }
    }
}

impl TimerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remaining_seconds(&self) -> i64 {
        match self.status {
            DriverStatus::Running | DriverStatus::Paused => {
                cmp::max(self.target_seconds - self.current_active_seconds(), 0)
            }
            DriverStatus::Idle | DriverStatus::Finished => 0,
        }
    }

    pub fn current_active_seconds(&self) -> i64 {
        if let (DriverStatus::Running, Some(anchor)) = (self.status, self.running_anchor) {
            self.active_baseline_seconds
                .saturating_add(anchor.elapsed().as_secs() as i64)
        } else {
            self.active_seconds
        }
    }

    pub fn sync_active_from_anchor(&mut self) {
        if let (DriverStatus::Running, Some(anchor)) = (self.status, self.running_anchor) {
            self.active_seconds = self
                .active_baseline_seconds
                .saturating_add(anchor.elapsed().as_secs() as i64);
        }
    }

    pub fn begin(
        &mut self,
        session_id: String,
        task_id: String,
        target_seconds: i64,
        elapsed_seconds: i64,
        started_at: DateTime<Utc>,
        now: Instant,
    ) {
        *self = Self {
            status: DriverStatus::Running,
            session_id: Some(session_id),
            task_id: Some(task_id),
            target_seconds,
            active_seconds: elapsed_seconds,
            started_at: Some(started_at),
            active_baseline_seconds: elapsed_seconds,
            running_anchor: Some(now),
        };
    }

    /// Overwrite locally-accumulated elapsed with an authoritative value.
    pub fn reseed(&mut self, elapsed_seconds: i64, now: Instant) {
        self.active_seconds = elapsed_seconds;
        self.active_baseline_seconds = elapsed_seconds;
        if self.status == DriverStatus::Running {
            self.running_anchor = Some(now);
        }
    }

    pub fn pause_local(&mut self) {
        self.sync_active_from_anchor();
        self.status = DriverStatus::Paused;
        self.running_anchor = None;
        self.active_baseline_seconds = self.active_seconds;
    }

    pub fn finish(&mut self, duration_seconds: i64) {
        self.status = DriverStatus::Finished;
        self.running_anchor = None;
        self.active_seconds = duration_seconds;
        self.active_baseline_seconds = self.active_seconds;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_seeds_elapsed_and_runs() {
        let mut state = TimerState::new();
        state.begin("s1".into(), "t1".into(), 1500, 100, Utc::now(), Instant::now());
        assert_eq!(state.status, DriverStatus::Running);
        assert!(state.current_active_seconds() >= 100);
        assert!(state.remaining_seconds() <= 1400);
    }

    #[test]
    fn reseed_overwrites_local_accumulation() {
        let mut state = TimerState::new();
        state.begin("s1".into(), "t1".into(), 1500, 0, Utc::now(), Instant::now());
        state.reseed(900, Instant::now());
        assert!(state.current_active_seconds() >= 900);
        assert!(state.remaining_seconds() <= 600);
    }

    #[test]
    fn pause_freezes_the_counter() {
        let mut state = TimerState::new();
        state.begin("s1".into(), "t1".into(), 1500, 50, Utc::now(), Instant::now());
        state.pause_local();
        let frozen = state.current_active_seconds();
        assert_eq!(state.status, DriverStatus::Paused);
        assert_eq!(state.current_active_seconds(), frozen);
        assert!(state.running_anchor.is_none());
    }

    #[test]
    fn finish_is_terminal_for_display() {
        let mut state = TimerState::new();
        state.begin("s1".into(), "t1".into(), 1500, 0, Utc::now(), Instant::now());
        state.finish(1500);
        assert_eq!(state.status, DriverStatus::Finished);
        assert_eq!(state.active_seconds, 1500);
        assert_eq!(state.remaining_seconds(), 0);
    }
}
