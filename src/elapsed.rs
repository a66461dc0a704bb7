//! Deterministic elapsed-time derivation.
//!
//! The single source of truth for "how long has this session run". Elapsed is
//! always recomputed from the immutable `start_time` against a caller-supplied
//! `now`; no client-reported counter is ever trusted over this.

use chrono::{DateTime, Utc};

use crate::db::models::{Session, SessionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed {
    /// Whole seconds since `start_time`, minus paused time, clamped to >= 0.
    pub elapsed_seconds: i64,
    /// True once elapsed has reached the target duration.
    pub should_complete: bool,
    /// Elapsed capped at the target; what checkpoints and displays use.
    pub capped_seconds: i64,
}

/// Pure computation: identical inputs always yield identical outputs,
/// independent of any previously checkpointed value. Clock skew that would
/// produce a negative elapsed is clamped to zero, never an error.
pub fn compute(
    start_time: DateTime<Utc>,
    target_duration_seconds: i64,
    paused_seconds: i64,
    now: DateTime<Utc>,
) -> Elapsed {
    let raw = (now - start_time).num_seconds();
    let elapsed_seconds = (raw - paused_seconds).max(0);
    let should_complete = elapsed_seconds >= target_duration_seconds;
    let capped_seconds = elapsed_seconds.min(target_duration_seconds);

    Elapsed {
        elapsed_seconds,
        should_complete,
        capped_seconds,
    }
}

/// Compute elapsed for a stored session, folding an open pause span into the
/// paused total so a currently-paused session reads as frozen.
pub fn for_session(session: &Session, now: DateTime<Utc>) -> Elapsed {
    let mut paused = session.paused_seconds;
    if session.status == SessionStatus::Paused {
        if let Some(paused_at) = session.paused_at {
            paused += (now - paused_at).num_seconds().max(0);
        }
    }
    compute(
        session.start_time,
        session.target_duration_seconds,
        paused,
        now,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn elapsed_is_floor_of_wall_clock_delta() {
        let start = Utc::now();
        let result = compute(start, 1500, 0, start + Duration::seconds(10));
        assert_eq!(result.elapsed_seconds, 10);
        assert!(!result.should_complete);
        assert_eq!(result.capped_seconds, 10);
    }

    #[test]
    fn overrun_is_capped_to_target() {
        let start = Utc::now();
        let result = compute(start, 1500, 0, start + Duration::seconds(2000));
        assert_eq!(result.elapsed_seconds, 2000);
        assert!(result.should_complete);
        assert_eq!(result.capped_seconds, 1500);
    }

    #[test]
    fn exact_target_completes() {
        let start = Utc::now();
        let result = compute(start, 1500, 0, start + Duration::seconds(1500));
        assert!(result.should_complete);
        assert_eq!(result.capped_seconds, 1500);
    }

    #[test]
    fn clock_skew_clamps_to_zero() {
        let start = Utc::now();
        let result = compute(start, 1500, 0, start - Duration::seconds(30));
        assert_eq!(result.elapsed_seconds, 0);
        assert!(!result.should_complete);
    }

    #[test]
    fn paused_time_is_excluded() {
        let start = Utc::now();
        let result = compute(start, 1500, 600, start + Duration::seconds(700));
        assert_eq!(result.elapsed_seconds, 100);
        assert!(!result.should_complete);
    }

    #[test]
    fn identical_inputs_yield_identical_outputs() {
        let start = Utc::now();
        let now = start + Duration::seconds(86_400 * 3);
        let first = compute(start, 1500, 0, now);
        let second = compute(start, 1500, 0, now);
        assert_eq!(first, second);
        assert!(first.should_complete);
        assert_eq!(first.capped_seconds, 1500);
    }
}
