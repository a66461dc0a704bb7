//! deepwork: server-authoritative focus-session timer engine.
//!
//! Tracks one Pomodoro-style countdown per (user, task) across unreliable
//! clients. The store and reconciler hold the truth; each device runs an
//! advisory local driver that is corrected by recovery and change
//! notifications. Elapsed time is always derived from the immutable session
//! start time, never from client-reported counters.

pub mod db;
pub mod elapsed;
pub mod engine;
pub mod error;
pub mod notifier;
pub mod reconciler;
pub mod recovery;
pub mod timer;

pub use db::models::{
    CompletedActivityRecord, EventType, NewSession, Session, SessionEvent, SessionStatus,
    SessionType,
};
pub use engine::{EngineConfig, FocusEngine};
pub use error::{EngineError, Result};
pub use notifier::{ChangeNotifier, SessionDelta};
pub use reconciler::{CheckpointOutcome, ReconcilerConfig, SessionReconciler};
pub use recovery::{RecoveryCoordinator, RecoveryOutcome, RecoveryPhase};
pub use timer::{ClientTimerDriver, DriverConfig, DriverStatus, SessionFinished, TimerState};
