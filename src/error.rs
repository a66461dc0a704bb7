use thiserror::Error;

/// Failures surfaced by the engine's public operations.
///
/// Duplicate completion is deliberately absent: racing `finalize` calls both
/// succeed and return the same record.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No user identity; operations fail closed and persist nothing.
    #[error("no authenticated user")]
    NotAuthenticated,

    /// Stale or already-resolved session reference. Callers should treat the
    /// session as settled rather than retry.
    #[error("session {0} not found")]
    SessionNotFound(String),

    /// Transient persistence failure. Non-critical paths swallow this after
    /// logging; critical paths (explicit stop, recovery completion) surface it
    /// so the caller can retry with local state intact.
    #[error("store failure: {0}")]
    Store(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
