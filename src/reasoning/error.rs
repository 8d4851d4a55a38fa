//! Error taxonomy for the knowledge session.

use std::any::Any;
use thiserror::Error;

/// Failures surfaced by the knowledge session and its engine.
///
/// Running out of solution budget is not an error: a capped enumeration is
/// reported through [`CursorStatus::Capped`](super::CursorStatus::Capped).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The engine could not parse a clause or query.
    #[error("malformed clause: {0}")]
    MalformedClause(String),

    /// The engine raised an error while asserting, loading or querying.
    #[error("engine fault: {0}")]
    EngineFault(String),

    /// The engine failed mid-evaluation and its state can no longer be
    /// trusted. The session drops the handle when it sees this.
    #[error("engine crashed: {0}")]
    EngineCrashed(String),

    /// No live engine handle, either because re-creation failed or because
    /// the previous handle was discarded after a crash.
    #[error("session is uninitialized; call resetProlog to create a fresh engine")]
    SessionUninitialized,

    /// The caller cancelled the tool call.
    #[error("query cancelled after {emitted} solution(s)")]
    Cancelled { emitted: usize },

    /// The query drain ran past its wall-clock budget.
    #[error("query exceeded its {budget_ms} ms budget after {emitted} solution(s)")]
    TimedOut { budget_ms: u64, emitted: usize },
}

impl SessionError {
    /// True when the error leaves the engine handle unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::SessionUninitialized | SessionError::EngineCrashed(_)
        )
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
