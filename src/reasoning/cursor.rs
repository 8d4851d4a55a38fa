//! Bounded, non-restartable enumeration of one query's solutions.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::bindings::Bindings;
use super::engine::Solutions;
use super::error::SessionError;

/// Solutions materialized per query unless configured otherwise.
pub const MAX_SOLUTIONS: usize = 100;

/// Where a cursor stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorStatus {
    /// More solutions may be pulled.
    Open,
    /// The engine reported no further solutions (or failed).
    Exhausted,
    /// The solution cap was reached; the engine may have had more.
    Capped,
}

/// Shared flag a caller flips to abandon an in-flight tool call.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Limits applied while draining a cursor: a cancellation token and an
/// optional wall-clock budget. Both are checked between solutions only; a
/// single engine step runs to completion.
#[derive(Debug, Clone, Default)]
pub struct QueryBudget {
    token: CancelToken,
    timeout: Option<Duration>,
}

impl QueryBudget {
    pub fn new(token: CancelToken, timeout: Option<Duration>) -> Self {
        Self { token, timeout }
    }

    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    fn check(&self, started: Instant, emitted: usize) -> Result<(), SessionError> {
        if self.token.is_cancelled() {
            return Err(SessionError::Cancelled { emitted });
        }
        match self.timeout {
            Some(limit) if started.elapsed() > limit => Err(SessionError::TimedOut {
                budget_ms: limit.as_millis() as u64,
                emitted,
            }),
            _ => Ok(()),
        }
    }
}

/// Everything a drained cursor produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Drained {
    pub solutions: Vec<Bindings>,
    pub status: CursorStatus,
}

impl Drained {
    pub fn is_capped(&self) -> bool {
        self.status == CursorStatus::Capped
    }
}

/// Wraps one open query and hands out at most `limit` solutions.
///
/// Once exhausted or capped, the engine-side query is released and every
/// further call returns the unsolved sentinel. Re-enumeration means opening
/// a new query.
pub struct SolutionCursor<'a> {
    solutions: Option<Solutions<'a>>,
    status: CursorStatus,
    emitted: usize,
    limit: usize,
}

impl<'a> SolutionCursor<'a> {
    pub fn new(solutions: Solutions<'a>, limit: usize) -> Self {
        Self {
            solutions: Some(solutions),
            status: CursorStatus::Open,
            emitted: 0,
            limit,
        }
    }

    pub fn status(&self) -> CursorStatus {
        self.status
    }

    pub fn emitted(&self) -> usize {
        self.emitted
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    fn close(&mut self, status: CursorStatus) {
        self.status = status;
        self.solutions = None;
    }

    /// Advance one solution step.
    ///
    /// Returns the unsolved sentinel when the engine has no more solutions or
    /// the cap has been reached; [`status`](Self::status) tells the two apart.
    /// An engine error also closes the cursor.
    pub fn next_solution(&mut self) -> Result<Bindings, SessionError> {
        if self.status != CursorStatus::Open {
            return Ok(Bindings::failed());
        }
        if self.emitted >= self.limit {
            self.close(CursorStatus::Capped);
            return Ok(Bindings::failed());
        }

        let step = self.solutions.as_mut().and_then(|s| s.next());
        match step {
            Some(Ok(bindings)) => {
                self.emitted += 1;
                Ok(bindings)
            }
            Some(Err(e)) => {
                self.close(CursorStatus::Exhausted);
                Err(e)
            }
            None => {
                self.close(CursorStatus::Exhausted);
                Ok(Bindings::failed())
            }
        }
    }

    /// Pull solutions until the cursor closes or the budget runs out.
    pub fn drain(mut self, budget: &QueryBudget) -> Result<Drained, SessionError> {
        let started = Instant::now();
        let mut solutions = Vec::new();

        loop {
            budget.check(started, self.emitted)?;
            let bindings = self.next_solution()?;
            if !bindings.is_solved() {
                break;
            }
            solutions.push(bindings);
        }

        Ok(Drained {
            solutions,
            status: self.status,
        })
    }
}

impl Iterator for SolutionCursor<'_> {
    type Item = Result<Bindings, SessionError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_solution() {
            Ok(bindings) if bindings.is_solved() => Some(Ok(bindings)),
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
