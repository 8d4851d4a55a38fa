//! Knowledge session: sole owner of the logic engine handle.
//!
//! Every mutation is applied immediately and is visible to every later query.
//! There is no per-call isolation and no rollback. A reset discards the engine
//! and creates an empty one; the default knowledge base comes back only when
//! `reseed_on_reset` is set.

use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::cursor::{SolutionCursor, MAX_SOLUTIONS};
use super::engine::{EngineFactory, LogicEngine};
use super::error::SessionError;
use super::program::{strip_terminator, LoadDiagnostic, LoadStatus, PredicateIndicator};
use super::seed::KnowledgeBase;

/// Where a new clause goes relative to its predicate's existing clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertMode {
    /// Front of the clause list, tried first on backtracking.
    Assert,
    /// End of the clause list.
    AssertEnd,
}

/// Something the session applied to the engine, in the order it was applied.
///
/// Goals passed to [`KnowledgeSession::query`] are not logged, even when they
/// change the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEntry {
    Clause { clause: String, mode: AssertMode },
    /// A `loadProgram` directive that ran successfully.
    Directive { goal: String },
}

impl LogEntry {
    /// The entry as a Prolog term followed by its end token.
    pub fn to_prolog(&self) -> String {
        match self {
            LogEntry::Clause { clause, .. } => format!("{}.", clause),
            LogEntry::Directive { goal } => format!(":- {}.", goal),
        }
    }
}

/// Session behaviour knobs.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Clauses used by [`KnowledgeSession::seed`] at startup.
    pub knowledge: KnowledgeBase,
    /// Seed the knowledge base when the session starts.
    pub seed: bool,
    /// Seed again after every reset.
    pub reseed_on_reset: bool,
    /// Upper bound on solutions materialized per query.
    pub max_solutions: usize,
    /// Wall-clock budget for draining one query.
    pub query_timeout: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            knowledge: KnowledgeBase::default(),
            seed: true,
            reseed_on_reset: false,
            max_solutions: MAX_SOLUTIONS,
            query_timeout: None,
        }
    }
}

pub struct KnowledgeSession {
    factory: Box<dyn EngineFactory>,
    engine: Option<Box<dyn LogicEngine>>,
    program_log: Vec<LogEntry>,
    /// Predicates declared on every fresh engine.
    schema: Vec<PredicateIndicator>,
    options: SessionOptions,
}

impl KnowledgeSession {
    /// Create the engine and, unless disabled, seed the knowledge base.
    pub fn start(
        factory: impl EngineFactory + 'static,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let mut session = Self {
            factory: Box::new(factory),
            engine: None,
            program_log: Vec::new(),
            schema: options.knowledge.predicates(),
            options,
        };
        session.engine = Some(session.fresh_engine()?);

        if session.options.seed {
            session.seed_configured()?;
        }
        Ok(session)
    }

    fn fresh_engine(&self) -> Result<Box<dyn LogicEngine>, SessionError> {
        let mut engine = self.factory.create()?;
        for indicator in &self.schema {
            engine.declare_dynamic(indicator)?;
        }
        Ok(engine)
    }

    fn engine(&mut self) -> Result<&mut Box<dyn LogicEngine>, SessionError> {
        self.engine
            .as_mut()
            .ok_or(SessionError::SessionUninitialized)
    }

    fn seed_configured(&mut self) -> Result<(), SessionError> {
        let knowledge = self.options.knowledge.clone();
        self.seed(&knowledge.facts, &knowledge.rules)?;
        info!(clauses = knowledge.len(), "seeded knowledge base");
        Ok(())
    }

    /// Assert facts then rules, in order, at the end of their predicates.
    ///
    /// Stops at the first failure; clauses asserted before it stay in place.
    pub fn seed<S: AsRef<str>>(&mut self, facts: &[S], rules: &[S]) -> Result<(), SessionError> {
        for clause in facts.iter().chain(rules) {
            self.assert_clause(clause.as_ref(), AssertMode::AssertEnd)?;
        }
        Ok(())
    }

    pub fn assert_clause(&mut self, clause: &str, mode: AssertMode) -> Result<(), SessionError> {
        let engine = self.engine()?;
        match mode {
            AssertMode::Assert => engine.assert_front(clause)?,
            AssertMode::AssertEnd => engine.assert_end(clause)?,
        }

        let clause = strip_terminator(clause).to_string();
        debug!(%clause, ?mode, "asserted clause");
        self.program_log.push(LogEntry::Clause { clause, mode });
        Ok(())
    }

    /// Load a multi-clause program, reporting each clause separately.
    pub fn load_program(&mut self, program: &str) -> Result<Vec<LoadDiagnostic>, SessionError> {
        let diagnostics = self.engine()?.load_program(program)?;

        self.program_log
            .extend(diagnostics.iter().filter_map(|d| match d.status {
                LoadStatus::Loaded => Some(LogEntry::Clause {
                    clause: d.clause.clone(),
                    mode: AssertMode::AssertEnd,
                }),
                LoadStatus::Executed => Some(LogEntry::Directive {
                    goal: d.clause.trim_start_matches(":-").trim().to_string(),
                }),
                LoadStatus::Rejected => None,
            }));

        let rejected = diagnostics.iter().filter(|d| d.is_rejected()).count();
        if rejected > 0 {
            warn!(rejected, total = diagnostics.len(), "program loaded with rejections");
        }
        Ok(diagnostics)
    }

    /// Open a query capped at the configured solution limit.
    pub fn query(&mut self, query: &str) -> Result<SolutionCursor<'_>, SessionError> {
        self.query_with_limit(query, None)
    }

    /// Open a query with a per-call limit, clamped to `1..=max_solutions`.
    pub fn query_with_limit(
        &mut self,
        query: &str,
        limit: Option<usize>,
    ) -> Result<SolutionCursor<'_>, SessionError> {
        let max = self.options.max_solutions;
        let limit = limit.map_or(max, |l| l.clamp(1, max));
        debug!(%query, limit, "opening query");
        let solutions = self.engine()?.open_query(query);
        Ok(SolutionCursor::new(solutions, limit))
    }

    /// Discard the engine and create a fresh, empty one.
    ///
    /// The old handle is dropped before the new one is created. If creation
    /// fails the session stays uninitialized until a later reset succeeds.
    pub fn reset(&mut self) -> Result<(), SessionError> {
        self.engine = None;
        self.program_log.clear();

        self.engine = Some(self.fresh_engine()?);
        info!(reseed = self.options.reseed_on_reset, "session reset");

        if self.options.reseed_on_reset {
            self.seed_configured()?;
        }
        Ok(())
    }

    /// Drop an engine handle that can no longer be trusted.
    pub fn invalidate(&mut self) {
        if self.engine.take().is_some() {
            warn!("engine handle discarded; session needs a reset");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.engine.is_some()
    }

    pub fn program_log(&self) -> &[LogEntry] {
        &self.program_log
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Clauses and directives applied since the last reset, one per line.
    pub fn listing(&self) -> String {
        self.program_log
            .iter()
            .map(|entry| entry.to_prolog() + "\n")
            .collect()
    }
}
