//! Knowledge session over an embedded Scryer Prolog engine.
//!
//! The session owns one engine handle, seeds it with a small family knowledge
//! base, and hands out bounded solution cursors for queries.

mod bindings;
mod cursor;
mod engine;
mod error;
mod program;
mod seed;
mod session;

pub use bindings::Bindings;
pub use cursor::{CancelToken, CursorStatus, Drained, QueryBudget, SolutionCursor, MAX_SOLUTIONS};
pub use engine::{
    render_term, EngineFactory, LogicEngine, ScryerEngine, ScryerFactory, Solutions,
};
pub use error::SessionError;
pub use program::{
    head_indicator, is_balanced, quote_atom, split_clauses, strip_terminator, ClauseText,
    LoadDiagnostic, LoadStatus, PredicateIndicator, ProgramItem,
};
pub use seed::{KnowledgeBase, DEFAULT_FACTS, DEFAULT_RULES};
pub use session::{AssertMode, KnowledgeSession, LogEntry, SessionOptions};

pub(crate) use error::panic_message;
