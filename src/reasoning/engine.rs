//! Embedded Prolog engine using Scryer Prolog.
//!
//! The session only talks to the engine through [`LogicEngine`], so the
//! resolution machinery stays a black box: assert a clause, load a program,
//! open a query and pull solutions one at a time.

use scryer_prolog::{LeafAnswer, Machine, MachineBuilder, Term};
use std::any::Any;
use std::iter;
use std::panic::{self, AssertUnwindSafe};

use super::bindings::Bindings;
use super::error::{panic_message, SessionError};
use super::program::{
    is_balanced, quote_atom, split_clauses, strip_terminator, LoadDiagnostic, LoadStatus,
    PredicateIndicator, ProgramItem,
};

/// Lazily evaluated solutions of one open query.
///
/// Dropping the iterator releases the engine-side query.
pub type Solutions<'a> = Box<dyn Iterator<Item = Result<Bindings, SessionError>> + 'a>;

/// Capability surface the knowledge session needs from a logic engine.
pub trait LogicEngine {
    /// Add a clause before the existing clauses of its predicate.
    fn assert_front(&mut self, clause: &str) -> Result<(), SessionError>;

    /// Add a clause after the existing clauses of its predicate.
    fn assert_end(&mut self, clause: &str) -> Result<(), SessionError>;

    /// Open a query against the current database. Nothing is evaluated until
    /// the returned iterator is advanced.
    fn open_query(&mut self, query: &str) -> Solutions<'_>;

    /// Load a whole program clause by clause.
    ///
    /// Clauses are appended with [`assert_end`](Self::assert_end); directives
    /// (`:- Goal`) run once. Nothing is rolled back when an element fails.
    /// A crash stops the load and is returned instead of a diagnostic.
    fn load_program(&mut self, program: &str) -> Result<Vec<LoadDiagnostic>, SessionError> {
        let mut diagnostics = Vec::new();

        for (index, clause) in split_clauses(program).iter().enumerate() {
            let outcome = match clause.item() {
                ProgramItem::Clause(text) => self.assert_end(text).map(|_| LoadStatus::Loaded),
                ProgramItem::Directive(goal) => match self.open_query(goal).next() {
                    Some(Ok(_)) => Ok(LoadStatus::Executed),
                    Some(Err(e)) => Err(e),
                    None => Err(SessionError::EngineFault(format!(
                        "directive failed: {}",
                        goal
                    ))),
                },
            };

            diagnostics.push(match outcome {
                Ok(status) => LoadDiagnostic::ok(index, clause, status),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => LoadDiagnostic::rejected(index, clause, e.to_string()),
            });
        }

        Ok(diagnostics)
    }

    /// Make `indicator` a dynamic predicate without adding clauses, so that
    /// calling it fails instead of raising an existence error.
    fn declare_dynamic(&mut self, indicator: &PredicateIndicator) -> Result<(), SessionError> {
        let goal = format!(
            "functor(H, {}, {}), ( catch(clause(H, _), _, fail) -> true ; assertz(H), retract(H) )",
            quote_atom(&indicator.name),
            indicator.arity
        );
        match self.open_query(&goal).next() {
            Some(Ok(_)) => Ok(()),
            Some(Err(e)) => Err(e),
            None => Err(SessionError::EngineFault(format!(
                "could not declare {} dynamic",
                indicator
            ))),
        }
    }
}

/// Creates engine handles for the session (at startup and on every reset).
pub trait EngineFactory: Send {
    fn create(&self) -> Result<Box<dyn LogicEngine>, SessionError>;
}

impl<F> EngineFactory for F
where
    F: Fn() -> Result<Box<dyn LogicEngine>, SessionError> + Send,
{
    fn create(&self) -> Result<Box<dyn LogicEngine>, SessionError> {
        self()
    }
}

/// Factory for [`ScryerEngine`] handles.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScryerFactory;

impl EngineFactory for ScryerFactory {
    fn create(&self) -> Result<Box<dyn LogicEngine>, SessionError> {
        Ok(Box::new(ScryerEngine::new()))
    }
}

/// Scryer Prolog machine behind the [`LogicEngine`] interface.
pub struct ScryerEngine {
    machine: Machine,
}

impl ScryerEngine {
    /// Create a machine with an empty user database.
    pub fn new() -> Self {
        Self {
            machine: MachineBuilder::default().build(),
        }
    }

    fn assert_with(&mut self, builtin: &str, clause: &str) -> Result<(), SessionError> {
        let clause = strip_terminator(clause);
        if clause.is_empty() {
            return Err(SessionError::MalformedClause("empty clause".to_string()));
        }
        if !is_balanced(clause) {
            return Err(SessionError::MalformedClause(format!(
                "unbalanced brackets or quotes in {}",
                clause
            )));
        }

        let goal = format!("{}(({}))", builtin, clause);
        match self.open_query(&goal).next() {
            Some(Ok(_)) => Ok(()),
            Some(Err(e)) => Err(e),
            None => Err(SessionError::EngineFault(format!(
                "{} failed for {}",
                builtin, clause
            ))),
        }
    }
}

impl Default for ScryerEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LogicEngine for ScryerEngine {
    fn assert_front(&mut self, clause: &str) -> Result<(), SessionError> {
        self.assert_with("asserta", clause)
    }

    fn assert_end(&mut self, clause: &str) -> Result<(), SessionError> {
        self.assert_with("assertz", clause)
    }

    fn open_query(&mut self, query: &str) -> Solutions<'_> {
        // An exception that escapes to the machine's top level stays latched
        // and is reported again by every later query, so every goal runs
        // under a catch-all. The goal sits on its own line so that a trailing
        // `%` comment cannot swallow the wrapper.
        let text = format!(
            "catch((\n{}\n), {}, true).",
            strip_terminator(query),
            THROWN_VAR
        );
        let machine = &mut self.machine;
        match panic::catch_unwind(AssertUnwindSafe(move || machine.run_query(text))) {
            Ok(answers) => Box::new(Guarded {
                answers,
                finished: false,
            }),
            Err(payload) => Box::new(iter::once(Err(query_panic_fault(payload.as_ref())))),
        }
    }
}

/// Query variable that receives a caught exception. It is never reported as
/// a binding.
const THROWN_VAR: &str = "ThrownBall__";

/// Steps a machine query. A panic while stepping leaves the machine in an
/// unknown state and is reported as a crash. Stops after the first failure,
/// exception or panic.
struct Guarded<I> {
    answers: I,
    finished: bool,
}

impl<I> Iterator for Guarded<I>
where
    I: Iterator<Item = Result<LeafAnswer, Term>>,
{
    type Item = Result<Bindings, SessionError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let answers = &mut self.answers;
        let step = match panic::catch_unwind(AssertUnwindSafe(|| answers.next())) {
            Ok(Some(answer)) => answer_to_step(answer),
            Ok(None) => None,
            Err(payload) => Some(Err(SessionError::EngineCrashed(format!(
                "panicked while solving: {}",
                panic_message(payload.as_ref())
            )))),
        };
        if !matches!(step, Some(Ok(_))) {
            self.finished = true;
        }
        step
    }
}

/// The machine panics on unparsable query text instead of throwing. That
/// happens before any machine state is touched; any other panic while
/// opening a query does not.
fn query_panic_fault(payload: &(dyn Any + Send)) -> SessionError {
    let message = panic_message(payload);
    if message.to_lowercase().contains("pars") {
        SessionError::MalformedClause(message)
    } else {
        SessionError::EngineCrashed(format!("panicked while opening query: {}", message))
    }
}

/// One answer from the machine as a solution step. `None` ends enumeration.
#[allow(unreachable_patterns)]
fn answer_to_step(answer: Result<LeafAnswer, Term>) -> Option<Result<Bindings, SessionError>> {
    match answer {
        Ok(LeafAnswer::True) => Some(Ok(Bindings::ground())),
        Ok(LeafAnswer::False) => None,
        // Every goal runs under a catch-all, so a ball reaching the top level
        // means the machine is stuck reporting it.
        Ok(LeafAnswer::Exception(term)) | Err(term) => Some(Err(SessionError::EngineCrashed(
            format!("uncaught exception {}", render_term(&term)),
        ))),
        Ok(LeafAnswer::LeafAnswer { mut bindings, .. }) => {
            if let Some(ball) = bindings.remove(THROWN_VAR) {
                if !matches!(ball, Term::Var(_)) {
                    return Some(Err(classify_exception(&ball)));
                }
            }
            Some(Ok(Bindings::solved(
                bindings
                    .iter()
                    .filter(|(name, _)| !name.starts_with('_'))
                    .map(|(name, term)| (name.clone(), render_term(term))),
            )))
        }
        Ok(other) => Some(Err(SessionError::EngineFault(format!(
            "unexpected answer: {:?}",
            other
        )))),
    }
}

/// Map a thrown term onto the error taxonomy.
fn classify_exception(term: &Term) -> SessionError {
    let message = render_term(term);
    match term {
        Term::Compound(name, args)
            if name == "error" && args.first().is_some_and(is_syntax_error) =>
        {
            SessionError::MalformedClause(message)
        }
        _ => SessionError::EngineFault(message),
    }
}

fn is_syntax_error(term: &Term) -> bool {
    match term {
        Term::Compound(name, _) | Term::Atom(name) => name == "syntax_error",
        _ => false,
    }
}

/// Render a term the way it is shown to tool callers.
#[allow(unreachable_patterns)]
pub fn render_term(term: &Term) -> String {
    match term {
        Term::Atom(atom) => atom.clone(),
        Term::String(s) => format!("{:?}", s),
        Term::Integer(i) => i.to_string(),
        Term::Float(f) => f.to_string(),
        Term::Var(name) => name.clone(),
        Term::List(items) => format!("[{}]", render_args(items)),
        Term::Compound(name, args) => format!("{}({})", name, render_args(args)),
        other => format!("{:?}", other),
    }
}

fn render_args(terms: &[Term]) -> String {
    terms.iter().map(render_term).collect::<Vec<_>>().join(",")
}
