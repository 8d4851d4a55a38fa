//! Tool dispatcher: one worker thread owns the knowledge session and runs
//! tool calls strictly one at a time, in submission order.
//!
//! The session is created on the worker itself, so the engine never crosses
//! threads. Callers only hold a queue handle and can live on any thread.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use super::tools::{
    assert_reply, load_reply, query_reply, relation_reply, reset_reply, ToolCall, ToolReply,
};
use crate::reasoning::{
    panic_message, strip_terminator, AssertMode, CancelToken, EngineFactory, KnowledgeSession,
    QueryBudget, SessionError, SessionOptions,
};

/// Scryer recurses deeply on large terms.
const WORKER_STACK_SIZE: usize = 16 * 1024 * 1024;

type Responder<T> = Box<dyn FnOnce(T) + Send>;

enum Job {
    Call {
        call: ToolCall,
        token: CancelToken,
        respond: Responder<ToolReply>,
    },
    Listing {
        respond: Responder<String>,
    },
}

pub struct Dispatcher {
    jobs: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Start the session worker and wait until the session is seeded.
    pub fn spawn(
        factory: impl EngineFactory + 'static,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let (jobs, queue) = unbounded::<Job>();
        let (ready_tx, ready_rx) = bounded::<Result<(), SessionError>>(1);

        let worker = thread::Builder::new()
            .name("prolog-session".to_string())
            .stack_size(WORKER_STACK_SIZE)
            .spawn(move || {
                let session = match KnowledgeSession::start(factory, options) {
                    Ok(session) => session,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                run_worker(session, queue);
            })
            .map_err(|e| SessionError::EngineFault(format!("could not start session worker: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("session worker ready");
                Ok(Self {
                    jobs: Some(jobs),
                    worker: Some(worker),
                })
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                Err(SessionError::EngineFault(
                    "session worker exited during startup".to_string(),
                ))
            }
        }
    }

    /// Queue a call; `respond` runs on the worker once the reply is ready.
    ///
    /// Returns false (without calling `respond`) if the worker is gone.
    pub fn submit(
        &self,
        call: ToolCall,
        token: CancelToken,
        respond: impl FnOnce(ToolReply) + Send + 'static,
    ) -> bool {
        let job = Job::Call {
            call,
            token,
            respond: Box::new(respond),
        };
        self.jobs
            .as_ref()
            .is_some_and(|jobs| jobs.send(job).is_ok())
    }

    /// Run a call and block until its reply is ready.
    pub fn call_with_token(&self, call: ToolCall, token: CancelToken) -> ToolReply {
        let (tx, rx) = bounded(1);
        let queued = self.submit(call, token, move |reply| {
            let _ = tx.send(reply);
        });
        if !queued {
            return worker_gone();
        }
        rx.recv().unwrap_or_else(|_| worker_gone())
    }

    pub fn call(&self, call: ToolCall) -> ToolReply {
        self.call_with_token(call, CancelToken::new())
    }

    /// Queue a listing of the session's program log; `respond` runs on the
    /// worker after every call queued before it.
    pub fn submit_listing(&self, respond: impl FnOnce(String) + Send + 'static) -> bool {
        let job = Job::Listing {
            respond: Box::new(respond),
        };
        self.jobs
            .as_ref()
            .is_some_and(|jobs| jobs.send(job).is_ok())
    }

    /// Clauses and directives added since the last reset, as Prolog text.
    pub fn knowledge_listing(&self) -> Option<String> {
        let (tx, rx) = bounded(1);
        let queued = self.submit_listing(move |listing| {
            let _ = tx.send(listing);
        });
        if !queued {
            return None;
        }
        rx.recv().ok()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Closing the queue lets the worker finish pending jobs and exit.
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("session worker panicked during shutdown");
            }
        }
    }
}

fn worker_gone() -> ToolReply {
    ToolReply::error(SessionError::EngineFault(
        "session worker is not running".to_string(),
    ))
}

fn run_worker(mut session: KnowledgeSession, queue: Receiver<Job>) {
    for job in queue.iter() {
        match job {
            Job::Call {
                call,
                token,
                respond,
            } => {
                let reply = execute_guarded(&mut session, call, &token);
                respond(reply);
            }
            Job::Listing { respond } => respond(session.listing()),
        }
    }
    debug!("session worker stopped");
}

/// Execute one call; no panic escapes. A panic leaves the engine in an
/// unknown state, so the handle is dropped until the next reset.
fn execute_guarded(session: &mut KnowledgeSession, call: ToolCall, token: &CancelToken) -> ToolReply {
    let tool = call.name();
    if token.is_cancelled() {
        debug!(tool, "call cancelled before it started");
        return SessionError::Cancelled { emitted: 0 }.into();
    }

    debug!(tool, ?call, "tool call");
    match panic::catch_unwind(AssertUnwindSafe(|| execute(&mut *session, call, token))) {
        Ok(reply) => reply,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(tool, %message, "tool call panicked");
            session.invalidate();
            ToolReply::error(SessionError::EngineCrashed(format!("panicked: {}", message)))
        }
    }
}

fn execute(session: &mut KnowledgeSession, call: ToolCall, token: &CancelToken) -> ToolReply {
    let tool = call.name();
    let budget = QueryBudget::new(token.clone(), session.options().query_timeout);

    let outcome = match call {
        ToolCall::Query { query, limit } => session
            .query_with_limit(&query, limit)
            .and_then(|cursor| cursor.drain(&budget))
            .map(|drained| query_reply(&query, &drained)),
        ToolCall::FindRelation { relation, person } => session
            .query(&relation.goal(&person))
            .and_then(|cursor| cursor.drain(&budget))
            .map(|drained| relation_reply(relation, &person, &drained)),
        ToolCall::Assertz { predicate } => session
            .assert_clause(&predicate, AssertMode::AssertEnd)
            .map(|()| assert_reply(strip_terminator(&predicate))),
        ToolCall::LoadProgram { program } => session
            .load_program(&program)
            .map(|diagnostics| load_reply(&diagnostics)),
        ToolCall::ResetProlog => {
            let reseeded = session.options().reseed_on_reset;
            session.reset().map(|()| reset_reply(reseeded))
        }
    };

    outcome.unwrap_or_else(|e| {
        if let SessionError::EngineCrashed(reason) = &e {
            error!(tool, %reason, "engine crashed");
            session.invalidate();
        } else if e.is_fatal() {
            warn!(tool, "no engine handle; waiting for resetProlog");
        } else {
            warn!(tool, error = %e, "tool call failed");
        }
        e.into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::tools::Relation;
    use crate::reasoning::{Bindings, LogicEngine, ScryerFactory, Solutions};

    /// Engine whose queries panic mid-enumeration.
    struct Exploding;

    impl LogicEngine for Exploding {
        fn assert_front(&mut self, _clause: &str) -> Result<(), SessionError> {
            Ok(())
        }

        fn assert_end(&mut self, _clause: &str) -> Result<(), SessionError> {
            Ok(())
        }

        fn open_query(&mut self, query: &str) -> Solutions<'_> {
            if query.starts_with("functor(") {
                return Box::new(std::iter::once(Ok(Bindings::ground())));
            }
            Box::new(std::iter::from_fn(|| -> Option<Result<Bindings, SessionError>> {
                panic!("corrupted heap")
            }))
        }
    }

    fn exploding_factory() -> Result<Box<dyn LogicEngine>, SessionError> {
        Ok(Box::new(Exploding))
    }

    /// Engine that reports a crash from its first non-setup query.
    struct Crashing;

    impl LogicEngine for Crashing {
        fn assert_front(&mut self, _clause: &str) -> Result<(), SessionError> {
            Ok(())
        }

        fn assert_end(&mut self, _clause: &str) -> Result<(), SessionError> {
            Ok(())
        }

        fn open_query(&mut self, query: &str) -> Solutions<'_> {
            if query.starts_with("functor(") {
                return Box::new(std::iter::once(Ok(Bindings::ground())));
            }
            Box::new(std::iter::once(Err(SessionError::EngineCrashed(
                "panicked while solving: stack overflow".to_string(),
            ))))
        }
    }

    #[test]
    fn test_calls_run_against_seeded_session() {
        let dispatcher = Dispatcher::spawn(ScryerFactory, SessionOptions::default()).unwrap();
        let reply = dispatcher.call(ToolCall::FindRelation {
            relation: Relation::Parent,
            person: "bob".to_string(),
        });
        assert_eq!(reply.first_text(), "parent of bob: charlie");
    }

    #[test]
    fn test_cancelled_call_never_runs() {
        let dispatcher = Dispatcher::spawn(ScryerFactory, SessionOptions::default()).unwrap();
        let token = CancelToken::new();
        token.cancel();
        let reply = dispatcher.call_with_token(
            ToolCall::Assertz {
                predicate: "parent(david, eve)".to_string(),
            },
            token,
        );
        assert!(reply.is_error);

        let reply = dispatcher.call(ToolCall::FindRelation {
            relation: Relation::Parent,
            person: "david".to_string(),
        });
        assert_eq!(reply.first_text(), "No parent relation found for david.");
    }

    #[test]
    fn test_panic_becomes_error_reply_and_invalidates_session() {
        let dispatcher = Dispatcher::spawn(exploding_factory, SessionOptions::default()).unwrap();

        let reply = dispatcher.call(ToolCall::Query {
            query: "anything".to_string(),
            limit: None,
        });
        assert!(reply.is_error);
        assert!(reply.first_text().contains("corrupted heap"));

        let reply = dispatcher.call(ToolCall::Assertz {
            predicate: "p(a)".to_string(),
        });
        assert!(reply.first_text().contains("uninitialized"));

        let reply = dispatcher.call(ToolCall::ResetProlog);
        assert!(!reply.is_error);
        assert!(!dispatcher
            .call(ToolCall::Assertz {
                predicate: "p(a)".to_string()
            })
            .is_error);
    }

    #[test]
    fn test_engine_crash_invalidates_session() {
        let factory = || -> Result<Box<dyn LogicEngine>, SessionError> { Ok(Box::new(Crashing)) };
        let dispatcher = Dispatcher::spawn(factory, SessionOptions::default()).unwrap();

        let reply = dispatcher.call(ToolCall::FindRelation {
            relation: Relation::Parent,
            person: "john".to_string(),
        });
        assert!(reply.is_error);
        assert!(reply.first_text().contains("engine crashed"));

        let reply = dispatcher.call(ToolCall::Assertz {
            predicate: "p(a)".to_string(),
        });
        assert!(reply.first_text().contains("uninitialized"));

        assert!(!dispatcher.call(ToolCall::ResetProlog).is_error);
    }

    #[test]
    fn test_listing_waits_behind_queued_calls() {
        let options = SessionOptions {
            seed: false,
            ..Default::default()
        };
        let dispatcher = Dispatcher::spawn(ScryerFactory, options).unwrap();
        let (tx, rx) = bounded(2);

        let reply_tx = tx.clone();
        assert!(dispatcher.submit(
            ToolCall::Assertz {
                predicate: "likes(ann, tea)".to_string(),
            },
            CancelToken::new(),
            move |reply| {
                let _ = reply_tx.send(reply.first_text().to_string());
            },
        ));
        assert!(dispatcher.submit_listing(move |listing| {
            let _ = tx.send(listing);
        }));

        assert_eq!(
            rx.recv().unwrap(),
            "Added to knowledge base: likes(ann, tea)"
        );
        assert_eq!(rx.recv().unwrap(), "likes(ann, tea).\n");
    }

    #[test]
    fn test_failed_startup_is_reported() {
        let factory = || -> Result<Box<dyn LogicEngine>, SessionError> {
            Err(SessionError::EngineFault("no engine".to_string()))
        };
        let err = Dispatcher::spawn(factory, SessionOptions::default()).err();
        assert_eq!(err, Some(SessionError::EngineFault("no engine".to_string())));
    }

    #[test]
    fn test_listing_reflects_assertions() {
        let options = SessionOptions {
            seed: false,
            ..Default::default()
        };
        let dispatcher = Dispatcher::spawn(ScryerFactory, options).unwrap();
        assert_eq!(dispatcher.knowledge_listing().as_deref(), Some(""));
        dispatcher.call(ToolCall::Assertz {
            predicate: "likes(ann, tea).".to_string(),
        });
        assert_eq!(
            dispatcher.knowledge_listing().as_deref(),
            Some("likes(ann, tea).\n")
        );
    }
}
