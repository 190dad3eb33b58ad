//! The ezballot engine: serializes operations over a registry.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::{
    Candidate, Clock, Error, Event, EventSink, FinalizePolicy, Identity, Registry, Request,
    Response, Session, SessionId, SignedRequest,
};

struct Inner {
    registry: Registry,
    history: VecDeque<Event>,
}

/// Thread-safe front of the voting core.
///
/// Every operation runs under one lock, reads the clock once, and either
/// commits in full or returns an error having written nothing.
pub struct Engine {
    inner: Mutex<Inner>,

    /// Source of "now" for deadline checks.
    clock: Box<dyn Clock>,

    /// Who may call `end_voting`.
    policy: FinalizePolicy,

    /// Observers of committed events.
    sinks: Vec<Box<dyn EventSink>>,

    /// Most events kept in the history. Unbounded when `None`; callers
    /// that keep an engine around then drain it with [`Engine::drain_events`].
    history_limit: Option<usize>,
}

impl Engine {
    /// Create an engine over an existing registry.
    pub fn new(registry: Registry, clock: Box<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                registry,
                history: VecDeque::new(),
            }),
            clock,
            policy: FinalizePolicy::default(),
            sinks: Vec::new(),
            history_limit: None,
        }
    }

    pub fn with_policy(mut self, policy: FinalizePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Keep at most `limit` events in the history, dropping the oldest.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = Some(limit);
        self
    }

    pub fn policy(&self) -> FinalizePolicy {
        self.policy
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Writes happen only after every check passed, so a poisoned
        // registry is still consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn commit(&self, inner: &mut Inner, event: Event) {
        match &event {
            Event::SessionCreated { creator, session } => {
                info!(session = %session, owner = %creator, "session created")
            }
            Event::VotingStarted { caller, session } => {
                info!(session = %session, caller = %caller, "voting started")
            }
            Event::VoteCast {
                voter,
                session,
                candidate,
            } => debug!(session = %session, voter = %voter, candidate = %candidate, "vote cast"),
            Event::VotingEnded { caller, session } => {
                info!(session = %session, caller = %caller, "voting ended")
            }
        }

        for sink in &self.sinks {
            sink.emit(&event);
        }
        inner.history.push_back(event);
        if let Some(limit) = self.history_limit {
            while inner.history.len() > limit {
                inner.history.pop_front();
            }
        }
    }

    /// Open a new session owned by `creator`.
    pub fn create_session<I, S>(&self, candidate_names: I, creator: &Identity) -> Result<SessionId, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inner = self.lock();
        let (id, event) = inner
            .registry
            .create_session(candidate_names, creator.clone())
            .inspect_err(|e| debug!(creator = %creator, error = %e, "create_session rejected"))?;
        self.commit(&mut inner, event);
        Ok(id)
    }

    pub fn get_candidates(&self, id: SessionId) -> Result<Vec<Candidate>, Error> {
        Ok(self.lock().registry.candidates(id)?.to_vec())
    }

    pub fn get_session(&self, id: SessionId) -> Result<Session, Error> {
        self.lock().registry.session(id).cloned()
    }

    pub fn session_counter(&self) -> u64 {
        self.lock().registry.session_counter()
    }

    /// Open the voting window of a session for `duration` seconds.
    pub fn start_voting(&self, id: SessionId, duration: u64, caller: &Identity) -> Result<(), Error> {
        let mut inner = self.lock();
        let now = self.clock.now();
        let event = inner
            .registry
            .start_voting(id, duration, caller, now)
            .inspect_err(|e| debug!(session = %id, caller = %caller, error = %e, "start_voting rejected"))?;
        self.commit(&mut inner, event);
        Ok(())
    }

    /// Cast `voter`'s single vote for `candidate`.
    pub fn vote(&self, id: SessionId, candidate: &str, voter: &Identity) -> Result<(), Error> {
        let mut inner = self.lock();
        let now = self.clock.now();
        let event = inner
            .registry
            .cast_vote(id, candidate, voter, now)
            .inspect_err(|e| debug!(session = %id, voter = %voter, error = %e, "vote rejected"))?;
        self.commit(&mut inner, event);
        Ok(())
    }

    /// Finalize a session whose window has closed.
    pub fn end_voting(&self, id: SessionId, caller: &Identity) -> Result<(), Error> {
        let mut inner = self.lock();
        let now = self.clock.now();
        let event = inner
            .registry
            .end_voting(id, caller, now, self.policy)
            .inspect_err(|e| debug!(session = %id, caller = %caller, error = %e, "end_voting rejected"))?;
        self.commit(&mut inner, event);
        Ok(())
    }

    /// Name of the winning candidate of an ended session.
    pub fn get_winner(&self, id: SessionId) -> Result<String, Error> {
        Ok(self.lock().registry.winner(id)?.name.clone())
    }

    /// Execute a parsed request on behalf of `caller`.
    pub fn handle(&self, request: Request, caller: &Identity) -> Result<Response, Error> {
        debug!(op = request.op(), caller = %caller, "handling request");

        let response = match request {
            Request::CreateSession { candidates } => Response::Created {
                session: self.create_session(candidates, caller)?,
            },
            Request::GetCandidates { session } => Response::Candidates {
                candidates: self.get_candidates(session)?,
            },
            Request::GetSession { session } => Response::Session {
                session: self.get_session(session)?,
            },
            Request::StartVoting { session, duration } => {
                self.start_voting(session, duration, caller)?;
                Response::Ok
            }
            Request::Vote { session, candidate } => {
                self.vote(session, &candidate, caller)?;
                Response::Ok
            }
            Request::EndVoting { session } => {
                self.end_voting(session, caller)?;
                Response::Ok
            }
            Request::GetWinner { session } => Response::Winner {
                name: self.get_winner(session)?,
            },
            Request::SessionCounter => Response::Counter {
                sessions: self.session_counter(),
            },
        };

        Ok(response)
    }

    /// Parse and execute a JSON request.
    pub fn handle_json(&self, bytes: &[u8], caller: &Identity) -> Result<Response, Error> {
        let request = Request::parse(bytes)
            .inspect_err(|e| debug!(caller = %caller, error = %e, "request rejected"))?;
        self.handle(request, caller)
    }

    /// Verify a signed request and execute it as its author.
    pub fn handle_signed(&self, signed: &SignedRequest) -> Result<Response, Error> {
        let caller = signed
            .verify()
            .inspect_err(|e| debug!(error = %e, "signed request rejected"))?;
        self.handle_json(&signed.body, &caller)
    }

    /// Every event committed by this engine, oldest first.
    pub fn events(&self) -> Vec<Event> {
        self.lock().history.iter().cloned().collect()
    }

    /// Take the event history, leaving it empty.
    pub fn drain_events(&self) -> Vec<Event> {
        self.lock().history.drain(..).collect()
    }

    /// A copy of the current registry.
    pub fn snapshot(&self) -> Registry {
        self.lock().registry.clone()
    }

    pub fn into_registry(self) -> Registry {
        self.inner
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ManualClock, SessionState};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Event>>);

    impl EventSink for Arc<Recorder> {
        fn emit(&self, event: &Event) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    fn engine_at(now: u64) -> (Engine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(now));
        let engine = Engine::new(Registry::new(), Box::new(clock.clone()));
        (engine, clock)
    }

    #[test]
    fn engine_creation() {
        let (engine, _) = engine_at(0);
        assert_eq!(engine.session_counter(), 0);
        assert!(engine.events().is_empty());
        assert_eq!(engine.policy(), FinalizePolicy::Owner);
    }

    #[test]
    fn start_emits_voting_started_to_sinks() {
        let recorder = Arc::new(Recorder::default());
        let (engine, _) = engine_at(50);
        let engine = engine.with_sink(Box::new(recorder.clone()));
        let owner = Identity::new("owner");

        let id = engine.create_session(["Movie1", "Movie2"], &owner).unwrap();
        engine.start_voting(id, 100, &owner).unwrap();

        let seen = recorder.0.lock().unwrap().clone();
        assert_eq!(seen, engine.events());
        assert_eq!(
            seen.last(),
            Some(&Event::VotingStarted {
                caller: owner,
                session: id
            })
        );
        assert_eq!(engine.get_session(id).unwrap().voting_deadline(), Some(150));
    }

    #[test]
    fn rejected_calls_emit_nothing() {
        let (engine, _) = engine_at(0);
        let owner = Identity::new("owner");
        let id = engine.create_session(["a", "b"], &owner).unwrap();
        engine.drain_events();

        assert!(engine.start_voting(id, 10, &Identity::new("mallory")).is_err());
        assert!(engine.vote(id, "a", &owner).is_err());
        assert!(engine.events().is_empty());
    }

    #[test]
    fn handle_routes_requests() {
        let (engine, clock) = engine_at(0);
        let owner = Identity::new("owner");

        let created = engine
            .handle_json(br#"{"op": "create_session", "candidates": ["Movie1", "Movie2"]}"#, &owner)
            .unwrap();
        assert_eq!(created, Response::Created { session: SessionId(1) });

        engine
            .handle(Request::StartVoting { session: SessionId(1), duration: 5 }, &owner)
            .unwrap();
        engine
            .handle_json(br#"{"op": "vote", "session": 1, "candidate": "Movie2"}"#, &owner)
            .unwrap();
        clock.advance(5);
        engine.handle(Request::EndVoting { session: SessionId(1) }, &owner).unwrap();

        let winner = engine.handle(Request::GetWinner { session: SessionId(1) }, &owner).unwrap();
        assert_eq!(winner, Response::Winner { name: "Movie2".into() });
        assert_eq!(engine.snapshot().session(SessionId(1)).unwrap().state(), SessionState::Ended);
    }

    #[test]
    fn concurrent_duplicate_votes_count_once() {
        let (engine, _) = engine_at(0);
        let owner = Identity::new("owner");
        let id = engine.create_session(["a", "b"], &owner).unwrap();
        engine.start_voting(id, 100, &owner).unwrap();

        let engine = Arc::new(engine);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                std::thread::spawn(move || engine.vote(id, "a", &Identity::new("voter")).is_ok())
            })
            .collect();

        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(successes, 1);
        assert_eq!(engine.get_candidates(id).unwrap()[0].vote_count, 1);
    }

    #[test]
    fn history_limit_drops_oldest_events() {
        let (engine, _) = engine_at(0);
        let engine = engine.with_history_limit(2);
        let owner = Identity::new("owner");

        let id = engine.create_session(["a", "b"], &owner).unwrap();
        engine.start_voting(id, 10, &owner).unwrap();
        engine.vote(id, "b", &owner).unwrap();

        assert_eq!(
            engine.events(),
            vec![
                Event::VotingStarted {
                    caller: owner.clone(),
                    session: id
                },
                Event::VoteCast {
                    voter: owner.clone(),
                    session: id,
                    candidate: "b".into()
                },
            ]
        );
        assert_eq!(engine.drain_events().len(), 2);
        assert!(engine.events().is_empty());
    }

    #[test]
    fn sinks_see_events_beyond_the_history_limit() {
        let recorder = Arc::new(Recorder::default());
        let (engine, _) = engine_at(0);
        let engine = engine
            .with_history_limit(0)
            .with_sink(Box::new(recorder.clone()));

        engine.create_session(["a", "b"], &Identity::new("o")).unwrap();

        assert!(engine.events().is_empty());
        assert_eq!(recorder.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn into_registry_keeps_sessions() {
        let (engine, _) = engine_at(0);
        engine.create_session(["a", "b"], &Identity::new("o")).unwrap();
        assert_eq!(engine.into_registry().session_counter(), 1);
    }
}
