//! Voting sessions: lifecycle state machine, ballot ledger and winner.
//!
//! ```text
//! Created --start_voting(owner)--> Active --end_voting(after deadline)--> Ended
//! ```
//!
//! A session never moves backwards. Every operation checks all of its
//! preconditions before touching the record.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::{Error, Event, Identity, Timestamp};

/// Sequential session identifier. `0` is never assigned.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl SessionId {
    /// The "no session" sentinel.
    pub const NONE: Self = Self(0);
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Active,
    Ended,
}

impl SessionState {
    /// Numeric state code (0, 1, 2).
    pub fn code(self) -> u8 {
        match self {
            SessionState::Created => 0,
            SessionState::Active => 1,
            SessionState::Ended => 2,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Created => "created",
            SessionState::Active => "active",
            SessionState::Ended => "ended",
        };
        f.write_str(s)
    }
}

/// Who may finalize a session once its deadline has passed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizePolicy {
    /// Only the session owner.
    #[default]
    Owner,
    /// Any caller.
    Anyone,
}

impl FromStr for FinalizePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(FinalizePolicy::Owner),
            "anyone" => Ok(FinalizePolicy::Anyone),
            other => Err(format!("unknown finalize policy {other:?}, expected owner or anyone")),
        }
    }
}

impl fmt::Display for FinalizePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinalizePolicy::Owner => f.write_str("owner"),
            FinalizePolicy::Anyone => f.write_str("anyone"),
        }
    }
}

/// A named option and its running tally.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,
    pub vote_count: u64,
}

/// One vote over a fixed candidate list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    id: SessionId,
    owner: Identity,
    state: SessionState,
    candidates: Vec<Candidate>,
    voting_deadline: Option<Timestamp>,
    has_voted: BTreeSet<Identity>,
}

impl Session {
    /// Build a fresh session in the `Created` state.
    ///
    /// Requires at least two candidates with distinct names.
    pub(crate) fn new<I, S>(id: SessionId, owner: Identity, names: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = BTreeSet::new();
        let mut candidates = Vec::new();

        for name in names {
            let name = name.into();
            if !seen.insert(name.clone()) {
                return Err(Error::InvalidInput(format!(
                    "duplicate candidate name: {name:?}"
                )));
            }
            candidates.push(Candidate {
                name,
                vote_count: 0,
            });
        }

        if candidates.len() < 2 {
            return Err(Error::InvalidInput(
                "at least two candidates required".to_string(),
            ));
        }

        Ok(Self {
            id,
            owner,
            state: SessionState::Created,
            candidates,
            voting_deadline: None,
            has_voted: BTreeSet::new(),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn owner(&self) -> &Identity {
        &self.owner
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Candidates in insertion order.
    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Deadline of the voting window, set when voting starts.
    pub fn voting_deadline(&self) -> Option<Timestamp> {
        self.voting_deadline
    }

    pub fn has_voted(&self, voter: &Identity) -> bool {
        self.has_voted.contains(voter)
    }

    /// Total number of votes cast.
    pub fn turnout(&self) -> usize {
        self.has_voted.len()
    }

    fn require_owner(&self, caller: &Identity) -> Result<(), Error> {
        if caller != &self.owner {
            return Err(Error::Unauthorized(caller.clone()));
        }
        Ok(())
    }

    fn require_state(&self, expected: SessionState) -> Result<(), Error> {
        if self.state != expected {
            return Err(Error::InvalidState {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    /// Open the voting window for `duration` seconds from `now`.
    ///
    /// A zero duration is accepted and yields a window that is already
    /// closed.
    pub(crate) fn start_voting(
        &mut self,
        duration: u64,
        caller: &Identity,
        now: Timestamp,
    ) -> Result<Event, Error> {
        self.require_owner(caller)?;
        self.require_state(SessionState::Created)?;

        let deadline = now.checked_add(duration).ok_or_else(|| {
            Error::InvalidInput(format!("voting window of {duration}s overflows the clock"))
        })?;

        self.voting_deadline = Some(deadline);
        self.state = SessionState::Active;

        Ok(Event::VotingStarted {
            caller: caller.clone(),
            session: self.id,
        })
    }

    /// Record one vote for `candidate` by `voter`.
    pub(crate) fn cast_vote(
        &mut self,
        candidate: &str,
        voter: &Identity,
        now: Timestamp,
    ) -> Result<Event, Error> {
        self.require_state(SessionState::Active)?;

        let deadline = self.active_deadline()?;
        if now >= deadline {
            return Err(Error::VotingEnded { deadline, now });
        }

        if self.has_voted.contains(voter) {
            return Err(Error::AlreadyVoted(voter.clone(), self.id));
        }

        let entry = self
            .candidates
            .iter_mut()
            .find(|c| c.name == candidate)
            .ok_or_else(|| Error::CandidateNotFound(candidate.to_string()))?;

        entry.vote_count += 1;
        self.has_voted.insert(voter.clone());

        Ok(Event::VoteCast {
            voter: voter.clone(),
            session: self.id,
            candidate: candidate.to_string(),
        })
    }

    /// Close the session once its deadline has passed.
    pub(crate) fn end_voting(
        &mut self,
        caller: &Identity,
        now: Timestamp,
        policy: FinalizePolicy,
    ) -> Result<Event, Error> {
        if policy == FinalizePolicy::Owner {
            self.require_owner(caller)?;
        }
        self.require_state(SessionState::Active)?;

        let deadline = self.active_deadline()?;
        if now < deadline {
            return Err(Error::TooEarly { deadline, now });
        }

        self.state = SessionState::Ended;

        Ok(Event::VotingEnded {
            caller: caller.clone(),
            session: self.id,
        })
    }

    /// The winning candidate of an ended session.
    ///
    /// Ties go to the candidate inserted first.
    pub fn winner(&self) -> Result<&Candidate, Error> {
        self.require_state(SessionState::Ended)?;

        let mut candidates = self.candidates.iter();
        let mut best = candidates
            .next()
            .ok_or_else(|| Error::Corrupt(format!("session {} has no candidates", self.id)))?;
        for candidate in candidates {
            if candidate.vote_count > best.vote_count {
                best = candidate;
            }
        }
        Ok(best)
    }

    fn active_deadline(&self) -> Result<Timestamp, Error> {
        self.voting_deadline
            .ok_or_else(|| Error::Corrupt(format!("session {} is active without a deadline", self.id)))
    }

    /// Check the data-model invariants of this record.
    pub(crate) fn validate(&self, expected_id: SessionId) -> Result<(), Error> {
        if self.id != expected_id {
            return Err(Error::Corrupt(format!(
                "session {} stored at position of {}",
                self.id, expected_id
            )));
        }
        if self.candidates.len() < 2 {
            return Err(Error::Corrupt(format!(
                "session {} has fewer than two candidates",
                self.id
            )));
        }

        let names: BTreeSet<&str> = self.candidates.iter().map(|c| c.name.as_str()).collect();
        if names.len() != self.candidates.len() {
            return Err(Error::Corrupt(format!(
                "session {} has duplicate candidate names",
                self.id
            )));
        }

        match (self.state, self.voting_deadline) {
            (SessionState::Created, Some(_)) => {
                return Err(Error::Corrupt(format!(
                    "session {} has a deadline before voting started",
                    self.id
                )));
            }
            (SessionState::Active | SessionState::Ended, None) => {
                return Err(Error::Corrupt(format!(
                    "session {} is {} without a deadline",
                    self.id, self.state
                )));
            }
            _ => {}
        }

        let tally = self
            .candidates
            .iter()
            .try_fold(0u64, |sum, c| sum.checked_add(c.vote_count))
            .ok_or_else(|| Error::Corrupt(format!("session {} vote tally overflows", self.id)))?;
        if tally != self.has_voted.len() as u64 {
            return Err(Error::Corrupt(format!(
                "session {} counts {} votes from {} voters",
                self.id,
                tally,
                self.has_voted.len()
            )));
        }

        Ok(())
    }
}
