//! Error types for ezballot-core.

use thiserror::Error;

use crate::{Identity, SessionId, SessionState, Timestamp};

/// Core errors.
///
/// Every failure is terminal for the call that produced it. Nothing is
/// written to a session until all checks for an operation have passed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Malformed request, such as a session with fewer than two candidates.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Session not found in the registry.
    #[error("session not found: {0}")]
    NotFound(SessionId),

    /// Caller is not allowed to perform an owner-restricted operation.
    #[error("not the owner: {0}")]
    Unauthorized(Identity),

    /// Operation is not allowed in the session's current lifecycle state.
    #[error("invalid state: session is {actual}, expected {expected}")]
    InvalidState {
        expected: SessionState,
        actual: SessionState,
    },

    /// Finalization attempted before the voting window closed.
    #[error("voting period has not ended yet (deadline {deadline}, now {now})")]
    TooEarly { deadline: Timestamp, now: Timestamp },

    /// Vote attempted after the voting window closed.
    #[error("voting has ended (deadline {deadline}, now {now})")]
    VotingEnded { deadline: Timestamp, now: Timestamp },

    /// Identity already voted in this session.
    #[error("{0} has already voted in session {1}")]
    AlreadyVoted(Identity, SessionId),

    /// No candidate with this exact name in the session.
    #[error("candidate not found: {0}")]
    CandidateNotFound(String),

    /// Request names an operation the core does not handle.
    #[error("unknown operation: {0:?}")]
    UnknownOperation(String),

    /// Signed request failed verification.
    #[error("invalid signature for identity: {0}")]
    InvalidSignature(Identity),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A loaded registry violates a data-model invariant.
    #[error("corrupt registry: {0}")]
    Corrupt(String),
}

impl From<ciborium::ser::Error<std::io::Error>> for Error {
    fn from(e: ciborium::ser::Error<std::io::Error>) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<ciborium::de::Error<std::io::Error>> for Error {
    fn from(e: ciborium::de::Error<std::io::Error>) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
