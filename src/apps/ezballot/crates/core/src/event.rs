//! Notifications emitted by successful operations.

use serde::{Deserialize, Serialize};

use crate::{Identity, SessionId};

/// Something observable that happened to a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    SessionCreated {
        creator: Identity,
        session: SessionId,
    },
    VotingStarted {
        caller: Identity,
        session: SessionId,
    },
    VoteCast {
        voter: Identity,
        session: SessionId,
        candidate: String,
    },
    VotingEnded {
        caller: Identity,
        session: SessionId,
    },
}

/// Observer of committed events.
///
/// [`Engine`](crate::Engine) calls `emit` while it holds its lock, so sinks
/// see events in commit order. A sink must not call back into the engine
/// that emitted the event; hand the event off instead.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &Event);
}
