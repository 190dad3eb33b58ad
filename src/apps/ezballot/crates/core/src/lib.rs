//! ezballot-core: session-scoped voting.
//!
//! An owner opens a session over a fixed candidate list, starts a
//! time-bounded voting window, collects one vote per identity, and
//! finalizes a winner once the window has closed.
//!
//! - [`Registry`]: append-only store of sessions, pure state machine
//! - [`Engine`]: thread-safe front that injects time and emits events
//! - [`Request`]: JSON boundary that rejects unknown operations

mod clock;
mod engine;
mod error;
mod event;
mod hash;
mod identity;
mod registry;
mod request;
mod session;

pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use engine::Engine;
pub use error::Error;
pub use event::{Event, EventSink};
pub use hash::Hash;
pub use identity::{Identity, SignedRequest};
pub use registry::Registry;
pub use request::{Request, Response};
pub use session::{Candidate, FinalizePolicy, Session, SessionId, SessionState};

/// Re-export for convenience
pub use ed25519_dalek::{SigningKey, VerifyingKey};
