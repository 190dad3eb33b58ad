//! Session registry.
//!
//! An append-only arena: session `n` lives at index `n - 1` and is never
//! removed. All mutation of sessions goes through the registry, which
//! takes the current time as an argument so it stays a pure state machine.

use serde::{Deserialize, Serialize};

use crate::{Candidate, Error, Event, FinalizePolicy, Hash, Identity, Session, SessionId, Timestamp};

/// Owner of every session record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    sessions: Vec<Session>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions created so far; also the id of the newest one.
    pub fn session_counter(&self) -> u64 {
        self.sessions.len() as u64
    }

    /// Open a new session owned by `creator`.
    ///
    /// Fails without allocating an id if fewer than two candidates are
    /// given or a name repeats.
    pub fn create_session<I, S>(
        &mut self,
        candidate_names: I,
        creator: Identity,
    ) -> Result<(SessionId, Event), Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = SessionId(self.session_counter() + 1);
        let session = Session::new(id, creator.clone(), candidate_names)?;
        self.sessions.push(session);

        Ok((
            id,
            Event::SessionCreated {
                creator,
                session: id,
            },
        ))
    }

    pub fn session(&self, id: SessionId) -> Result<&Session, Error> {
        let index = Self::index(id).ok_or(Error::NotFound(id))?;
        self.sessions.get(index).ok_or(Error::NotFound(id))
    }

    fn session_mut(&mut self, id: SessionId) -> Result<&mut Session, Error> {
        let index = Self::index(id).ok_or(Error::NotFound(id))?;
        self.sessions.get_mut(index).ok_or(Error::NotFound(id))
    }

    fn index(id: SessionId) -> Option<usize> {
        id.0.checked_sub(1).and_then(|i| usize::try_from(i).ok())
    }

    /// Candidates of a session in insertion order.
    pub fn candidates(&self, id: SessionId) -> Result<&[Candidate], Error> {
        Ok(self.session(id)?.candidates())
    }

    pub fn start_voting(
        &mut self,
        id: SessionId,
        duration: u64,
        caller: &Identity,
        now: Timestamp,
    ) -> Result<Event, Error> {
        self.session_mut(id)?.start_voting(duration, caller, now)
    }

    pub fn cast_vote(
        &mut self,
        id: SessionId,
        candidate: &str,
        voter: &Identity,
        now: Timestamp,
    ) -> Result<Event, Error> {
        self.session_mut(id)?.cast_vote(candidate, voter, now)
    }

    pub fn end_voting(
        &mut self,
        id: SessionId,
        caller: &Identity,
        now: Timestamp,
        policy: FinalizePolicy,
    ) -> Result<Event, Error> {
        self.session_mut(id)?.end_voting(caller, now, policy)
    }

    /// Winning candidate of an ended session.
    pub fn winner(&self, id: SessionId) -> Result<&Candidate, Error> {
        self.session(id)?.winner()
    }

    /// Iterate over sessions in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter()
    }

    /// Digest of the canonical encoding of every session.
    pub fn digest(&self) -> Result<Hash, Error> {
        Hash::of_value(self)
    }

    /// Re-check every invariant of every stored session.
    pub fn validate(&self) -> Result<(), Error> {
        for (i, session) in self.sessions.iter().enumerate() {
            session.validate(SessionId(i as u64 + 1))?;
        }
        Ok(())
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)?;
        Ok(buf)
    }

    /// Decode and validate a registry.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, Error> {
        let registry: Registry = ciborium::from_reader(bytes)?;
        registry.validate()?;
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SessionState;

    fn alice() -> Identity {
        Identity::new("alice")
    }

    #[test]
    fn fresh_registry_is_empty() {
        let registry = Registry::new();
        assert_eq!(registry.session_counter(), 0);
        assert_eq!(registry.session(SessionId(1)), Err(Error::NotFound(SessionId(1))));
    }

    #[test]
    fn ids_are_sequential_from_one() {
        let mut registry = Registry::new();
        let (a, _) = registry.create_session(["x", "y"], alice()).unwrap();
        let (b, _) = registry.create_session(["x", "y", "z"], alice()).unwrap();

        assert_eq!(a, SessionId(1));
        assert_eq!(b, SessionId(2));
        assert_eq!(registry.session_counter(), 2);
        assert_eq!(registry.candidates(b).unwrap().len(), 3);
    }

    #[test]
    fn sentinel_id_is_never_found() {
        let mut registry = Registry::new();
        registry.create_session(["x", "y"], alice()).unwrap();

        assert_eq!(
            registry.session(SessionId::NONE),
            Err(Error::NotFound(SessionId::NONE))
        );
        assert!(registry.candidates(SessionId(2)).is_err());
    }

    #[test]
    fn failed_creation_keeps_counter() {
        let mut registry = Registry::new();
        assert!(registry.create_session(["only"], alice()).is_err());
        assert_eq!(registry.session_counter(), 0);
    }

    #[test]
    fn cbor_roundtrip_preserves_digest() {
        let mut registry = Registry::new();
        let (id, _) = registry.create_session(["x", "y"], alice()).unwrap();
        registry.start_voting(id, 60, &alice(), 100).unwrap();
        registry.cast_vote(id, "y", &Identity::new("bob"), 120).unwrap();

        let decoded = Registry::from_cbor(&registry.to_cbor().unwrap()).unwrap();
        assert_eq!(decoded, registry);
        assert_eq!(decoded.digest().unwrap(), registry.digest().unwrap());
        assert_eq!(decoded.session(id).unwrap().state(), SessionState::Active);
    }

    #[test]
    fn digest_changes_with_votes() {
        let mut registry = Registry::new();
        let (id, _) = registry.create_session(["x", "y"], alice()).unwrap();
        registry.start_voting(id, 60, &alice(), 0).unwrap();
        let before = registry.digest().unwrap();

        registry.cast_vote(id, "x", &alice(), 1).unwrap();
        assert_ne!(before, registry.digest().unwrap());
    }

    #[test]
    fn from_cbor_rejects_overflowing_tallies() {
        let mut registry = Registry::new();
        let (id, _) = registry.create_session(["x", "y"], alice()).unwrap();
        registry.start_voting(id, 60, &alice(), 0).unwrap();
        registry.cast_vote(id, "y", &alice(), 1).unwrap();

        let mut value = serde_json::to_value(&registry).unwrap();
        value["sessions"][0]["candidates"][0]["vote_count"] = u64::MAX.into();
        let crafted: Registry = serde_json::from_value(value).unwrap();

        assert!(matches!(
            Registry::from_cbor(&crafted.to_cbor().unwrap()),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn from_cbor_rejects_garbage() {
        assert!(matches!(
            Registry::from_cbor(b"\xff\x00"),
            Err(Error::Serialization(_))
        ));
    }
}
