//! JSON request boundary.
//!
//! Requests are objects carrying an `op` name and its arguments inline:
//!
//! ```text
//! {"op": "vote", "session": 1, "candidate": "Movie1"}
//! ```
//!
//! Anything that does not name a known op is rejected with
//! [`Error::UnknownOperation`] before any argument is looked at.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{Candidate, Error, Session, SessionId};

/// A parsed request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    CreateSession { candidates: Vec<String> },
    GetCandidates { session: SessionId },
    GetSession { session: SessionId },
    StartVoting { session: SessionId, duration: u64 },
    Vote { session: SessionId, candidate: String },
    EndVoting { session: SessionId },
    GetWinner { session: SessionId },
    SessionCounter,
}

/// The result of a successful request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Response {
    Created { session: SessionId },
    Candidates { candidates: Vec<Candidate> },
    Session { session: Session },
    Winner { name: String },
    Counter { sessions: u64 },
    Ok,
}

#[derive(Deserialize)]
struct CreateArgs {
    candidates: Vec<String>,
}

#[derive(Deserialize)]
struct SessionArgs {
    session: SessionId,
}

#[derive(Deserialize)]
struct StartArgs {
    session: SessionId,
    duration: u64,
}

#[derive(Deserialize)]
struct VoteArgs {
    session: SessionId,
    candidate: String,
}

impl Request {
    /// Parse a request from JSON bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| Error::InvalidInput(format!("invalid request: {e}")))?;
        Self::from_value(value)
    }

    /// Interpret an already decoded JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, Error> {
        let op = value
            .get("op")
            .and_then(|op| op.as_str())
            .ok_or_else(|| Error::UnknownOperation(String::new()))?
            .to_string();

        let request = match op.as_str() {
            "create_session" => {
                let args: CreateArgs = parse_args(&op, value)?;
                Request::CreateSession {
                    candidates: args.candidates,
                }
            }
            "get_candidates" => Request::GetCandidates {
                session: parse_args::<SessionArgs>(&op, value)?.session,
            },
            "get_session" => Request::GetSession {
                session: parse_args::<SessionArgs>(&op, value)?.session,
            },
            "start_voting" => {
                let args: StartArgs = parse_args(&op, value)?;
                Request::StartVoting {
                    session: args.session,
                    duration: args.duration,
                }
            }
            "vote" => {
                let args: VoteArgs = parse_args(&op, value)?;
                Request::Vote {
                    session: args.session,
                    candidate: args.candidate,
                }
            }
            "end_voting" => Request::EndVoting {
                session: parse_args::<SessionArgs>(&op, value)?.session,
            },
            "get_winner" => Request::GetWinner {
                session: parse_args::<SessionArgs>(&op, value)?.session,
            },
            "session_counter" => Request::SessionCounter,
            _ => return Err(Error::UnknownOperation(op)),
        };

        Ok(request)
    }

    /// The op name this request is dispatched under.
    pub fn op(&self) -> &'static str {
        match self {
            Request::CreateSession { .. } => "create_session",
            Request::GetCandidates { .. } => "get_candidates",
            Request::GetSession { .. } => "get_session",
            Request::StartVoting { .. } => "start_voting",
            Request::Vote { .. } => "vote",
            Request::EndVoting { .. } => "end_voting",
            Request::GetWinner { .. } => "get_winner",
            Request::SessionCounter => "session_counter",
        }
    }
}

fn parse_args<T: DeserializeOwned>(op: &str, value: serde_json::Value) -> Result<T, Error> {
    serde_json::from_value(value).map_err(|e| Error::InvalidInput(format!("{op}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_ops() {
        let request = Request::parse(br#"{"op": "vote", "session": 1, "candidate": "Movie1"}"#).unwrap();
        assert_eq!(
            request,
            Request::Vote {
                session: SessionId(1),
                candidate: "Movie1".into()
            }
        );

        let request = Request::parse(br#"{"op": "session_counter"}"#).unwrap();
        assert_eq!(request, Request::SessionCounter);
    }

    #[test]
    fn unknown_ops_are_rejected_uniformly() {
        let err = Request::parse(br#"{"op": "delete_session", "session": 1}"#).unwrap_err();
        assert_eq!(err, Error::UnknownOperation("delete_session".into()));

        let err = Request::parse(br#"{"session": 1}"#).unwrap_err();
        assert_eq!(err, Error::UnknownOperation(String::new()));

        let err = Request::parse(br#"{"op": 7}"#).unwrap_err();
        assert_eq!(err, Error::UnknownOperation(String::new()));

        let err = Request::parse(b"[]").unwrap_err();
        assert_eq!(err, Error::UnknownOperation(String::new()));
    }

    #[test]
    fn bad_arguments_are_invalid_input() {
        let err = Request::parse(br#"{"op": "start_voting", "session": 1}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let err = Request::parse(br#"{"op": "start_voting", "session": 1, "duration": -5}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let err = Request::parse(b"not json").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn extra_fields_are_ignored() {
        let request = Request::parse(br#"{"op": "get_winner", "session": 3, "note": "x"}"#).unwrap();
        assert_eq!(
            request,
            Request::GetWinner {
                session: SessionId(3)
            }
        );
    }

    #[test]
    fn response_serialization_is_tagged() {
        let json = serde_json::to_value(Response::Winner {
            name: "Movie1".into(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"result": "winner", "name": "Movie1"}));

        let json = serde_json::to_value(Response::Ok).unwrap();
        assert_eq!(json, serde_json::json!({"result": "ok"}));
    }
}
