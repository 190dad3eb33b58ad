//! Caller identities and signed requests.
//!
//! The core treats an [`Identity`] as an opaque token that has already been
//! authenticated. [`SignedRequest`] is one way to produce such a token: the
//! identity is the hex-encoded ed25519 public key and the request body is
//! signed with the matching secret key.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Error;

/// An opaque, externally authenticated principal.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identity bound to an ed25519 public key.
    pub fn from_key(key: &VerifyingKey) -> Self {
        Self(hex::encode(key.as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A request body signed by the identity that sends it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignedRequest {
    /// Hex-encoded public key of the author.
    pub author: Identity,

    /// The JSON request.
    pub body: Vec<u8>,

    /// Ed25519 signature over the author and body.
    pub signature: Vec<u8>,
}

impl SignedRequest {
    /// Sign a request body.
    pub fn new(body: Vec<u8>, signing_key: &SigningKey) -> Result<Self, Error> {
        let author = Identity::from_key(&signing_key.verifying_key());
        let content = signable_content(&author, &body)?;
        let signature = signing_key.sign(&content).to_bytes().to_vec();

        Ok(Self {
            author,
            body,
            signature,
        })
    }

    /// Verify the signature against the key encoded in `author`.
    ///
    /// Returns the authenticated identity.
    pub fn verify(&self) -> Result<Identity, Error> {
        let invalid = || Error::InvalidSignature(self.author.clone());

        let mut key_bytes = [0u8; 32];
        hex::decode_to_slice(self.author.as_str(), &mut key_bytes).map_err(|_| invalid())?;
        let public_key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| invalid())?;

        let sig_bytes: [u8; 64] = self.signature.as_slice().try_into().map_err(|_| invalid())?;
        let signature = Signature::from_bytes(&sig_bytes);

        let content = signable_content(&self.author, &self.body)?;
        public_key
            .verify(&content, &signature)
            .map_err(|_| invalid())?;

        Ok(self.author.clone())
    }
}

/// Helper struct for signing (excludes the signature itself).
#[derive(Serialize)]
struct SignableRequest<'a> {
    author: &'a Identity,
    body: &'a [u8],
}

fn signable_content(author: &Identity, body: &[u8]) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    ciborium::into_writer(&SignableRequest { author, body }, &mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn signed_request_verifies() {
        let key = SigningKey::generate(&mut OsRng);
        let request = SignedRequest::new(br#"{"op":"session_counter"}"#.to_vec(), &key).unwrap();

        let identity = request.verify().unwrap();
        assert_eq!(identity, Identity::from_key(&key.verifying_key()));
        assert_eq!(identity.as_str().len(), 64);
    }

    #[test]
    fn tampered_body_is_rejected() {
        let key = SigningKey::generate(&mut OsRng);
        let mut request = SignedRequest::new(br#"{"op":"vote"}"#.to_vec(), &key).unwrap();
        request.body[2] ^= 0xFF;

        assert!(matches!(request.verify(), Err(Error::InvalidSignature(_))));
    }

    #[test]
    fn spoofed_author_is_rejected() {
        let key = SigningKey::generate(&mut OsRng);
        let other = SigningKey::generate(&mut OsRng);
        let mut request = SignedRequest::new(b"{}".to_vec(), &key).unwrap();
        request.author = Identity::from_key(&other.verifying_key());

        assert!(request.verify().is_err());
    }

    #[test]
    fn malformed_author_or_signature_is_rejected() {
        let key = SigningKey::generate(&mut OsRng);
        let mut request = SignedRequest::new(b"{}".to_vec(), &key).unwrap();
        request.signature.truncate(10);
        assert!(request.verify().is_err());

        let mut request = SignedRequest::new(b"{}".to_vec(), &key).unwrap();
        request.author = Identity::new("alice");
        assert!(request.verify().is_err());
    }
}
