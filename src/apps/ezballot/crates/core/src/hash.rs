//! Content digests using BLAKE3.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Error;

/// A 32-byte BLAKE3 digest.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// Hash arbitrary bytes.
    pub fn of(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Hash a serializable value through its canonical CBOR encoding.
    pub fn of_value<T: Serialize>(value: &T) -> Result<Self, Error> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)?;
        Ok(Self::of(&buf))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_deterministic() {
        assert_eq!(Hash::of(b"ballot"), Hash::of(b"ballot"));
        assert_ne!(Hash::of(b"ballot"), Hash::of(b"Ballot"));
    }

    #[test]
    fn value_hash_follows_content() {
        let a = Hash::of_value(&vec!["Movie1", "Movie2"]).unwrap();
        let b = Hash::of_value(&vec!["Movie2", "Movie1"]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn hex_form() {
        let h = Hash::of(b"test");
        assert_eq!(h.to_hex().len(), 64);
        assert_eq!(h.to_string(), h.to_hex());
        assert_eq!(format!("{h:?}"), format!("Hash({})", &h.to_hex()[..16]));
    }
}
