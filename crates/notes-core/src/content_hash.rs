//! Content hashing for upload avoidance.
//!
//! The sync engine records the hash of every note it uploads. A note whose
//! canonical serialization hashes to the recorded value is byte-identical to
//! the remote copy and is skipped.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::codec;
use crate::note::Note;

/// SHA-256 of a note's canonical serialization, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Compute hash from content bytes.
    pub fn from_content(content: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Hash of the note as it would be uploaded.
    pub fn of_note(note: &Note) -> Self {
        Self::from_content(&codec::canonical(note))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
