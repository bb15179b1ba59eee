//! Room identifiers
//!
//! A [`Topic`] is the 32-byte key the swarm announces and looks up. Users type
//! either a canonical 64-hex-char topic, which is used verbatim, or any other
//! string, which is hashed with SHA-256. Resolving is therefore idempotent:
//! feeding a resolved topic back in yields the same topic.

use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of raw bytes in a topic
pub const TOPIC_LEN: usize = 32;

/// Length of the canonical hex form
pub const TOPIC_HEX_LEN: usize = TOPIC_LEN * 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    #[error("topic must be {TOPIC_HEX_LEN} hex characters, got {0}")]
    InvalidLength(usize),

    #[error("topic is not valid hex: {0}")]
    InvalidHex(String),
}

/// True iff `s` is exactly 64 characters, all hex digits (either case)
pub fn is_canonical(s: &str) -> bool {
    s.len() == TOPIC_HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Canonical 32-byte room identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic([u8; TOPIC_LEN]);

impl Topic {
    pub const fn from_bytes(bytes: [u8; TOPIC_LEN]) -> Self {
        Topic(bytes)
    }

    /// Resolve arbitrary user input into a topic. Never fails and performs no I/O.
    pub fn resolve(input: &str) -> Self {
        if is_canonical(input) {
            if let Ok(topic) = Self::from_hex(input) {
                return topic;
            }
        }
        Self::digest(input)
    }

    /// SHA-256 of the UTF-8 bytes of `input`
    pub fn digest(input: &str) -> Self {
        let hash = Sha256::digest(input.as_bytes());
        let mut bytes = [0u8; TOPIC_LEN];
        bytes.copy_from_slice(&hash);
        Topic(bytes)
    }

    /// A fresh topic from the thread-local CSPRNG.
    ///
    /// Callers must ask for this explicitly; resolving `""` hashes the empty
    /// string and would put everyone in the same room.
    pub fn random() -> Self {
        let mut bytes = [0u8; TOPIC_LEN];
        rand::rng().fill_bytes(&mut bytes);
        Topic(bytes)
    }

    /// Strict decode of the canonical form
    pub fn from_hex(s: &str) -> Result<Self, TopicError> {
        if s.len() != TOPIC_HEX_LEN {
            return Err(TopicError::InvalidLength(s.len()));
        }
        let mut bytes = [0u8; TOPIC_LEN];
        hex::decode_to_slice(s, &mut bytes).map_err(|e| TopicError::InvalidHex(e.to_string()))?;
        Ok(Topic(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; TOPIC_LEN] {
        &self.0
    }

    /// Canonical lowercase hex form
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Topic({}..)", &self.to_hex()[..12])
    }
}

impl FromStr for Topic {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Topic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Topic {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Topic::from_hex(&raw).map_err(serde::de::Error::custom)
    }
}
