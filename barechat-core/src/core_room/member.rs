//! Short display labels for peers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of public-key bytes folded into a label
const LABEL_BYTES: usize = 3;

/// Label used when a peer presents no key at all
pub const INVALID_MEMBER: &str = "invalid";

/// Six hex characters taken from the front of a peer's public key.
///
/// Labels are for humans, not identity: two keys sharing their first three
/// bytes get the same label and nothing tries to tell them apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    pub fn from_public_key(key: &[u8]) -> Self {
        if key.is_empty() {
            return MemberId(INVALID_MEMBER.to_string());
        }
        MemberId(hex::encode(&key[..key.len().min(LABEL_BYTES)]))
    }

    /// Label for a hex-encoded key as sent over the control channel
    pub fn from_hex_key(key: &str) -> Self {
        match hex::decode(key.trim()) {
            Ok(bytes) => Self::from_public_key(&bytes),
            Err(_) => MemberId(INVALID_MEMBER.to_string()),
        }
    }

    /// A fixed label for things that are not peers (`you`, `system`)
    pub fn named(label: &str) -> Self {
        MemberId(label.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
