//! Control frames and command payloads

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core_room::{MemberId, MessageEnvelope};

pub use crate::core_room::JoinOutcome;

/// Commands understood on the control channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Front-end → host. Payload: topic text, possibly empty.
    JoinRoom,
    /// Front-end → host. Payload: message text.
    SendMessage,
    /// Host → front-end. Payload: JSON [`MessageNotice`].
    OnMessage,
    /// Front-end → host. Payload: hex public key.
    GetMemberId,
}

impl Command {
    pub fn code(self) -> u32 {
        match self {
            Command::JoinRoom => 1,
            Command::SendMessage => 2,
            Command::OnMessage => 3,
            Command::GetMemberId => 4,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Command::JoinRoom),
            2 => Some(Command::SendMessage),
            3 => Some(Command::OnMessage),
            4 => Some(Command::GetMemberId),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::JoinRoom => "JOIN_ROOM",
            Command::SendMessage => "SEND_MESSAGE",
            Command::OnMessage => "ON_MESSAGE",
            Command::GetMemberId => "GET_MEMBER_ID",
        };
        f.write_str(name)
    }
}

/// One frame on the wire.
///
/// `command` stays numeric so frames carrying commands this build does not
/// know still parse and can be skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlFrame {
    Request {
        id: String,
        command: u32,
        payload: String,
    },
    Reply {
        id: String,
        payload: String,
    },
}

/// SEND_MESSAGE reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendReply {
    pub fn sent() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(reason.into()),
        }
    }
}

/// ON_MESSAGE payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageNotice {
    pub member: MemberId,
    pub envelope: MessageEnvelope,
}

/// ON_MESSAGE reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub received: bool,
}
