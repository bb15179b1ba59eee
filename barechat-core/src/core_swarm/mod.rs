//! Boundary to the peer-to-peer swarm substrate
//!
//! The substrate resolves a [`Topic`] to a set of live peer streams. The room
//! session only ever sees this module's traits and the [`SwarmEvent`] stream,
//! so any discovery system can sit behind it.
//!
//! ```text
//!   RoomSession ──join/destroy──► Swarm
//!        ▲                          │
//!        │ SwarmEvent               │ Connection / Data / Closed / Error
//!        └──────── SessionHost ◄────┘
//! ```

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::core_room::Topic;
use crate::framing::FrameError;

pub mod tcp;

pub use tcp::TcpSwarm;

/// Substrate-assigned identity of one live connection
pub type ConnId = u64;

#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Connection closed")]
    Closed,

    #[error("Swarm has been destroyed")]
    Destroyed,

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether a join announces this node, looks for others, or both
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinMode {
    pub client: bool,
    pub server: bool,
}

impl JoinMode {
    /// Advertise and discover at once. Joining a room nobody else is in
    /// creates it.
    pub const DUAL: JoinMode = JoinMode {
        client: true,
        server: true,
    };
}

/// Write side of one peer connection
#[async_trait]
pub trait PeerStream: Send + Sync {
    /// Send one complete message to the peer
    async fn write(&self, bytes: &[u8]) -> Result<(), SwarmError>;
}

/// Peer discovery and connection management
#[async_trait]
pub trait Swarm: Send + Sync {
    /// Announce and look up `topic`. Resolves once the announcement has been
    /// flushed; the flag reports whether flushing completed.
    async fn join(&self, topic: Topic, mode: JoinMode) -> Result<bool, SwarmError>;

    /// Drop every topic and connection
    async fn destroy(&self) -> Result<(), SwarmError>;
}

/// Everything the substrate reports about its connections
pub enum SwarmEvent {
    Connection {
        conn_id: ConnId,
        remote_public_key: Vec<u8>,
        stream: Arc<dyn PeerStream>,
    },
    Data {
        conn_id: ConnId,
        bytes: Vec<u8>,
    },
    Closed {
        conn_id: ConnId,
    },
    Error {
        conn_id: ConnId,
        error: SwarmError,
    },
}

impl SwarmEvent {
    pub fn conn_id(&self) -> ConnId {
        match self {
            SwarmEvent::Connection { conn_id, .. }
            | SwarmEvent::Data { conn_id, .. }
            | SwarmEvent::Closed { conn_id }
            | SwarmEvent::Error { conn_id, .. } => *conn_id,
        }
    }
}

impl fmt::Debug for SwarmEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwarmEvent::Connection {
                conn_id,
                remote_public_key,
                ..
            } => f
                .debug_struct("Connection")
                .field("conn_id", conn_id)
                .field("remote_public_key", &hex::encode(remote_public_key))
                .finish(),
            SwarmEvent::Data { conn_id, bytes } => f
                .debug_struct("Data")
                .field("conn_id", conn_id)
                .field("len", &bytes.len())
                .finish(),
            SwarmEvent::Closed { conn_id } => {
                f.debug_struct("Closed").field("conn_id", conn_id).finish()
            }
            SwarmEvent::Error { conn_id, error } => f
                .debug_struct("Error")
                .field("conn_id", conn_id)
                .field("error", &error.to_string())
                .finish(),
        }
    }
}
