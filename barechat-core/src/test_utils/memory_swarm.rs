//! In-memory swarm substrate
//!
//! Tests play the network: they decide when peers connect, what bytes they
//! send and when they go away. Every [`RecordingPeer`] keeps the bytes the
//! session wrote to it.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::core_room::{MessageEnvelope, Topic};
use crate::core_swarm::{ConnId, JoinMode, PeerStream, Swarm, SwarmError, SwarmEvent};

/// Swarm whose connections are driven by the test
pub struct MemorySwarm {
    joins: Mutex<Vec<(Topic, JoinMode)>>,
    flush: AtomicBool,
    fail: AtomicBool,
    destroyed: AtomicUsize,
    next_conn_id: AtomicU64,
    events: mpsc::UnboundedSender<SwarmEvent>,
}

impl MemorySwarm {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<SwarmEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let swarm = MemorySwarm {
            joins: Mutex::new(Vec::new()),
            flush: AtomicBool::new(true),
            fail: AtomicBool::new(false),
            destroyed: AtomicUsize::new(0),
            next_conn_id: AtomicU64::new(1),
            events,
        };
        (Arc::new(swarm), rx)
    }

    /// Make the next joins report (or not report) a flushed announcement
    pub fn set_flush(&self, flushed: bool) {
        self.flush.store(flushed, Ordering::SeqCst);
    }

    /// Make the next joins fail outright
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Topics passed to `join`, in call order
    pub async fn joined_topics(&self) -> Vec<Topic> {
        self.joins.lock().await.iter().map(|(t, _)| *t).collect()
    }

    pub async fn join_modes(&self) -> Vec<JoinMode> {
        self.joins.lock().await.iter().map(|(_, m)| *m).collect()
    }

    pub fn destroy_count(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Announce a new peer connection carrying `public_key`
    pub fn connect_peer(&self, public_key: &[u8]) -> (ConnId, Arc<RecordingPeer>) {
        let peer = Arc::new(RecordingPeer::new());
        let conn_id = self.connect_stream(public_key, peer.clone());
        (conn_id, peer)
    }

    /// Announce a connection backed by an arbitrary stream
    pub fn connect_stream(&self, public_key: &[u8], stream: Arc<dyn PeerStream>) -> ConnId {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::SeqCst);
        let _ = self.events.send(SwarmEvent::Connection {
            conn_id,
            remote_public_key: public_key.to_vec(),
            stream,
        });
        conn_id
    }

    /// Bytes arriving from a peer
    pub fn deliver(&self, conn_id: ConnId, bytes: impl Into<Vec<u8>>) {
        let _ = self.events.send(SwarmEvent::Data {
            conn_id,
            bytes: bytes.into(),
        });
    }

    pub fn close(&self, conn_id: ConnId) {
        let _ = self.events.send(SwarmEvent::Closed { conn_id });
    }

    pub fn fail_connection(&self, conn_id: ConnId) {
        let _ = self.events.send(SwarmEvent::Error {
            conn_id,
            error: SwarmError::Closed,
        });
    }
}

#[async_trait]
impl Swarm for MemorySwarm {
    async fn join(&self, topic: Topic, mode: JoinMode) -> Result<bool, SwarmError> {
        self.joins.lock().await.push((topic, mode));
        if self.fail.load(Ordering::SeqCst) {
            return Err(SwarmError::Handshake("injected join failure".to_string()));
        }
        Ok(self.flush.load(Ordering::SeqCst))
    }

    async fn destroy(&self) -> Result<(), SwarmError> {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Peer stream that records every write
#[derive(Default)]
pub struct RecordingPeer {
    writes: Mutex<Vec<Vec<u8>>>,
    failing: AtomicBool,
}

impl RecordingPeer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A peer whose writes always fail
    pub fn failing() -> Self {
        let peer = Self::default();
        peer.set_failing(true);
        peer
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().await.clone()
    }

    /// Writes decoded as envelopes, keeping the sender's `local` flag
    pub async fn envelopes(&self) -> Vec<MessageEnvelope> {
        self.writes
            .lock()
            .await
            .iter()
            .filter_map(|bytes| serde_json::from_slice(bytes).ok())
            .collect()
    }
}

#[async_trait]
impl PeerStream for RecordingPeer {
    async fn write(&self, bytes: &[u8]) -> Result<(), SwarmError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SwarmError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "peer went away",
            )));
        }
        self.writes.lock().await.push(bytes.to_vec());
        Ok(())
    }
}
