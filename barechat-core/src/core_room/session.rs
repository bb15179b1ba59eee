//! Room session
//!
//! Owns the joined topics and the set of connected peers, and turns swarm
//! traffic into [`SessionEvent`]s.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │          SessionHost loop            │
//! │  • control requests                  │
//! │  • swarm events (routed by ConnId)   │
//! └─────────────┬────────────────────────┘
//!               │ join_or_create / broadcast / on_peer_*
//!               ▼
//! ┌──────────────────────────────────────┐
//! │          RoomSession                 │
//! │  • topics, peers[ConnId]             │
//! │  • envelope encode / decode          │
//! └───────┬─────────────────────┬────────┘
//!         │ Swarm / PeerStream  │ SessionEvent (unbounded mpsc)
//!         ▼                     ▼
//!     substrate            SessionHost
//! ```
//!
//! The session never blocks on its consumer and never holds a peer past the
//! close, error, or failed write that removed it.

use futures::future::join_all;
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::envelope::{MessageEnvelope, MessageType};
use super::member::MemberId;
use super::topic::Topic;
use crate::config::DEFAULT_MAX_FRAME_SIZE;
use crate::core_swarm::{ConnId, JoinMode, PeerStream, Swarm, SwarmError};

/// Body of the envelope a session sends just before tearing down
pub const LEAVE_MESSAGE: &str = "leaved";

/// Notifications for whoever drives the session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PeerJoined { member: MemberId, peers: usize },
    PeerLeft { member: MemberId, peers: usize },
    MessageReceived {
        member: MemberId,
        envelope: MessageEnvelope,
    },
}

/// Result of a join request, also the JOIN_ROOM reply payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinOutcome {
    pub ok: bool,
    pub topic: String,
}

impl JoinOutcome {
    fn joined(topic: &Topic) -> Self {
        Self {
            ok: true,
            topic: topic.to_hex(),
        }
    }

    fn not_flushed() -> Self {
        Self {
            ok: false,
            topic: String::new(),
        }
    }

    fn failed() -> Self {
        Self {
            ok: false,
            topic: "err".to_string(),
        }
    }
}

/// How a fan-out went
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

struct Peer {
    member: MemberId,
    stream: Arc<dyn PeerStream>,
}

pub struct RoomSession {
    swarm: Arc<dyn Swarm>,
    topics: Vec<Topic>,
    peers: HashMap<ConnId, Peer>,
    joined: bool,
    max_message_size: usize,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl RoomSession {
    pub fn new(swarm: Arc<dyn Swarm>, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            swarm,
            topics: Vec::new(),
            peers: HashMap::new(),
            joined: false,
            max_message_size: DEFAULT_MAX_FRAME_SIZE,
            events,
        }
    }

    /// Largest envelope accepted from a peer
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    /// Join the room named by `input`, or a fresh random room when it is empty.
    ///
    /// Joining again adds another subscription; the newest topic becomes the
    /// current one. Substrate failures are logged and reported in the outcome.
    pub async fn join_or_create(&mut self, input: &str) -> JoinOutcome {
        let topic = if input.is_empty() {
            Topic::random()
        } else {
            Topic::resolve(input)
        };

        match self.swarm.join(topic, JoinMode::DUAL).await {
            Ok(true) => {
                self.topics.retain(|t| *t != topic);
                self.topics.push(topic);
                self.joined = true;
                info!(topic = %topic, "Joined room");
                JoinOutcome::joined(&topic)
            }
            Ok(false) => {
                warn!(topic = %topic, "Swarm did not flush the announcement");
                JoinOutcome::not_flushed()
            }
            Err(e) => {
                warn!(topic = %topic, error = %e, "Failed to join room");
                JoinOutcome::failed()
            }
        }
    }

    pub fn on_peer_connected(
        &mut self,
        conn_id: ConnId,
        remote_public_key: &[u8],
        stream: Arc<dyn PeerStream>,
    ) {
        let member = MemberId::from_public_key(remote_public_key);
        if let Some(previous) = self.peers.insert(
            conn_id,
            Peer {
                member: member.clone(),
                stream,
            },
        ) {
            debug!(conn_id, member = %previous.member, "Connection id reused; replacing peer");
        }

        let peers = self.peers.len();
        gauge!("barechat_peers").set(peers as f64);
        info!(conn_id, member = %member, peers, "Peer connected");

        let _ = self.events.send(SessionEvent::PeerJoined { member, peers });
    }

    pub fn on_peer_data(&mut self, conn_id: ConnId, bytes: &[u8]) {
        let Some(peer) = self.peers.get(&conn_id) else {
            debug!(conn_id, "Data from unknown connection ignored");
            return;
        };

        match MessageEnvelope::decode_remote(bytes, self.max_message_size) {
            Ok(envelope) => {
                counter!("barechat_messages_received_total").increment(1);
                let _ = self.events.send(SessionEvent::MessageReceived {
                    member: peer.member.clone(),
                    envelope,
                });
            }
            Err(e) => {
                counter!("barechat_envelopes_dropped_total").increment(1);
                warn!(conn_id, member = %peer.member, error = %e, "Dropping malformed envelope");
            }
        }
    }

    /// Forget a peer after its connection closed or errored
    pub fn on_peer_closed(&mut self, conn_id: ConnId) {
        let Some(peer) = self.peers.remove(&conn_id) else {
            return;
        };

        let peers = self.peers.len();
        gauge!("barechat_peers").set(peers as f64);
        info!(conn_id, member = %peer.member, peers, "Peer disconnected");

        let _ = self.events.send(SessionEvent::PeerLeft {
            member: peer.member,
            peers,
        });
    }

    /// Send `text` to every connected peer
    pub async fn broadcast(&mut self, text: &str) -> BroadcastReport {
        let envelope = MessageEnvelope::text(text);
        let report = self.send_envelope(&envelope).await;
        counter!("barechat_messages_sent_total").increment(1);
        report
    }

    async fn send_envelope(&mut self, envelope: &MessageEnvelope) -> BroadcastReport {
        let bytes = match envelope.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Failed to encode envelope");
                return BroadcastReport {
                    delivered: 0,
                    failed: self.peers.len(),
                };
            }
        };

        let targets: Vec<(ConnId, Arc<dyn PeerStream>)> = self
            .peers
            .iter()
            .map(|(conn_id, peer)| (*conn_id, peer.stream.clone()))
            .collect();

        let bytes = &bytes;
        let results = join_all(targets.into_iter().map(|(conn_id, stream)| async move {
            (conn_id, stream.write(bytes).await)
        }))
        .await;

        let mut report = BroadcastReport::default();
        for (conn_id, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    counter!("barechat_peer_write_failures_total").increment(1);
                    warn!(conn_id, error = %e, "Failed to write to peer");
                    self.on_peer_closed(conn_id);
                }
            }
        }

        debug!(
            delivered = report.delivered,
            failed = report.failed,
            message_type = ?envelope.message_type,
            "Broadcast complete"
        );
        report
    }

    /// Say goodbye to every peer, then release the swarm.
    ///
    /// Does nothing when no room has been joined.
    pub async fn leave(&mut self) -> Result<(), SwarmError> {
        if !self.joined {
            return Ok(());
        }

        let farewell = MessageEnvelope::outgoing(LEAVE_MESSAGE, MessageType::Leave);
        self.send_envelope(&farewell).await;

        let result = self.swarm.destroy().await;

        self.peers.clear();
        self.topics.clear();
        self.joined = false;
        gauge!("barechat_peers").set(0.0);
        info!("Left room");

        result
    }

    /// The most recently joined topic
    pub fn topic(&self) -> Option<Topic> {
        self.topics.last().copied()
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn members(&self) -> Vec<MemberId> {
        self.peers.values().map(|p| p.member.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{try_drain, MemorySwarm, RecordingPeer};

    fn session() -> (
        RoomSession,
        Arc<MemorySwarm>,
        mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let (swarm, _swarm_events) = MemorySwarm::new();
        let (tx, rx) = mpsc::unbounded_channel();
        (RoomSession::new(swarm.clone(), tx), swarm, rx)
    }

    fn add_peer(session: &mut RoomSession, conn_id: ConnId, key: &[u8]) -> Arc<RecordingPeer> {
        let peer = Arc::new(RecordingPeer::new());
        session.on_peer_connected(conn_id, key, peer.clone());
        peer
    }

    #[tokio::test]
    async fn test_join_by_name_then_by_digest() {
        let (mut session, swarm, _rx) = session();

        let first = session.join_or_create("soccer").await;
        assert!(first.ok);
        assert_eq!(first.topic.len(), 64);

        let second = session.join_or_create(&first.topic).await;
        assert_eq!(second, first);
        assert_eq!(session.topics().len(), 1);
        assert_eq!(swarm.join_modes().await, vec![JoinMode::DUAL, JoinMode::DUAL]);
    }

    #[tokio::test]
    async fn test_empty_input_creates_random_rooms() {
        let (mut session, _swarm, _rx) = session();

        let a = session.join_or_create("").await;
        let b = session.join_or_create("").await;

        assert!(a.ok && b.ok);
        assert_ne!(a.topic, b.topic);
        assert_eq!(session.topics().len(), 2);
        assert_eq!(session.topic().map(|t| t.to_hex()), Some(b.topic));
    }

    #[tokio::test]
    async fn test_join_not_flushed() {
        let (mut session, swarm, _rx) = session();
        swarm.set_flush(false);

        let outcome = session.join_or_create("quiet").await;
        assert_eq!(outcome, JoinOutcome::not_flushed());
        assert!(!session.is_joined());
        assert!(session.topic().is_none());
    }

    #[tokio::test]
    async fn test_join_substrate_error() {
        let (mut session, swarm, _rx) = session();
        swarm.set_fail(true);

        let outcome = session.join_or_create("broken").await;
        assert!(!outcome.ok);
        assert_eq!(outcome.topic, "err");
        assert!(!session.is_joined());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_peer_once() {
        let (mut session, _swarm, _rx) = session();
        session.join_or_create("room").await;

        let peers: Vec<_> = (1..=3)
            .map(|i| add_peer(&mut session, i, &[i as u8, 0, 0, 0]))
            .collect();

        let report = session.broadcast("hi").await;
        assert_eq!(report, BroadcastReport { delivered: 3, failed: 0 });

        for peer in peers {
            let envelopes = peer.envelopes().await;
            assert_eq!(envelopes.len(), 1);
            assert_eq!(envelopes[0].message, "hi");
            assert!(envelopes[0].local);
            assert_eq!(envelopes[0].message_type, MessageType::Text);
        }
    }

    #[tokio::test]
    async fn test_failed_write_removes_only_that_peer() {
        let (mut session, _swarm, mut rx) = session();
        let good = add_peer(&mut session, 1, &[0xaa, 0xbb, 0xcc]);
        let bad = Arc::new(RecordingPeer::failing());
        session.on_peer_connected(2, &[0x11, 0x22, 0x33], bad);
        try_drain(&mut rx);

        let report = session.broadcast("still here").await;
        assert_eq!(report, BroadcastReport { delivered: 1, failed: 1 });
        assert_eq!(session.peer_count(), 1);
        assert_eq!(good.writes().await.len(), 1);

        assert_eq!(
            try_drain(&mut rx),
            vec![SessionEvent::PeerLeft {
                member: MemberId::from_public_key(&[0x11, 0x22, 0x33]),
                peers: 1,
            }]
        );
    }

    #[tokio::test]
    async fn test_malformed_data_keeps_peer() {
        let (mut session, _swarm, mut rx) = session();
        add_peer(&mut session, 7, &[1, 2, 3]);
        try_drain(&mut rx);

        session.on_peer_data(7, b"{not an envelope");
        session.on_peer_data(7, &[0xff, 0xfe]);

        assert_eq!(session.peer_count(), 1);
        assert!(try_drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_received_envelope_is_never_local() {
        let (mut session, _swarm, mut rx) = session();
        add_peer(&mut session, 4, &[0xde, 0xad, 0xbe, 0xef]);
        try_drain(&mut rx);

        let bytes = MessageEnvelope::text("over the wire").encode().unwrap();
        session.on_peer_data(4, &bytes);
        session.on_peer_data(99, &bytes);

        let events = try_drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            SessionEvent::MessageReceived { member, envelope } => {
                assert_eq!(member.as_str(), "deadbe");
                assert_eq!(envelope.message, "over the wire");
                assert!(!envelope.local);
            }
            other => panic!("Expected MessageReceived, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_oversized_envelope_dropped() {
        let (swarm, _swarm_events) = MemorySwarm::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = RoomSession::new(swarm, tx).with_max_message_size(16);
        add_peer(&mut session, 1, &[1, 2, 3]);
        try_drain(&mut rx);

        let bytes = MessageEnvelope::text("this will not fit").encode().unwrap();
        session.on_peer_data(1, &bytes);

        assert!(try_drain(&mut rx).is_empty());
        assert_eq!(session.peer_count(), 1);
    }

    #[tokio::test]
    async fn test_presence_events() {
        let (mut session, _swarm, mut rx) = session();
        add_peer(&mut session, 1, &[0xab, 0xcd, 0xef]);
        add_peer(&mut session, 2, &[]);
        session.on_peer_closed(1);
        session.on_peer_closed(1);

        let member = MemberId::from_public_key(&[0xab, 0xcd, 0xef]);
        assert_eq!(
            try_drain(&mut rx),
            vec![
                SessionEvent::PeerJoined {
                    member: member.clone(),
                    peers: 1
                },
                SessionEvent::PeerJoined {
                    member: MemberId::named("invalid"),
                    peers: 2
                },
                SessionEvent::PeerLeft { member, peers: 1 },
            ]
        );
        assert_eq!(session.members(), vec![MemberId::named("invalid")]);
    }

    #[tokio::test]
    async fn test_leave_says_goodbye_then_destroys() {
        let (mut session, swarm, _rx) = session();
        session.join_or_create("farewell").await;
        let a = add_peer(&mut session, 1, &[1, 1, 1]);
        let b = add_peer(&mut session, 2, &[2, 2, 2]);

        session.broadcast("bye all").await;
        session.leave().await.unwrap();

        for peer in [a, b] {
            let envelopes = peer.envelopes().await;
            assert_eq!(envelopes.len(), 2);
            let last = envelopes.last().unwrap();
            assert_eq!(last.message_type, MessageType::Leave);
            assert_eq!(last.message, LEAVE_MESSAGE);
        }

        assert_eq!(swarm.destroy_count(), 1);
        assert!(!session.is_joined());
        assert_eq!(session.peer_count(), 0);
        assert!(session.topics().is_empty());
    }

    #[tokio::test]
    async fn test_leave_without_join_is_noop() {
        let (mut session, swarm, _rx) = session();
        let peer = add_peer(&mut session, 1, &[1, 2, 3]);

        session.leave().await.unwrap();

        assert_eq!(swarm.destroy_count(), 0);
        assert!(peer.writes().await.is_empty());
    }
}
