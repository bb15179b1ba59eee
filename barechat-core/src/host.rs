//! Session host
//!
//! Binds one [`RoomSession`] to a swarm substrate, any number of control
//! channels and an optional [`LogStore`]. Everything that touches the session
//! happens inside [`SessionHost::run`], one event at a time:
//!
//! ```text
//!  front-ends ──ControlRequest──┐
//!  substrate  ──SwarmEvent──────┼──► run() ──► RoomSession
//!  session    ──SessionEvent────┤        └──► ON_MESSAGE to every front-end
//!  shutdown   ──ShutdownSignal──┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::config::{Config, ControlConfig};
use crate::core_control::{
    Ack, Command, ControlChannel, ControlError, ControlRequest, JoinOutcome, MessageNotice,
    SendReply,
};
use crate::core_room::{MemberId, MessageEnvelope, RoomSession, SessionEvent};
use crate::core_swarm::{Swarm, SwarmError, SwarmEvent};
use crate::shutdown::ShutdownSignal;
use crate::store::{LogStore, StoreError};

/// Label under which this session's own messages are logged
pub const LOCAL_MEMBER: &str = "you";

/// Label on presence notices sent to front-ends
pub const SYSTEM_MEMBER: &str = "system";

/// Capacity of the shared control request queue
const REQUEST_QUEUE_SIZE: usize = 64;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("Swarm error: {0}")]
    Swarm(#[from] SwarmError),

    #[error("Log store error: {0}")]
    Store(#[from] StoreError),
}

/// Cloneable way to attach front-ends to a host that is already running
#[derive(Clone)]
pub struct HostHandle {
    requests: mpsc::Sender<ControlRequest>,
    attach: mpsc::UnboundedSender<ControlChannel>,
    config: ControlConfig,
}

impl HostHandle {
    /// Serve the control protocol over `stream`
    pub fn attach_control<S>(&self, stream: S) -> ControlChannel
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let channel = ControlChannel::spawn_with_sink(stream, &self.config, self.requests.clone());
        if self.attach.send(channel.clone()).is_err() {
            debug!("Host stopped; front-end will not receive notifications");
        }
        channel
    }
}

pub struct SessionHost {
    swarm: Arc<dyn Swarm>,
    swarm_events: mpsc::UnboundedReceiver<SwarmEvent>,
    config: Config,
    session: Option<RoomSession>,
    session_tx: mpsc::UnboundedSender<SessionEvent>,
    session_rx: mpsc::UnboundedReceiver<SessionEvent>,
    controls: Vec<ControlChannel>,
    request_tx: mpsc::Sender<ControlRequest>,
    request_rx: mpsc::Receiver<ControlRequest>,
    attach_tx: mpsc::UnboundedSender<ControlChannel>,
    attach_rx: mpsc::UnboundedReceiver<ControlChannel>,
    log_store: Option<Box<dyn LogStore>>,
}

impl SessionHost {
    pub fn new(
        swarm: Arc<dyn Swarm>,
        swarm_events: mpsc::UnboundedReceiver<SwarmEvent>,
        config: Config,
    ) -> Self {
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let (request_tx, request_rx) = mpsc::channel(REQUEST_QUEUE_SIZE);
        let (attach_tx, attach_rx) = mpsc::unbounded_channel();

        Self {
            swarm,
            swarm_events,
            config,
            session: None,
            session_tx,
            session_rx,
            controls: Vec::new(),
            request_tx,
            request_rx,
            attach_tx,
            attach_rx,
            log_store: None,
        }
    }

    pub fn with_log_store(mut self, store: impl LogStore + 'static) -> Self {
        self.log_store = Some(Box::new(store));
        self
    }

    /// Serve the control protocol over `stream`
    pub fn attach_control<S>(&mut self, stream: S) -> ControlChannel
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let channel =
            ControlChannel::spawn_with_sink(stream, &self.config.control, self.request_tx.clone());
        self.controls.push(channel.clone());
        channel
    }

    pub fn handle(&self) -> HostHandle {
        HostHandle {
            requests: self.request_tx.clone(),
            attach: self.attach_tx.clone(),
            config: self.config.control.clone(),
        }
    }

    pub fn session(&self) -> Option<&RoomSession> {
        self.session.as_ref()
    }

    /// Process events until a shutdown signal arrives, then tear down.
    ///
    /// Returns where the chat log was saved, if anywhere.
    pub async fn run(
        mut self,
        mut shutdown: broadcast::Receiver<ShutdownSignal>,
    ) -> Result<Option<PathBuf>, HostError> {
        info!("Session host running");

        loop {
            // Session events are only produced by the handlers below
            tokio::select! {
                biased;

                signal = shutdown.recv() => {
                    let graceful = !matches!(signal, Ok(ShutdownSignal::Immediate));
                    return self.teardown(graceful).await;
                }
                Some(channel) = self.attach_rx.recv() => {
                    self.controls.push(channel);
                }
                Some(event) = self.session_rx.recv() => {
                    self.handle_session_event(event).await;
                }
                Some(request) = self.request_rx.recv() => {
                    self.handle_request(request).await;
                }
                Some(event) = self.swarm_events.recv() => {
                    self.handle_swarm_event(event);
                }
            }
        }
    }

    /// Leave the room, release the swarm and close the log store
    pub async fn shutdown(&mut self) -> Result<Option<PathBuf>, HostError> {
        self.teardown(true).await
    }

    async fn teardown(&mut self, graceful: bool) -> Result<Option<PathBuf>, HostError> {
        info!(graceful, "Session host shutting down");

        let left = match self.session.as_mut() {
            Some(session) if graceful => session.leave().await,
            _ => Ok(()),
        };
        if let Err(e) = &left {
            warn!(error = %e, "Failed to leave room cleanly");
        }

        let destroyed = self.swarm.destroy().await;

        let closed = match self.log_store.as_mut() {
            Some(store) => store.close(),
            None => Ok(None),
        };
        match &closed {
            Ok(Some(path)) => info!(path = %path.display(), "Chat log saved"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to close chat log"),
        }

        left?;
        destroyed?;
        Ok(closed?)
    }

    async fn handle_request(&mut self, request: ControlRequest) {
        debug!(id = %request.id, command = %request.command, "Control request");

        let result = match request.command {
            Command::JoinRoom => {
                let outcome = self.join(&request.payload).await;
                request.reply_json(&outcome)
            }
            Command::SendMessage => {
                let reply = self.send(&request.payload).await;
                request.reply_json(&reply)
            }
            Command::GetMemberId => {
                let member = MemberId::from_hex_key(&request.payload);
                request.reply_json(&member)
            }
            Command::OnMessage => {
                debug!(id = %request.id, "ON_MESSAGE is host-to-front-end only; ignoring");
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!(error = %e, "Failed to reply to control request");
        }
    }

    async fn join(&mut self, input: &str) -> JoinOutcome {
        let max_message_size = self.config.swarm.max_message_size;
        let session = self.session.get_or_insert_with(|| {
            RoomSession::new(self.swarm.clone(), self.session_tx.clone())
                .with_max_message_size(max_message_size)
        });

        let outcome = session.join_or_create(input).await;

        if outcome.ok {
            if let Some(store) = self.log_store.as_mut() {
                match store.setup(&outcome.topic) {
                    Ok(true) => debug!(topic = %outcome.topic, "Chat log started"),
                    Ok(false) => {}
                    Err(e) => warn!(error = %e, "Failed to start chat log"),
                }
            }
        }

        outcome
    }

    async fn send(&mut self, text: &str) -> SendReply {
        let Some(session) = self.session.as_mut().filter(|s| s.is_joined()) else {
            return SendReply::rejected("not joined");
        };

        let report = session.broadcast(text).await;
        debug!(
            delivered = report.delivered,
            failed = report.failed,
            "Message sent"
        );

        self.append_log(LOCAL_MEMBER, text);
        SendReply::sent()
    }

    fn handle_swarm_event(&mut self, event: SwarmEvent) {
        let Some(session) = self.session.as_mut() else {
            debug!(?event, "Swarm event before any join; ignoring");
            return;
        };

        match event {
            SwarmEvent::Connection {
                conn_id,
                remote_public_key,
                stream,
            } => session.on_peer_connected(conn_id, &remote_public_key, stream),
            SwarmEvent::Data { conn_id, bytes } => session.on_peer_data(conn_id, &bytes),
            SwarmEvent::Closed { conn_id } => session.on_peer_closed(conn_id),
            SwarmEvent::Error { conn_id, error } => {
                warn!(conn_id, error = %error, "Peer connection failed");
                session.on_peer_closed(conn_id);
            }
        }
    }

    async fn handle_session_event(&mut self, event: SessionEvent) {
        let notice = match event {
            SessionEvent::MessageReceived { member, envelope } => {
                self.append_log(member.as_str(), &envelope.message);
                MessageNotice { member, envelope }
            }
            SessionEvent::PeerJoined { member, peers } => MessageNotice {
                member: MemberId::named(SYSTEM_MEMBER),
                envelope: MessageEnvelope::system(format!(
                    "New peer joined: {} ({} connected)",
                    member, peers
                )),
            },
            SessionEvent::PeerLeft { member, peers } => MessageNotice {
                member: MemberId::named(SYSTEM_MEMBER),
                envelope: MessageEnvelope::system(format!(
                    "Peer left: {} ({} connected)",
                    member, peers
                )),
            },
        };

        self.notify(&notice).await;
    }

    /// Send ON_MESSAGE to every live front-end. Acks are awaited off the loop.
    async fn notify(&mut self, notice: &MessageNotice) {
        self.controls.retain(|c| !c.is_closed());

        for control in &self.controls {
            let pending = match control.notify_message(notice).await {
                Ok(pending) => pending,
                Err(e) => {
                    debug!(error = %e, "Front-end unavailable");
                    continue;
                }
            };

            tokio::spawn(async move {
                match pending.wait_json::<Ack>().await {
                    Ok(_) => {}
                    Err(ControlError::Timeout) => warn!("Front-end did not acknowledge message"),
                    Err(e) => debug!(error = %e, "Message notification failed"),
                }
            });
        }
    }

    fn append_log(&mut self, member: &str, message: &str) {
        let Some(store) = self.log_store.as_mut() else {
            return;
        };
        if let Err(e) = store.append(member, message) {
            warn!(error = %e, "Failed to write chat log");
        }
    }
}
