/*
  TcpSwarm - minimal swarm substrate over plain TCP

  Lets the CLI run without an external discovery network: every node listens
  on one address and dials the configured bootstrap endpoints when it joins a
  topic. A connection becomes a peer once both sides have exchanged a hello
  frame and found at least one topic in common.

  Workflow:
  1. join(topic): remember the topic, start the listener (server mode), dial
     every bootstrap endpoint (client mode), then report the join as flushed.
  2. On any new socket: send our hello {publicKey, topics}, read theirs.
     No shared topic, or our own key reflected back, drops the socket.
  3. Accepted sockets are split: the write half becomes the PeerStream handed
     out in SwarmEvent::Connection, the read half gets a reader task.

┌──────────────┐       ┌──────────────┐       ┌──────────────┐
│   Listener   │       │   Conn #1    │       │   Conn #2    │
│    Task      │──────►│ Reader Task  │       │ Reader Task  │
│ (accept loop)│       │              │       │              │
└──────────────┘       └──────────────┘       └──────────────┘
                               │                       │
                               └───────┬───────────────┘
                                       │
                            SwarmEvent::Data / Closed / Error

  Frames are 4-byte length prefixed; one frame is one peer message.
*/

use async_trait::async_trait;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::AbortHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{ConnId, JoinMode, PeerStream, Swarm, SwarmError, SwarmEvent};
use crate::config::SwarmConfig;
use crate::core_room::Topic;
use crate::framing::{read_frame, write_frame};

/// Length of the random node key
pub const PUBLIC_KEY_LEN: usize = 32;

/// Hello frames only carry a key and a topic list
const MAX_HELLO_SIZE: usize = 16 * 1024;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Hello {
    public_key: String,
    topics: Vec<Topic>,
}

struct TcpPeer {
    writer: Mutex<OwnedWriteHalf>,
}

#[async_trait]
impl PeerStream for TcpPeer {
    async fn write(&self, bytes: &[u8]) -> Result<(), SwarmError> {
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, bytes).await?;
        Ok(())
    }
}

struct Inner {
    public_key: [u8; PUBLIC_KEY_LEN],
    config: SwarmConfig,
    topics: Mutex<HashSet<Topic>>,
    connections: Mutex<HashMap<ConnId, Arc<TcpPeer>>>,
    tasks: Mutex<Vec<AbortHandle>>,
    local_addr: Mutex<Option<SocketAddr>>,
    next_conn_id: AtomicU64,
    destroyed: AtomicBool,
    event_tx: mpsc::UnboundedSender<SwarmEvent>,
}

/// Swarm substrate speaking length-prefixed frames over TCP
#[derive(Clone)]
pub struct TcpSwarm {
    inner: Arc<Inner>,
}

impl TcpSwarm {
    /// Create a swarm with a fresh random node key
    pub fn new(config: SwarmConfig) -> (Self, mpsc::UnboundedReceiver<SwarmEvent>) {
        let mut key = [0u8; PUBLIC_KEY_LEN];
        rand::rng().fill_bytes(&mut key);
        Self::with_public_key(config, key)
    }

    pub fn with_public_key(
        config: SwarmConfig,
        public_key: [u8; PUBLIC_KEY_LEN],
    ) -> (Self, mpsc::UnboundedReceiver<SwarmEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let inner = Inner {
            public_key,
            config,
            topics: Mutex::new(HashSet::new()),
            connections: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
            local_addr: Mutex::new(None),
            next_conn_id: AtomicU64::new(1),
            destroyed: AtomicBool::new(false),
            event_tx,
        };

        (
            TcpSwarm {
                inner: Arc::new(inner),
            },
            event_rx,
        )
    }

    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.inner.public_key
    }

    /// Address the listener is bound to, once listening
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock().await
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.connections.lock().await.len()
    }

    /// Bind the listener if it is not running yet
    pub async fn listen(&self) -> Result<SocketAddr, SwarmError> {
        let mut local_addr = self.inner.local_addr.lock().await;
        if let Some(addr) = *local_addr {
            return Ok(addr);
        }

        let addr = self.inner.config.listen_address.clone();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| SwarmError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let bound = listener.local_addr()?;
        *local_addr = Some(bound);
        drop(local_addr);

        info!(addr = %bound, "Swarm listening");

        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((socket, peer_addr)) => {
                        debug!(%peer_addr, "Inbound connection");
                        let inner = inner.clone();
                        tokio::spawn(async move {
                            if let Err(e) = inner.handshake(socket).await {
                                debug!(%peer_addr, error = %e, "Inbound handshake rejected");
                            }
                        });
                    }
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                    }
                }
            }
        });
        self.inner.track(task.abort_handle()).await;

        Ok(bound)
    }

    /// Connect to one endpoint and run the hello exchange
    pub async fn dial(&self, addr: &str) -> Result<(), SwarmError> {
        let socket = timeout(self.inner.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| SwarmError::Handshake(format!("connect to {} timed out", addr)))??;

        self.inner.handshake(socket).await
    }
}

impl Inner {
    async fn track(&self, task: AbortHandle) {
        let mut tasks = self.tasks.lock().await;
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    async fn handshake(self: &Arc<Self>, socket: TcpStream) -> Result<(), SwarmError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(SwarmError::Destroyed);
        }

        let (mut reader, mut writer) = socket.into_split();

        let hello = Hello {
            public_key: hex::encode(self.public_key),
            topics: self.topics.lock().await.iter().copied().collect(),
        };
        let bytes = serde_json::to_vec(&hello).map_err(|e| SwarmError::Handshake(e.to_string()))?;
        write_frame(&mut writer, &bytes).await?;

        let frame = timeout(
            self.config.connect_timeout,
            read_frame(&mut reader, MAX_HELLO_SIZE),
        )
        .await
        .map_err(|_| SwarmError::Handshake("timed out waiting for hello".to_string()))??
        .ok_or(SwarmError::Closed)?;

        let remote: Hello = serde_json::from_slice(&frame)
            .map_err(|e| SwarmError::Handshake(format!("malformed hello: {}", e)))?;
        let remote_key = hex::decode(&remote.public_key)
            .map_err(|e| SwarmError::Handshake(format!("malformed key: {}", e)))?;

        if remote_key == self.public_key {
            return Err(SwarmError::Handshake("connected to self".to_string()));
        }

        let shared = {
            let topics = self.topics.lock().await;
            remote.topics.iter().any(|t| topics.contains(t))
        };
        if !shared {
            return Err(SwarmError::Handshake("no shared topic".to_string()));
        }

        let conn_id = self.next_conn_id.fetch_add(1, Ordering::SeqCst);
        let peer = Arc::new(TcpPeer {
            writer: Mutex::new(writer),
        });
        self.connections.lock().await.insert(conn_id, peer.clone());

        if self
            .event_tx
            .send(SwarmEvent::Connection {
                conn_id,
                remote_public_key: remote_key,
                stream: peer,
            })
            .is_err()
        {
            debug!(conn_id, "Event receiver dropped; discarding connection");
            self.connections.lock().await.remove(&conn_id);
            return Err(SwarmError::Closed);
        }

        let inner = self.clone();
        let task = tokio::spawn(async move { inner.read_loop(conn_id, reader).await });
        self.track(task.abort_handle()).await;

        Ok(())
    }

    async fn read_loop(self: Arc<Self>, conn_id: ConnId, mut reader: OwnedReadHalf) {
        loop {
            match read_frame(&mut reader, self.config.max_message_size).await {
                Ok(Some(bytes)) => {
                    if self
                        .event_tx
                        .send(SwarmEvent::Data { conn_id, bytes })
                        .is_err()
                    {
                        break;
                    }
                }
                Ok(None) => {
                    let _ = self.event_tx.send(SwarmEvent::Closed { conn_id });
                    break;
                }
                Err(e) => {
                    let _ = self.event_tx.send(SwarmEvent::Error {
                        conn_id,
                        error: e.into(),
                    });
                    break;
                }
            }
        }

        self.connections.lock().await.remove(&conn_id);
    }
}

#[async_trait]
impl Swarm for TcpSwarm {
    async fn join(&self, topic: Topic, mode: JoinMode) -> Result<bool, SwarmError> {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            return Err(SwarmError::Destroyed);
        }

        self.inner.topics.lock().await.insert(topic);

        if mode.server {
            self.listen().await?;
        }

        if mode.client {
            for addr in &self.inner.config.bootstrap {
                if let Err(e) = self.dial(addr).await {
                    warn!(peer = %addr, error = %e, "Bootstrap dial failed");
                }
            }
        }

        Ok(true)
    }

    async fn destroy(&self) -> Result<(), SwarmError> {
        self.inner.destroyed.store(true, Ordering::SeqCst);

        for task in self.inner.tasks.lock().await.drain(..) {
            task.abort();
        }
        self.inner.topics.lock().await.clear();
        *self.inner.local_addr.lock().await = None;

        let connections: Vec<_> = self.inner.connections.lock().await.drain().collect();
        for (conn_id, peer) in connections {
            let mut writer = peer.writer.lock().await;
            if let Err(e) = writer.shutdown().await {
                debug!(conn_id, error = %e, "Socket shutdown failed");
            }
            let _ = self.inner.event_tx.send(SwarmEvent::Closed { conn_id });
        }

        info!("Swarm destroyed");
        Ok(())
    }
}
