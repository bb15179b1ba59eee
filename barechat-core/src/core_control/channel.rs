/*
    ControlChannel - request/reply over one ordered byte stream

    Both ends run the same code. Either side may issue requests; whatever
    arrives from the other side is handed to the local driver together with a
    one-shot reply handle.

    Workflow:

    1. request(command, payload):
        - generate a UUID v4 correlation id
        - register a pending entry guarded by a timeout task
        - queue a `request` frame for the writer task
        - wait for the matching `reply` or the timeout

    2. Reader task, per frame:
        - `reply`: resolve the pending entry, abort its timeout
        - `request` with a known command: deliver a ControlRequest to the sink,
          write the reply frame once the driver answers
        - anything else: log at debug and skip

    3. End of stream, I/O error or an oversized frame ends the reader. Every
       pending request then fails with ControlError::Closed.

    Frames are JSON in 4-byte big-endian length-prefixed envelopes:

    ```json
    { "type": "request", "id": "<uuid>", "command": 2, "payload": "hello" }
    { "type": "reply",   "id": "<uuid>", "payload": "{\"ok\":true}" }
    ```
*/

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::AbortHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::ControlError;
use super::protocol::{Ack, Command, ControlFrame, JoinOutcome, MessageNotice, SendReply};
use crate::config::ControlConfig;
use crate::framing::{read_frame, write_frame, FrameError};

/// Capacity of the inbound request queue created by [`ControlChannel::spawn`]
const REQUEST_QUEUE_SIZE: usize = 64;

/// A request from the other side, waiting for a reply
#[derive(Debug)]
pub struct ControlRequest {
    pub id: String,
    pub command: Command,
    pub payload: String,
    reply_tx: oneshot::Sender<String>,
}

impl ControlRequest {
    /// A request built in-process, with a fresh correlation id
    pub fn new(command: Command, payload: impl Into<String>) -> (Self, oneshot::Receiver<String>) {
        Self::with_id(Uuid::new_v4().to_string(), command, payload)
    }

    pub fn with_id(
        id: impl Into<String>,
        command: Command,
        payload: impl Into<String>,
    ) -> (Self, oneshot::Receiver<String>) {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = ControlRequest {
            id: id.into(),
            command,
            payload: payload.into(),
            reply_tx,
        };
        (request, reply_rx)
    }

    pub fn reply(self, payload: impl Into<String>) {
        if self.reply_tx.send(payload.into()).is_err() {
            debug!(id = %self.id, "Channel closed before reply was sent");
        }
    }

    pub fn reply_json<T: Serialize>(self, value: &T) -> Result<(), ControlError> {
        let payload = serde_json::to_string(value)?;
        self.reply(payload);
        Ok(())
    }
}

/// Pending request awaiting a reply
struct PendingRequest {
    reply_tx: oneshot::Sender<Result<String, ControlError>>,
    /// Handle to abort the timeout task if the reply arrives
    timeout_handle: AbortHandle,
}

struct Shared {
    pending: Mutex<HashMap<String, PendingRequest>>,
    closed: AtomicBool,
}

/// Reply to a request that has already been written
pub struct PendingReply {
    id: String,
    rx: oneshot::Receiver<Result<String, ControlError>>,
}

impl PendingReply {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn wait(self) -> Result<String, ControlError> {
        self.rx.await.map_err(|_| ControlError::Closed)?
    }

    pub async fn wait_json<T: DeserializeOwned>(self) -> Result<T, ControlError> {
        let payload = self.wait().await?;
        serde_json::from_str(&payload).map_err(|e| ControlError::InvalidReply(e.to_string()))
    }
}

/// Handle to one control connection. Clones share the connection.
#[derive(Clone)]
pub struct ControlChannel {
    outbound: mpsc::UnboundedSender<ControlFrame>,
    shared: Arc<Shared>,
    request_timeout: Duration,
}

impl ControlChannel {
    /// Run a channel over `stream`, returning the handle and the queue of
    /// requests arriving from the other side
    pub fn spawn<S>(stream: S, config: &ControlConfig) -> (Self, mpsc::Receiver<ControlRequest>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (sink, requests) = mpsc::channel(REQUEST_QUEUE_SIZE);
        (Self::spawn_with_sink(stream, config, sink), requests)
    }

    /// Like [`spawn`](Self::spawn), but inbound requests go to an existing
    /// queue shared with other channels
    pub fn spawn_with_sink<S>(
        stream: S,
        config: &ControlConfig,
        sink: mpsc::Sender<ControlRequest>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });

        let writer_task = tokio::spawn(write_loop(writer, outbound_rx));

        tokio::spawn(read_loop(
            reader,
            config.max_frame_size,
            sink,
            outbound.clone(),
            shared.clone(),
            writer_task.abort_handle(),
        ));

        ControlChannel {
            outbound,
            shared,
            request_timeout: config.request_timeout,
        }
    }

    /// Set the caller-side timeout for requests issued through this handle
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Send a request and wait for its reply
    pub async fn request(
        &self,
        command: Command,
        payload: impl Into<String>,
    ) -> Result<String, ControlError> {
        self.start_request(command, payload).await?.wait().await
    }

    /// Queue a request and return without waiting for the reply.
    ///
    /// Requests started one after another are written in that order.
    pub async fn start_request(
        &self,
        command: Command,
        payload: impl Into<String>,
    ) -> Result<PendingReply, ControlError> {
        let id = Uuid::new_v4().to_string();
        let (reply_tx, rx) = oneshot::channel();

        let mut pending = self.shared.pending.lock().await;
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(ControlError::Closed);
        }

        let shared = self.shared.clone();
        let timeout = self.request_timeout;
        let id_for_timeout = id.clone();
        let timeout_task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            // Only fire if the request is still pending
            if let Some(pending) = shared.pending.lock().await.remove(&id_for_timeout) {
                let _ = pending.reply_tx.send(Err(ControlError::Timeout));
            }
        });
        let timeout_handle = timeout_task.abort_handle();

        let frame = ControlFrame::Request {
            id: id.clone(),
            command: command.code(),
            payload: payload.into(),
        };
        if self.outbound.send(frame).is_err() {
            timeout_handle.abort();
            return Err(ControlError::Closed);
        }

        pending.insert(
            id.clone(),
            PendingRequest {
                reply_tx,
                timeout_handle,
            },
        );

        Ok(PendingReply { id, rx })
    }

    pub async fn join_room(&self, topic: &str) -> Result<JoinOutcome, ControlError> {
        self.start_request(Command::JoinRoom, topic)
            .await?
            .wait_json()
            .await
    }

    pub async fn send_message(&self, message: &str) -> Result<SendReply, ControlError> {
        self.start_request(Command::SendMessage, message)
            .await?
            .wait_json()
            .await
    }

    /// Ask the host for the label of a hex-encoded public key
    pub async fn get_member_id(&self, public_key_hex: &str) -> Result<String, ControlError> {
        self.start_request(Command::GetMemberId, public_key_hex)
            .await?
            .wait_json()
            .await
    }

    /// Queue an ON_MESSAGE notification; the returned reply resolves to the ack
    pub async fn notify_message(
        &self,
        notice: &MessageNotice,
    ) -> Result<PendingReply, ControlError> {
        let payload = serde_json::to_string(notice)?;
        self.start_request(Command::OnMessage, payload).await
    }

    /// Deliver an ON_MESSAGE notification and wait for the ack
    pub async fn emit_message(&self, notice: &MessageNotice) -> Result<Ack, ControlError> {
        self.notify_message(notice).await?.wait_json().await
    }

    pub async fn pending_count(&self) -> usize {
        self.shared.pending.lock().await.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst) || self.outbound.is_closed()
    }
}

async fn write_loop<W>(mut writer: WriteHalf<W>, mut outbound: mpsc::UnboundedReceiver<ControlFrame>)
where
    W: AsyncWrite,
{
    while let Some(frame) = outbound.recv().await {
        let bytes = match serde_json::to_vec(&frame) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Failed to serialize control frame");
                continue;
            }
        };

        if let Err(e) = write_frame(&mut writer, &bytes).await {
            debug!(error = %e, "Control stream write failed");
            return;
        }
    }

    let _ = writer.shutdown().await;
}

async fn read_loop<R>(
    mut reader: ReadHalf<R>,
    max_frame_size: usize,
    sink: mpsc::Sender<ControlRequest>,
    outbound: mpsc::UnboundedSender<ControlFrame>,
    shared: Arc<Shared>,
    writer_task: AbortHandle,
) where
    R: AsyncRead,
{
    loop {
        let bytes = match read_frame(&mut reader, max_frame_size).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!("Control stream ended");
                break;
            }
            Err(FrameError::TooLarge { size, max }) => {
                warn!(size, max, "Oversized control frame; closing channel");
                break;
            }
            Err(FrameError::Io(e)) => {
                debug!(error = %e, "Control stream read failed");
                break;
            }
        };

        let frame: ControlFrame = match serde_json::from_slice(&bytes) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "Ignoring malformed control frame");
                continue;
            }
        };

        match frame {
            ControlFrame::Reply { id, payload } => {
                if let Some(pending) = shared.pending.lock().await.remove(&id) {
                    pending.timeout_handle.abort();
                    let _ = pending.reply_tx.send(Ok(payload));
                }
                // Unknown ids have already timed out
            }
            ControlFrame::Request {
                id,
                command,
                payload,
            } => {
                let Some(command) = Command::from_code(command) else {
                    debug!(%id, command, "Ignoring unknown control command");
                    continue;
                };

                let (request, reply_rx) = ControlRequest::with_id(id.clone(), command, payload);

                if sink.send(request).await.is_err() {
                    debug!(%id, %command, "No driver for control requests; dropping");
                    continue;
                }

                let outbound = outbound.clone();
                tokio::spawn(async move {
                    // Driver dropped the request without replying
                    if let Ok(payload) = reply_rx.await {
                        let _ = outbound.send(ControlFrame::Reply { id, payload });
                    }
                });
            }
        }
    }

    let mut pending = shared.pending.lock().await;
    shared.closed.store(true, Ordering::SeqCst);
    for (_, request) in pending.drain() {
        request.timeout_handle.abort();
        let _ = request.reply_tx.send(Err(ControlError::Closed));
    }
    drop(pending);

    writer_task.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};
    use tokio::time::timeout;

    fn config(request_timeout: Duration) -> ControlConfig {
        ControlConfig {
            request_timeout,
            ..ControlConfig::default()
        }
    }

    fn pair(
        request_timeout: Duration,
    ) -> (
        (ControlChannel, mpsc::Receiver<ControlRequest>),
        (ControlChannel, mpsc::Receiver<ControlRequest>),
    ) {
        let (a, b) = duplex(64 * 1024);
        let cfg = config(request_timeout);
        (ControlChannel::spawn(a, &cfg), ControlChannel::spawn(b, &cfg))
    }

    async fn next_request(rx: &mut mpsc::Receiver<ControlRequest>) -> ControlRequest {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("Timeout waiting for request")
            .expect("Request queue closed")
    }

    async fn write_raw(stream: &mut DuplexStream, bytes: &[u8]) {
        write_frame(stream, bytes).await.unwrap();
    }

    #[tokio::test]
    async fn test_request_reply() {
        let ((caller, _), (_host, mut host_rx)) = pair(Duration::from_secs(5));

        let call = tokio::spawn(async move { caller.request(Command::SendMessage, "hello").await });

        let request = next_request(&mut host_rx).await;
        assert_eq!(request.command, Command::SendMessage);
        assert_eq!(request.payload, "hello");
        assert!(Uuid::parse_str(&request.id).is_ok());
        request.reply(r#"{"ok":true}"#);

        assert_eq!(call.await.unwrap().unwrap(), r#"{"ok":true}"#);
    }

    #[tokio::test]
    async fn test_out_of_order_replies_are_matched_by_id() {
        let ((caller, _), (_host, mut host_rx)) = pair(Duration::from_secs(5));

        let first = caller.start_request(Command::JoinRoom, "one").await.unwrap();
        let second = caller.start_request(Command::JoinRoom, "two").await.unwrap();

        let req_one = next_request(&mut host_rx).await;
        let req_two = next_request(&mut host_rx).await;
        assert_eq!(req_one.payload, "one");
        assert_eq!(req_two.payload, "two");

        req_two.reply("reply-two");
        req_one.reply("reply-one");

        assert_eq!(second.wait().await.unwrap(), "reply-two");
        assert_eq!(first.wait().await.unwrap(), "reply-one");
        assert_eq!(caller.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_timeout_fires_when_no_reply() {
        let ((caller, _), (_host, mut host_rx)) = pair(Duration::from_millis(100));

        let pending = caller.start_request(Command::GetMemberId, "abcdef").await.unwrap();
        let request = next_request(&mut host_rx).await;

        assert!(matches!(pending.wait().await, Err(ControlError::Timeout)));
        assert_eq!(caller.pending_count().await, 0);

        // Late reply for an id that already timed out is dropped
        request.reply("\"abcdef\"");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!caller.is_closed());
    }

    #[tokio::test]
    async fn test_per_handle_timeout_override() {
        let ((caller, _), (_host, mut host_rx)) = pair(Duration::from_secs(30));
        let impatient = caller.clone().with_timeout(Duration::from_millis(50));

        let slow = caller.start_request(Command::JoinRoom, "slow").await.unwrap();
        let quick = impatient.start_request(Command::JoinRoom, "quick").await.unwrap();
        let _first = next_request(&mut host_rx).await;
        let _second = next_request(&mut host_rx).await;

        assert!(matches!(quick.wait().await, Err(ControlError::Timeout)));
        assert_eq!(caller.pending_count().await, 1);
        drop(slow);
    }

    #[tokio::test]
    async fn test_timeout_cancelled_on_fast_reply() {
        let ((caller, _), (_host, mut host_rx)) = pair(Duration::from_millis(200));

        let pending = caller.start_request(Command::SendMessage, "quick").await.unwrap();
        next_request(&mut host_rx).await.reply("done");
        assert_eq!(pending.wait().await.unwrap(), "done");

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(caller.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_command_gets_no_reply() {
        let (mut raw, stream) = duplex(64 * 1024);
        let (_host, mut host_rx) = ControlChannel::spawn(stream, &config(Duration::from_secs(5)));

        let unknown = serde_json::json!({"type": "request", "id": "x1", "command": 99, "payload": ""});
        write_raw(&mut raw, &serde_json::to_vec(&unknown).unwrap()).await;

        let known = serde_json::json!({"type": "request", "id": "x2", "command": 4, "payload": "00"});
        write_raw(&mut raw, &serde_json::to_vec(&known).unwrap()).await;

        let request = next_request(&mut host_rx).await;
        assert_eq!(request.id, "x2");
        request.reply("\"00\"");

        let bytes = timeout(Duration::from_secs(1), read_frame(&mut raw, 64 * 1024))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let frame: ControlFrame = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            frame,
            ControlFrame::Reply {
                id: "x2".to_string(),
                payload: "\"00\"".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_malformed_frames_are_skipped() {
        let (mut raw, stream) = duplex(64 * 1024);
        let (host, mut host_rx) = ControlChannel::spawn(stream, &config(Duration::from_secs(5)));

        write_raw(&mut raw, b"not json").await;
        write_raw(&mut raw, br#"{"type":"mystery"}"#).await;
        write_raw(&mut raw, b"").await;

        let valid = serde_json::json!({"type": "request", "id": "ok", "command": 2, "payload": "still alive"});
        write_raw(&mut raw, &serde_json::to_vec(&valid).unwrap()).await;

        let request = next_request(&mut host_rx).await;
        assert_eq!(request.payload, "still alive");
        assert!(!host.is_closed());
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_channel() {
        let (mut raw, stream) = duplex(256 * 1024);
        let cfg = ControlConfig {
            max_frame_size: 1024,
            ..config(Duration::from_secs(5))
        };
        let (host, _host_rx) = ControlChannel::spawn(stream, &cfg);

        let pending = host.start_request(Command::OnMessage, "{}").await.unwrap();
        write_raw(&mut raw, &vec![b'x'; 2048]).await;

        assert!(matches!(pending.wait().await, Err(ControlError::Closed)));
        assert!(host.is_closed());
        assert!(matches!(
            host.request(Command::OnMessage, "{}").await,
            Err(ControlError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_pending_requests_fail_when_transport_closes() {
        let (raw, stream) = duplex(64 * 1024);
        let (caller, _rx) = ControlChannel::spawn(stream, &config(Duration::from_secs(30)));

        let first = caller.start_request(Command::JoinRoom, "a").await.unwrap();
        let second = caller.start_request(Command::JoinRoom, "b").await.unwrap();
        drop(raw);

        assert!(matches!(first.wait().await, Err(ControlError::Closed)));
        assert!(matches!(second.wait().await, Err(ControlError::Closed)));
    }

    #[tokio::test]
    async fn test_multiple_concurrent_calls() {
        let ((caller, _), (_host, mut host_rx)) = pair(Duration::from_secs(5));

        tokio::spawn(async move {
            while let Some(request) = host_rx.recv().await {
                let echo = format!("echo:{}", request.payload);
                request.reply(echo);
            }
        });

        let mut handles = Vec::new();
        for i in 0..20 {
            let caller = caller.clone();
            handles.push(tokio::spawn(async move {
                caller.request(Command::SendMessage, i.to_string()).await
            }));
        }

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap().unwrap(), format!("echo:{}", i));
        }
    }

    #[tokio::test]
    async fn test_typed_helpers() {
        let ((caller, _), (_host, mut host_rx)) = pair(Duration::from_secs(5));

        tokio::spawn(async move {
            while let Some(request) = host_rx.recv().await {
                match request.command {
                    Command::JoinRoom => request
                        .reply_json(&JoinOutcome {
                            ok: true,
                            topic: "ab".repeat(32),
                        })
                        .unwrap(),
                    Command::SendMessage => request.reply_json(&SendReply::sent()).unwrap(),
                    Command::GetMemberId => request.reply_json(&"a1b2c3").unwrap(),
                    Command::OnMessage => request.reply_json(&Ack { received: true }).unwrap(),
                }
            }
        });

        let joined = caller.join_room("room").await.unwrap();
        assert!(joined.ok);
        assert_eq!(joined.topic.len(), 64);

        assert!(caller.send_message("hi").await.unwrap().ok);
        assert_eq!(caller.get_member_id("a1b2c3d4").await.unwrap(), "a1b2c3");

        let notice = MessageNotice {
            member: crate::core_room::MemberId::named("you"),
            envelope: crate::core_room::MessageEnvelope::text("hi"),
        };
        assert!(caller.emit_message(&notice).await.unwrap().received);
    }

    #[tokio::test]
    async fn test_invalid_reply_payload() {
        let ((caller, _), (_host, mut host_rx)) = pair(Duration::from_secs(5));

        tokio::spawn(async move {
            if let Some(request) = host_rx.recv().await {
                request.reply("definitely not json");
            }
        });

        assert!(matches!(
            caller.send_message("hi").await,
            Err(ControlError::InvalidReply(_))
        ));
    }
}
