//! A scripted front-end that acknowledges every ON_MESSAGE

use tokio::io::{duplex, AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::Duration;

use super::async_helpers::{recv_timeout, RecvTimeoutError};
use crate::config::ControlConfig;
use crate::core_control::{Ack, Command, ControlChannel, MessageNotice};
use crate::core_room::MessageType;
use crate::host::{HostHandle, SessionHost};

const PIPE_SIZE: usize = 64 * 1024;

pub struct TestFrontEnd {
    pub control: ControlChannel,
    notices: mpsc::UnboundedReceiver<MessageNotice>,
}

impl TestFrontEnd {
    /// Attach to a host that has not started running yet
    pub fn attach(host: &mut SessionHost) -> Self {
        let (host_end, ui_end) = duplex(PIPE_SIZE);
        host.attach_control(host_end);
        Self::over(ui_end)
    }

    /// Attach through a handle to a running host
    pub fn attach_running(handle: &HostHandle) -> Self {
        let (host_end, ui_end) = duplex(PIPE_SIZE);
        handle.attach_control(host_end);
        Self::over(ui_end)
    }

    /// Speak the control protocol over an already connected stream
    pub fn over<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (control, mut requests) = ControlChannel::spawn(stream, &ControlConfig::default());
        let (tx, notices) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(request) = requests.recv().await {
                if request.command != Command::OnMessage {
                    continue;
                }
                if let Ok(notice) = serde_json::from_str::<MessageNotice>(&request.payload) {
                    let _ = tx.send(notice);
                }
                let _ = request.reply_json(&Ack { received: true });
            }
        });

        Self { control, notices }
    }

    /// Next ON_MESSAGE of any kind
    pub async fn next_notice(&mut self, within: Duration) -> Result<MessageNotice, RecvTimeoutError> {
        recv_timeout(&mut self.notices, within).await
    }

    /// Next ON_MESSAGE that is not a presence notice
    pub async fn next_chat(&mut self, within: Duration) -> Result<MessageNotice, RecvTimeoutError> {
        loop {
            let notice = self.next_notice(within).await?;
            if notice.envelope.message_type != MessageType::System {
                return Ok(notice);
            }
        }
    }
}
