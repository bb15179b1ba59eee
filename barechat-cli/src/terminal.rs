//! Terminal front-end: prints ON_MESSAGE notices and acknowledges them

use barechat_core::core_control::{Ack, Command, ControlRequest, JoinOutcome, MessageNotice};
use barechat_core::core_room::MessageType;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One line of terminal output for a notice
pub fn render_notice(notice: &MessageNotice) -> String {
    match notice.envelope.message_type {
        MessageType::System => format!("[info] {}", notice.envelope.message),
        MessageType::Leave => format!("[info] {} left the room", notice.member),
        MessageType::Text | MessageType::Other => {
            format!("[{}] {}", notice.member, notice.envelope.message)
        }
    }
}

/// Status line printed after the initial join
pub fn render_join(outcome: &JoinOutcome, created: bool) -> String {
    match (outcome.ok, created) {
        (true, true) => format!("[info] Created new chat room: {}", outcome.topic),
        (true, false) => format!("[info] Joined chat room {}", outcome.topic),
        (false, true) => "[info] Create failed".to_string(),
        (false, false) => "[info] Join failed".to_string(),
    }
}

/// Print every notice the host sends until the channel closes
pub async fn print_notices(mut requests: mpsc::Receiver<ControlRequest>) {
    while let Some(request) = requests.recv().await {
        if request.command != Command::OnMessage {
            debug!(command = %request.command, "Terminal ignores host request");
            continue;
        }

        match serde_json::from_str::<MessageNotice>(&request.payload) {
            Ok(notice) => println!("{}", render_notice(&notice)),
            Err(e) => warn!(error = %e, "Unreadable message notice"),
        }

        if let Err(e) = request.reply_json(&Ack { received: true }) {
            warn!(error = %e, "Failed to acknowledge notice");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use barechat_core::core_room::{MemberId, MessageEnvelope};

    fn notice(member: &str, envelope: MessageEnvelope) -> MessageNotice {
        MessageNotice {
            member: MemberId::named(member),
            envelope,
        }
    }

    #[test]
    fn test_render_chat_line() {
        let line = render_notice(&notice("a1b2c3", MessageEnvelope::text("hello")));
        assert_eq!(line, "[a1b2c3] hello");
    }

    #[test]
    fn test_render_presence_and_leave() {
        let joined = render_notice(&notice(
            "system",
            MessageEnvelope::system("New peer joined: a1b2c3 (1 connected)"),
        ));
        assert_eq!(joined, "[info] New peer joined: a1b2c3 (1 connected)");

        let left = render_notice(&notice(
            "a1b2c3",
            MessageEnvelope::outgoing("leaved", MessageType::Leave),
        ));
        assert_eq!(left, "[info] a1b2c3 left the room");
    }

    #[test]
    fn test_render_join() {
        let ok = JoinOutcome {
            ok: true,
            topic: "ab".repeat(32),
        };
        assert!(render_join(&ok, true).starts_with("[info] Created new chat room: abab"));
        assert!(render_join(&ok, false).starts_with("[info] Joined chat room abab"));

        let failed = JoinOutcome {
            ok: false,
            topic: "err".to_string(),
        };
        assert_eq!(render_join(&failed, false), "[info] Join failed");
    }
}
