//! The joined room: identifiers, labels, envelopes and the live session

pub mod envelope;
pub mod member;
pub mod session;
pub mod topic;

pub use envelope::{EnvelopeError, MessageEnvelope, MessageType};
pub use member::{MemberId, INVALID_MEMBER};
pub use session::{BroadcastReport, JoinOutcome, RoomSession, SessionEvent};
pub use topic::{is_canonical, Topic, TopicError, TOPIC_HEX_LEN, TOPIC_LEN};
