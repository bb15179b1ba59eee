//! Control channel between the session host and its front-ends
//!
//! A front-end that cannot call into the session (another process, a
//! sandboxed UI) drives it with four numbered commands:
//!
//! | Command       | Code | Direction       | Payload in            | Payload out               |
//! |---------------|------|-----------------|-----------------------|---------------------------|
//! | JOIN_ROOM     | 1    | front-end→host  | topic text (or empty) | `{ok, topic}`             |
//! | SEND_MESSAGE  | 2    | front-end→host  | message text          | `{ok}` / `{ok:false, error}` |
//! | ON_MESSAGE    | 3    | host→front-end  | `{member, envelope}`  | `{received: true}`        |
//! | GET_MEMBER_ID | 4    | front-end→host  | hex public key        | JSON string label         |

pub mod channel;
pub mod error;
pub mod protocol;

pub use channel::{ControlChannel, ControlRequest, PendingReply};
pub use error::ControlError;
pub use protocol::{Ack, Command, ControlFrame, JoinOutcome, MessageNotice, SendReply};
