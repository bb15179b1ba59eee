//! BareChat session core
//!
//! One live chat session over a peer-to-peer swarm, shared by any number of
//! front-ends through a small request/reply control protocol.

pub mod config;
pub mod core_control;
pub mod core_room;
pub mod core_swarm;
pub mod framing;
pub mod host;
pub mod logging;
pub mod shutdown;
pub mod store;

/// In-memory swarm, log store and front-end fixtures
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::Config;
pub use core_control::{Command, ControlChannel, ControlError};
pub use core_room::{is_canonical, MemberId, MessageEnvelope, MessageType, RoomSession, Topic};
pub use core_swarm::{Swarm, SwarmEvent, TcpSwarm};
pub use host::{HostHandle, SessionHost};
pub use logging::{init_logging, LogLevel};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};
pub use store::{FileLogStore, LogStore};
