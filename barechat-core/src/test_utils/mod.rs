//! Test utilities and helpers for BareChat
//!
//! In-memory stand-ins for the swarm substrate, peer streams and the log
//! store, plus channel helpers shared by unit and integration tests.

pub mod async_helpers;
pub mod front_end;
pub mod log_store;
pub mod memory_swarm;

pub use async_helpers::*;
pub use front_end::*;
pub use log_store::*;
pub use memory_swarm::*;
