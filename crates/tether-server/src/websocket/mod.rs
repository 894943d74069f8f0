//! Peer sessions, liveness, inbound dispatch, and broadcasting.

pub mod handler;
pub mod heartbeat;
pub mod peer;
pub mod peers;
pub mod session;
