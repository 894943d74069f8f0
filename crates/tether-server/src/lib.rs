//! # tether-server
//!
//! Listening side of the tether protocol.
//!
//! - Listener bootstrap: port, host and port, unix socket, or a pre-bound
//!   listener; or mount [`TetherServer::router`] in a host axum app
//! - Per-peer sessions: inbound dispatch to the shared function registry,
//!   per-peer event subscriptions, bounded outbound queues
//! - Event fan-out over a snapshot of connected peers
//! - Liveness: `"ping"`/`"pong"` probes and websocket heartbeat
//! - HTTP: `/health` and Prometheus `/metrics`
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod listen;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use listen::{BoundAddr, ListenTarget};
pub use server::{PingReport, ServerBuilder, TetherServer};
pub use websocket::peer::{Peer, PeerHandle, ProbeOutcome};
