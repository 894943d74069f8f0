//! # tether-client
//!
//! Client side bootstrap for tether connections.
//!
//! - **Targets**: [`ConnectTarget`] is a `ws://` URL or a unix socket path
//! - **Connectors**: [`Connector`] opens one websocket; [`TungsteniteConnector`]
//!   is the default and tests inject their own
//! - **Reconnect**: [`ReconnectPolicy`] with doubling backoff
//! - **Builder**: [`ClientBuilder`] wires a connector into a
//!   [`tether_rpc::Connection`]

#![deny(unsafe_code)]

pub mod builder;
pub mod connector;
pub mod reconnect;
pub mod target;
mod transport;

pub use builder::{ClientBuilder, DEFAULT_CONNECT_TIMEOUT};
pub use connector::{BoxSocket, Connector, TungsteniteConnector, WsSocket};
pub use reconnect::ReconnectPolicy;
pub use target::ConnectTarget;
