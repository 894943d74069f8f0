//! # tether-rpc
//!
//! Protocol engine for tether endpoints.
//!
//! - **Transport contract**: [`TransportEvent`] stream in, [`FrameSink`] out
//! - **State latch**: restartable `Connecting → Open → Closing → Closed`
//!   signal that survives transport reconnects
//! - **Correlator**: pending-call table with timeouts
//! - **Event dispatcher**: `on` / `once` / `one` / `off` subscriptions
//! - **Function registry**: named async handlers, shared across peers
//! - **Validators**: optional per-name payload checks
//! - **Connection**: the client-side session tying these together

#![deny(unsafe_code)]

pub mod connection;
pub mod correlator;
pub mod dispatcher;
pub mod latch;
pub mod registry;
pub mod stubs;
pub mod transport;
pub mod validation;

pub use connection::{
    Connection, ConnectionBuilder, DEFAULT_CALL_TIMEOUT, DEFAULT_PING_TIMEOUT,
};
pub use correlator::Correlator;
pub use dispatcher::{EventDispatcher, EventHandler, SubscriptionToken};
pub use latch::StateLatch;
pub use registry::{FunctionHandler, FunctionRegistry, handler_fn, typed_fn};
pub use stubs::{FunctionSet, FunctionStub};
pub use transport::{
    ChannelSink, CloseInfo, FrameSink, OutboundQueue, TransportError, TransportEvent,
};
pub use validation::{Validator, Validators};
