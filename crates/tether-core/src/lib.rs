//! # tether-core
//!
//! Shared vocabulary for the tether RPC-over-websocket protocol.
//!
//! - **IDs**: [`CallId`] (string or integer wire token) and [`PeerId`]
//! - **Frames**: [`Frame`] is one transport-level message (text or binary),
//!   including the reserved `"ping"`/`"pong"` control literals
//! - **Envelopes**: [`Envelope`] is the tagged union of call, result, error
//!   and event messages; [`WireEnvelope`] is its untyped wire form
//! - **Codecs**: [`Codec`] with [`JsonCodec`] (text) and [`CborCodec`] (binary)
//! - **Payloads**: reserved forms that carry CBOR byte strings and tags
//!   through `serde_json::Value`, plus the [`Binary`] and [`Timestamp`] wrappers
//! - **Errors**: [`TetherError`] taxonomy and the [`HandlerError`] returned by
//!   function handlers
//! - **Logging**: `tracing` subscriber setup and log capture for tests

#![deny(unsafe_code)]

pub mod codec;
pub mod envelope;
pub mod errors;
pub mod frame;
pub mod ids;
pub mod logging;
pub mod payload;
pub mod state;

pub use codec::{CborCodec, Codec, CodecKind, Decoded, JsonCodec};
pub use envelope::{
    Envelope, EventMessage, FunctionCall, FunctionError, FunctionResult, PING_FUNCTION, Side,
    WireEnvelope,
};
pub use errors::{CodecError, HandlerError, Result, TetherError};
pub use frame::{Control, Frame};
pub use ids::{CallId, PeerId};
pub use payload::{Binary, Timestamp};
pub use state::ConnectionState;
