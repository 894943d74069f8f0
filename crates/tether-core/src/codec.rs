//! Pluggable wire serialization.
//!
//! A [`Codec`] turns envelopes into transport frames and back. Both built-in
//! codecs go through an intermediate `serde_json::Value` so the shape check
//! (must be an object) and envelope classification are shared. CBOR byte
//! strings and tags survive that step in the reserved forms described in
//! [`payload`](crate::payload).

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{Envelope, Side, WireEnvelope};
use crate::errors::CodecError;
use crate::frame::{Control, Frame};
use crate::payload;

/// Outcome of decoding one inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    /// Plain-text liveness literal, handled outside the envelope layer.
    Control(Control),
    /// A classified envelope.
    Envelope(Envelope),
    /// Well-formed but not a message we understand.
    Ignored(&'static str),
}

/// Serialization strategy shared by both ends of a connection.
pub trait Codec: Send + Sync + 'static {
    /// Which built-in strategy this is.
    fn kind(&self) -> CodecKind;

    /// Serialize a wire envelope into a frame.
    fn encode_wire(&self, wire: &WireEnvelope) -> Result<Frame, CodecError>;

    /// Parse a frame into an untyped value.
    fn decode_value(&self, frame: &Frame) -> Result<Value, CodecError>;

    /// Serialize a typed envelope.
    fn encode(&self, envelope: &Envelope) -> Result<Frame, CodecError> {
        self.encode_wire(&WireEnvelope::from(envelope))
    }

    /// Decode and classify one inbound frame as seen from `side`.
    ///
    /// Control literals are recognized before any parsing happens.
    fn decode(&self, frame: &Frame, side: Side) -> Result<Decoded, CodecError> {
        if let Some(control) = frame.control() {
            return Ok(Decoded::Control(control));
        }
        let value = self.decode_value(frame)?;
        if !value.is_object() {
            return Ok(Decoded::Ignored("not an object"));
        }
        let wire: WireEnvelope =
            serde_json::from_value(value).map_err(|e| CodecError::Shape(e.to_string()))?;
        Ok(wire
            .classify(side)
            .map_or(Decoded::Ignored("unrecognized envelope"), Decoded::Envelope))
    }
}

/// JSON text frames. The default.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Json
    }

    fn encode_wire(&self, wire: &WireEnvelope) -> Result<Frame, CodecError> {
        let text = serde_json::to_string(wire).map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(Frame::Text(text))
    }

    fn decode_value(&self, frame: &Frame) -> Result<Value, CodecError> {
        // Binary frames are accepted when they carry UTF-8 JSON.
        serde_json::from_slice(frame.as_bytes()).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// CBOR binary frames.
#[derive(Clone, Copy, Debug, Default)]
pub struct CborCodec;

impl Codec for CborCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Cbor
    }

    fn encode_wire(&self, wire: &WireEnvelope) -> Result<Frame, CodecError> {
        let value = serde_json::to_value(wire).map_err(|e| CodecError::Encode(e.to_string()))?;
        let item = payload::to_cbor(value)?;
        let mut buf = Vec::with_capacity(128);
        ciborium::into_writer(&item, &mut buf).map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(Frame::Binary(Bytes::from(buf)))
    }

    fn decode_value(&self, frame: &Frame) -> Result<Value, CodecError> {
        let item: ciborium::Value = ciborium::from_reader(frame.as_bytes())
            .map_err(|e| CodecError::Decode(e.to_string()))?;
        payload::from_cbor(item)
    }
}

/// Built-in codec selector, as stored in settings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    /// [`JsonCodec`].
    #[default]
    Json,
    /// [`CborCodec`].
    Cbor,
}

impl CodecKind {
    /// Instantiate the selected codec.
    pub fn build(self) -> Arc<dyn Codec> {
        match self {
            Self::Json => Arc::new(JsonCodec),
            Self::Cbor => Arc::new(CborCodec),
        }
    }

    /// Lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Cbor => "cbor",
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodecKind {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "cbor" | "binary" => Ok(Self::Cbor),
            other => Err(CodecError::UnknownKind(other.to_owned())),
        }
    }
}
