//! Error taxonomy.
//!
//! [`TetherError`] is what callers of the protocol see. [`HandlerError`] is
//! what registered function handlers return; it becomes an Error envelope on
//! the wire and is reconstructed as [`TetherError`] on the calling side.

use std::time::Duration;

use serde_json::Value;

use crate::envelope::FunctionError;
use crate::ids::CallId;
use crate::state::ConnectionState;

// ── Error code constants ────────────────────────────────────────────

/// No handler is registered for the requested function.
pub const NO_HANDLER: &str = "NO_HANDLER";
/// Handler returned an error without a more specific code.
pub const HANDLER_ERROR: &str = "HANDLER_ERROR";
/// Handler panicked.
pub const HANDLER_PANIC: &str = "HANDLER_PANIC";
/// Payload rejected by a registered validator.
pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
/// Call argument could not be interpreted by the handler.
pub const INVALID_PARAMS: &str = "INVALID_PARAMS";

/// Result alias for protocol operations.
pub type Result<T, E = TetherError> = std::result::Result<T, E>;

/// Serialization failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Value could not be serialized.
    #[error("encode failed: {0}")]
    Encode(String),
    /// Frame bytes could not be parsed.
    #[error("decode failed: {0}")]
    Decode(String),
    /// Parsed object has fields of the wrong type.
    #[error("malformed envelope: {0}")]
    Shape(String),
    /// Unrecognized codec name.
    #[error("unknown codec: {0}")]
    UnknownKind(String),
}

/// Errors surfaced by connections, servers and calls.
#[derive(Debug, thiserror::Error)]
pub enum TetherError {
    /// Invalid builder input (duplicate handler, bad option).
    #[error("build error: {0}")]
    Build(String),

    /// No response arrived within the timeout.
    #[error("call to '{function}' timed out after {}ms", .timeout.as_millis())]
    Timeout {
        /// Function that was called.
        function: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// Operation attempted while the connection cannot send.
    #[error("connection is not open (state: {state})")]
    ConnectionNotOpen {
        /// State at the time of the attempt.
        state: ConnectionState,
    },

    /// Connection was closed while the call was outstanding.
    #[error("connection closed")]
    ConnectionClosed,

    /// Remote answered with an Error envelope.
    #[error("{message}")]
    Response {
        /// Remote message.
        message: String,
        /// Remote code, if any.
        code: Option<String>,
        /// Remote detail payload.
        data: Option<Value>,
    },

    /// Remote has no handler for the function.
    #[error("no handler for function '{function}'")]
    NoHandler {
        /// Function that was called.
        function: String,
    },

    /// Payload rejected by a validator.
    #[error("validation failed for '{name}': {message}")]
    Validation {
        /// Function or event name.
        name: String,
        /// Validator message.
        message: String,
    },

    /// Failure with no better classification.
    #[error("{message}")]
    Unknown {
        /// Description.
        message: String,
    },

    /// Listen or connect target could not be used.
    #[error("invalid transport: {message}")]
    InvalidTransport {
        /// Description.
        message: String,
    },

    /// Serialization failure.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl TetherError {
    /// Machine-readable code, matching what would appear on the wire.
    pub fn code(&self) -> &str {
        match self {
            Self::Build(_) => "BUILD_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::ConnectionNotOpen { .. } => "CONNECTION_NOT_OPEN",
            Self::ConnectionClosed => "CONNECTION_CLOSED",
            Self::Response { code, .. } => code.as_deref().unwrap_or(HANDLER_ERROR),
            Self::NoHandler { .. } => NO_HANDLER,
            Self::Validation { .. } => VALIDATION_ERROR,
            Self::Unknown { .. } => "UNKNOWN",
            Self::InvalidTransport { .. } => "INVALID_TRANSPORT",
            Self::Codec(_) => "CODEC_ERROR",
        }
    }

    /// Rebuild a caller-side error from a remote Error envelope.
    ///
    /// Well-known codes map back to their dedicated variants.
    pub fn from_remote(function: &str, error: FunctionError) -> Self {
        match error.code.as_deref() {
            Some(NO_HANDLER) => Self::NoHandler {
                function: function.to_owned(),
            },
            Some(VALIDATION_ERROR) => Self::Validation {
                name: function.to_owned(),
                message: error.message,
            },
            _ => Self::Response {
                message: error.message,
                code: error.code,
                data: error.data,
            },
        }
    }

    /// Whether retrying the same call could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::ConnectionNotOpen { .. } | Self::ConnectionClosed
        )
    }
}

/// Error type returned by function handlers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HandlerError {
    /// Argument missing or of the wrong shape.
    #[error("{message}")]
    InvalidParams {
        /// What is wrong.
        message: String,
    },

    /// Unexpected failure inside the handler.
    #[error("{message}")]
    Internal {
        /// Description.
        message: String,
    },

    /// Domain-specific error with an arbitrary code.
    #[error("{message}")]
    Custom {
        /// Machine-readable code.
        code: String,
        /// Human-readable message.
        message: String,
        /// Structured detail.
        data: Option<Value>,
    },
}

impl HandlerError {
    /// Shorthand for [`HandlerError::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Shorthand for [`HandlerError::InvalidParams`].
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }

    /// Machine-readable code for this variant.
    pub fn code(&self) -> &str {
        match self {
            Self::InvalidParams { .. } => INVALID_PARAMS,
            Self::Internal { .. } => HANDLER_ERROR,
            Self::Custom { code, .. } => code,
        }
    }

    /// Wire form answering `call_id`.
    pub fn to_function_error(&self, call_id: CallId) -> FunctionError {
        FunctionError {
            call_id,
            message: self.to_string(),
            code: Some(self.code().to_owned()),
            data: match self {
                Self::Custom { data, .. } => data.clone(),
                _ => None,
            },
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidParams {
            message: err.to_string(),
        }
    }
}
