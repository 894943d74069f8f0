//! Wire envelope: the only structured message type on the socket.
//!
//! Four shapes share one untyped wire form, told apart by field presence:
//!
//! | shape  | wire fields                                      |
//! |--------|--------------------------------------------------|
//! | call   | `{"mt", "mid", "data"}`                          |
//! | result | `{"mt", "mid", "data"}`                          |
//! | error  | `{"err": true, "mid", "message", "code"?, "data"?}` |
//! | event  | `{"ev", "data"}`                                 |
//!
//! Calls and results are identical on the wire; the receiving [`Side`]
//! decides which one an `mt` frame is. Classification order is error
//! marker, then function name, then event name. Anything else is ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::CallId;

/// Reserved function name answered by the protocol layer itself.
pub const PING_FUNCTION: &str = "__ping";

/// Which end of the protocol an endpoint plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    /// Issues calls; reads `mt` frames as results.
    Client,
    /// Serves calls; reads `mt` frames as requests.
    Server,
}

/// A function invocation request.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionCall {
    /// Registered function name.
    pub function: String,
    /// Caller-generated correlation id.
    pub call_id: CallId,
    /// Call argument.
    pub data: Value,
}

/// A successful function response.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionResult {
    /// Function that produced the result.
    pub function: String,
    /// Echo of the request's correlation id.
    pub call_id: CallId,
    /// Handler return value.
    pub data: Value,
}

/// A failed function response.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionError {
    /// Echo of the request's correlation id.
    pub call_id: CallId,
    /// Human-readable failure description.
    pub message: String,
    /// Machine-readable code, if the remote supplied one.
    pub code: Option<String>,
    /// Extra structured detail.
    pub data: Option<Value>,
}

/// An unsolicited, uncorrelated event.
#[derive(Clone, Debug, PartialEq)]
pub struct EventMessage {
    /// Event name subscribers listen on.
    pub event: String,
    /// Event payload.
    pub data: Value,
}

/// Strongly-typed envelope, produced at the decode boundary.
#[derive(Clone, Debug, PartialEq)]
pub enum Envelope {
    /// Function request.
    Call(FunctionCall),
    /// Function success response.
    Result(FunctionResult),
    /// Function failure response.
    Error(FunctionError),
    /// Fire-and-forget event.
    Event(EventMessage),
}

impl Envelope {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Call(_) => "call",
            Self::Result(_) => "result",
            Self::Error(_) => "error",
            Self::Event(_) => "event",
        }
    }

    /// Correlation id, for every shape except events.
    pub fn call_id(&self) -> Option<&CallId> {
        match self {
            Self::Call(c) => Some(&c.call_id),
            Self::Result(r) => Some(&r.call_id),
            Self::Error(e) => Some(&e.call_id),
            Self::Event(_) => None,
        }
    }
}

/// Untyped wire form of an [`Envelope`].
///
/// Unknown fields are ignored so newer peers can add fields freely.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WireEnvelope {
    /// Error marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<Value>,
    /// Function name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mt: Option<String>,
    /// Event name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ev: Option<String>,
    /// Call id (string or integer on the wire).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<Value>,
    /// Error message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Error code (string or number on the wire).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Value>,
    /// Payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

fn is_error_marker(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

fn code_to_string(code: Value) -> String {
    match code {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

impl WireEnvelope {
    /// Translate into the typed form as seen from `side`.
    ///
    /// Returns `None` for frames matching no known shape, including error and
    /// function frames whose call id is missing or not a string or integer.
    /// Events ignore `mid` entirely.
    pub fn classify(self, side: Side) -> Option<Envelope> {
        if self.err.as_ref().is_some_and(is_error_marker) {
            let call_id = CallId::from_wire(self.mid.as_ref()?)?;
            return Some(Envelope::Error(FunctionError {
                call_id,
                message: self.message.unwrap_or_else(|| "Unknown error".to_owned()),
                code: self.code.map(code_to_string),
                data: self.data,
            }));
        }

        if let Some(function) = self.mt {
            let call_id = CallId::from_wire(self.mid.as_ref()?)?;
            let data = self.data.unwrap_or(Value::Null);
            return Some(match side {
                Side::Server => Envelope::Call(FunctionCall {
                    function,
                    call_id,
                    data,
                }),
                Side::Client => Envelope::Result(FunctionResult {
                    function,
                    call_id,
                    data,
                }),
            });
        }

        if let Some(event) = self.ev {
            return Some(Envelope::Event(EventMessage {
                event,
                data: self.data.unwrap_or(Value::Null),
            }));
        }

        None
    }
}

impl From<&Envelope> for WireEnvelope {
    fn from(envelope: &Envelope) -> Self {
        match envelope {
            Envelope::Call(FunctionCall {
                function,
                call_id,
                data,
            })
            | Envelope::Result(FunctionResult {
                function,
                call_id,
                data,
            }) => Self {
                mt: Some(function.clone()),
                mid: Some(call_id.to_wire()),
                data: Some(data.clone()),
                ..Self::default()
            },
            Envelope::Error(e) => Self {
                err: Some(Value::Bool(true)),
                mid: Some(e.call_id.to_wire()),
                message: Some(e.message.clone()),
                code: e.code.clone().map(Value::String),
                data: e.data.clone(),
                ..Self::default()
            },
            Envelope::Event(e) => Self {
                ev: Some(e.event.clone()),
                data: Some(e.data.clone()),
                ..Self::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use serde_json::json;

    fn parse(v: Value) -> WireEnvelope {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn call_wire_shape() {
        let env = Envelope::Call(FunctionCall {
            function: "add".into(),
            call_id: CallId::from("m1"),
            data: json!([1, 2]),
        });
        let v = serde_json::to_value(WireEnvelope::from(&env)).unwrap();
        assert_eq!(v, json!({"mt": "add", "mid": "m1", "data": [1, 2]}));
    }

    #[test]
    fn error_wire_shape_omits_absent_fields() {
        let env = Envelope::Error(FunctionError {
            call_id: CallId::from("m2"),
            message: "boom".into(),
            code: None,
            data: None,
        });
        let v = serde_json::to_value(WireEnvelope::from(&env)).unwrap();
        assert_eq!(v, json!({"err": true, "mid": "m2", "message": "boom"}));
    }

    #[test]
    fn event_wire_shape() {
        let env = Envelope::Event(EventMessage {
            event: "tick".into(),
            data: json!({"n": 1}),
        });
        let v = serde_json::to_value(WireEnvelope::from(&env)).unwrap();
        assert_eq!(v, json!({"ev": "tick", "data": {"n": 1}}));
    }

    #[test]
    fn mt_frame_depends_on_side() {
        let wire = parse(json!({"mt": "f", "mid": "1", "data": 5}));
        assert_matches!(wire.clone().classify(Side::Server), Some(Envelope::Call(c)) if c.function == "f");
        assert_matches!(wire.classify(Side::Client), Some(Envelope::Result(r)) if r.data == json!(5));
    }

    #[test]
    fn error_marker_beats_function_name() {
        let wire = parse(json!({"err": true, "mt": "f", "mid": "1", "message": "x"}));
        assert_matches!(wire.classify(Side::Client), Some(Envelope::Error(_)));
    }

    #[test]
    fn function_name_beats_event_name() {
        let wire = parse(json!({"mt": "f", "ev": "e", "mid": "1"}));
        assert_matches!(wire.classify(Side::Server), Some(Envelope::Call(_)));
    }

    #[test]
    fn false_error_marker_is_ignored() {
        let wire = parse(json!({"err": false, "ev": "e", "data": 1}));
        assert_matches!(wire.classify(Side::Client), Some(Envelope::Event(_)));
    }

    #[test]
    fn numeric_error_code_becomes_string() {
        let wire = parse(json!({"err": 1, "mid": "9", "message": "m", "code": 404}));
        assert_matches!(
            wire.classify(Side::Client),
            Some(Envelope::Error(e)) if e.code.as_deref() == Some("404")
        );
    }

    #[test]
    fn missing_mid_is_ignored() {
        assert!(parse(json!({"mt": "f"})).classify(Side::Server).is_none());
        assert!(parse(json!({"err": true, "message": "m"})).classify(Side::Client).is_none());
    }

    #[test]
    fn integer_mid_is_echoed_as_integer() {
        let wire = parse(json!({"mt": "echo", "mid": 7, "data": 1}));
        let Some(Envelope::Call(call)) = wire.classify(Side::Server) else {
            panic!("expected call");
        };
        assert_eq!(call.call_id.to_wire(), json!(7));

        let reply = Envelope::Result(FunctionResult {
            function: call.function,
            call_id: call.call_id,
            data: call.data,
        });
        let v = serde_json::to_value(WireEnvelope::from(&reply)).unwrap();
        assert_eq!(v, json!({"mt": "echo", "mid": 7, "data": 1}));
    }

    #[test]
    fn event_ignores_stray_mid() {
        let wire = parse(json!({"ev": "x", "mid": 7, "data": 1}));
        assert_matches!(wire.classify(Side::Server), Some(Envelope::Event(e)) if e.event == "x");
        let wire = parse(json!({"ev": "x", "mid": {"weird": true}}));
        assert_matches!(wire.classify(Side::Client), Some(Envelope::Event(_)));
    }

    #[test]
    fn unusable_mid_leaves_call_unclassified() {
        for mid in [json!(1.5), json!(true), json!({"a": 1}), json!(null)] {
            let wire = parse(json!({"mt": "f", "mid": mid}));
            assert!(wire.classify(Side::Server).is_none());
        }
        let wire = parse(json!({"err": true, "mid": [1], "message": "m"}));
        assert!(wire.classify(Side::Client).is_none());
    }

    #[test]
    fn unknown_shape_is_ignored() {
        let wire = parse(json!({"hello": "world"}));
        assert!(wire.classify(Side::Client).is_none());
    }

    #[test]
    fn missing_data_defaults_to_null() {
        let wire = parse(json!({"ev": "e"}));
        assert_matches!(wire.classify(Side::Client), Some(Envelope::Event(e)) if e.data.is_null());
    }

    #[test]
    fn error_without_message_gets_placeholder() {
        let wire = parse(json!({"err": true, "mid": "1"}));
        assert_matches!(
            wire.classify(Side::Client),
            Some(Envelope::Error(e)) if e.message == "Unknown error"
        );
    }

    #[test]
    fn envelope_accessors() {
        let env = Envelope::Event(EventMessage {
            event: "e".into(),
            data: Value::Null,
        });
        assert_eq!(env.kind(), "event");
        assert!(env.call_id().is_none());
    }

    proptest! {
        #[test]
        fn error_marker_always_wins(
            mt in proptest::option::of("[a-z]{1,8}"),
            ev in proptest::option::of("[a-z]{1,8}"),
            mid in "[a-z0-9]{1,12}",
        ) {
            let wire = WireEnvelope {
                err: Some(Value::Bool(true)),
                mt,
                ev,
                mid: Some(Value::String(mid.clone())),
                ..WireEnvelope::default()
            };
            let classified = wire.classify(Side::Server);
            prop_assert!(
                matches!(classified, Some(Envelope::Error(ref e)) if e.call_id.as_str() == mid)
            );
        }

        #[test]
        fn typed_form_survives_wire_form(
            function in "[a-z.]{1,16}",
            mid in "[a-z0-9-]{1,36}",
            n in any::<i64>(),
        ) {
            let env = Envelope::Call(FunctionCall {
                function,
                call_id: CallId::from(mid),
                data: json!({"n": n}),
            });
            let back = WireEnvelope::from(&env).classify(Side::Server);
            prop_assert_eq!(back, Some(env));
        }
    }
}
