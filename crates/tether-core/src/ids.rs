//! Branded ID newtypes.
//!
//! Call identifiers are generated by the caller and only compared against
//! other calls on the same connection. Locally generated ones are UUID v7
//! strings, but a remote caller may use any string or integer and gets the
//! same token echoed back. Peer identifiers name one accepted transport on a
//! server.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v7())
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

/// Correlates one outstanding function call with its eventual result or error.
///
/// Holds the wire token in its text form plus whether it arrived as a JSON
/// integer, so `7` and `"7"` stay distinct and each is echoed as received.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CallId {
    text: String,
    numeric: bool,
}

impl CallId {
    /// Create a new random ID (UUID v7, time-ordered).
    #[must_use]
    pub fn new() -> Self {
        Self::from(new_v7())
    }

    /// Read a `mid` field. Only strings and integers are accepted.
    pub fn from_wire(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::from(s.as_str())),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(Self {
                text: n.to_string(),
                numeric: true,
            }),
            _ => None,
        }
    }

    /// The `mid` field value, in the form it was received or created.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        if self.numeric {
            if let Ok(n) = self.text.parse::<u64>() {
                return Value::from(n);
            }
            if let Ok(n) = self.text.parse::<i64>() {
                return Value::from(n);
            }
        }
        Value::String(self.text.clone())
    }

    /// Whether the id travels as a JSON integer.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        self.numeric
    }

    /// Return the text form as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Consume self and return the text form.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.text
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for CallId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.text
    }
}

impl AsRef<str> for CallId {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl From<String> for CallId {
    fn from(text: String) -> Self {
        Self {
            text,
            numeric: false,
        }
    }
}

impl From<&str> for CallId {
    fn from(text: &str) -> Self {
        Self::from(text.to_owned())
    }
}

impl From<u64> for CallId {
    fn from(n: u64) -> Self {
        Self {
            text: n.to_string(),
            numeric: true,
        }
    }
}

impl From<CallId> for String {
    fn from(id: CallId) -> Self {
        id.text
    }
}

impl Serialize for CallId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CallId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_wire(&value)
            .ok_or_else(|| serde::de::Error::custom("call id must be a string or an integer"))
    }
}

branded_id! {
    /// Identifies one connected transport on a listening server.
    PeerId
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn call_ids_are_unique() {
        let ids: HashSet<CallId> = (0..1000).map(|_| CallId::new()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn call_id_is_uuid_v7() {
        let id = CallId::new();
        let parsed = Uuid::parse_str(id.as_str()).unwrap();
        assert_eq!(parsed.get_version_num(), 7);
    }

    #[test]
    fn serde_is_transparent() {
        let id = CallId::from("abc");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"abc\"");
        let back: CallId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn integer_ids_keep_their_wire_form() {
        let id = CallId::from_wire(&serde_json::json!(7)).unwrap();
        assert!(id.is_numeric());
        assert_eq!(id.as_str(), "7");
        assert_eq!(id.to_wire(), serde_json::json!(7));
        assert_ne!(id, CallId::from("7"));
        assert_eq!(id, CallId::from(7_u64));

        let negative = CallId::from_wire(&serde_json::json!(-3)).unwrap();
        assert_eq!(serde_json::to_string(&negative).unwrap(), "-3");
    }

    #[test]
    fn non_scalar_ids_are_rejected() {
        for bad in [
            serde_json::json!(1.5),
            serde_json::json!(true),
            serde_json::json!(null),
            serde_json::json!({"a": 1}),
            serde_json::json!([1]),
        ] {
            assert!(CallId::from_wire(&bad).is_none(), "{bad}");
        }
        assert!(serde_json::from_str::<CallId>("1.5").is_err());
    }

    #[test]
    fn display_and_deref() {
        let id = PeerId::from("peer-1");
        assert_eq!(id.to_string(), "peer-1");
        assert_eq!(&*id, "peer-1");
        assert!(id.starts_with("peer"));
    }

    #[test]
    fn into_string() {
        let id = PeerId::from("p");
        let s: String = id.into();
        assert_eq!(s, "p");
    }
}
