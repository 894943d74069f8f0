//! Codec-neutral payload conventions.
//!
//! Application payloads are carried as `serde_json::Value`. CBOR can say
//! more than JSON, so the two extra CBOR data kinds get a reserved object
//! form that both codecs carry unchanged:
//!
//! | CBOR            | payload value                        |
//! |-----------------|--------------------------------------|
//! | byte string     | `{"$bytes": "<base64>"}`             |
//! | tag `n` over v  | `{"$tag": n, "$value": v}`           |
//!
//! [`CborCodec`](crate::CborCodec) maps these to native byte strings and
//! tags on the wire. [`JsonCodec`](crate::JsonCodec) sends them as is.
//! [`Binary`] and [`Timestamp`] serialize to the reserved forms, so typed
//! payloads keep their bytes and dates through either codec.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use ciborium::Value as CborValue;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};

use crate::errors::CodecError;

/// Key of the byte-string form.
pub const BYTES_KEY: &str = "$bytes";
/// Tag number key of the tagged form.
pub const TAG_KEY: &str = "$tag";
/// Tagged content key of the tagged form.
pub const TAG_VALUE_KEY: &str = "$value";
/// CBOR tag 0: RFC 3339 date/time string.
pub const TAG_DATETIME_TEXT: u64 = 0;
/// CBOR tag 1: seconds since the Unix epoch.
pub const TAG_DATETIME_EPOCH: u64 = 1;

fn bytes_in(map: &Map<String, Value>) -> Option<Vec<u8>> {
    if map.len() != 1 {
        return None;
    }
    STANDARD.decode(map.get(BYTES_KEY)?.as_str()?).ok()
}

fn tag_in(map: &Map<String, Value>) -> Option<u64> {
    if map.len() != 2 || !map.contains_key(TAG_VALUE_KEY) {
        return None;
    }
    map.get(TAG_KEY)?.as_u64()
}

/// Payload value for a byte string.
pub fn bytes(data: &[u8]) -> Value {
    let mut map = Map::new();
    let _ = map.insert(BYTES_KEY.to_owned(), Value::String(STANDARD.encode(data)));
    Value::Object(map)
}

/// Bytes held by a byte-string payload value.
pub fn as_bytes(value: &Value) -> Option<Vec<u8>> {
    bytes_in(value.as_object()?)
}

/// Payload value for a tagged item.
pub fn tagged(tag: u64, value: Value) -> Value {
    let mut map = Map::new();
    let _ = map.insert(TAG_KEY.to_owned(), Value::from(tag));
    let _ = map.insert(TAG_VALUE_KEY.to_owned(), value);
    Value::Object(map)
}

/// Tag number and content of a tagged payload value.
pub fn as_tagged(value: &Value) -> Option<(u64, &Value)> {
    let map = value.as_object()?;
    Some((tag_in(map)?, map.get(TAG_VALUE_KEY)?))
}

/// Payload value for a point in time, as a tag 1 epoch.
///
/// Whole seconds stay integers; anything finer becomes a float.
#[allow(clippy::cast_precision_loss)]
pub fn datetime(at: DateTime<Utc>) -> Value {
    let secs = at.timestamp();
    let nanos = at.timestamp_subsec_nanos();
    let epoch = if nanos == 0 {
        Value::from(secs)
    } else {
        Number::from_f64(secs as f64 + f64::from(nanos) / 1e9)
            .map_or_else(|| Value::from(secs), Value::Number)
    };
    tagged(TAG_DATETIME_EPOCH, epoch)
}

/// Point in time held by a tag 0 or tag 1 payload value.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn as_datetime(value: &Value) -> Option<DateTime<Utc>> {
    let (tag, inner) = as_tagged(value)?;
    match tag {
        TAG_DATETIME_TEXT => DateTime::parse_from_rfc3339(inner.as_str()?)
            .ok()
            .map(|at| at.with_timezone(&Utc)),
        TAG_DATETIME_EPOCH => {
            if let Some(secs) = inner.as_i64() {
                return DateTime::from_timestamp(secs, 0);
            }
            let epoch = inner.as_f64()?;
            let secs = epoch.floor();
            let nanos = ((epoch - secs) * 1e9).round().min(999_999_999.0) as u32;
            DateTime::from_timestamp(secs as i64, nanos)
        }
        _ => None,
    }
}

/// Byte string that travels as a CBOR byte string, or `{"$bytes": ...}` in JSON.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Binary(pub Vec<u8>);

impl Serialize for Binary {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        bytes(&self.0).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Binary {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        as_bytes(&value)
            .map(Self)
            .ok_or_else(|| serde::de::Error::custom("expected a {\"$bytes\": <base64>} object"))
    }
}

/// Point in time that travels as CBOR tag 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub DateTime<Utc>);

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        datetime(self.0).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        as_datetime(&value)
            .map(Self)
            .ok_or_else(|| serde::de::Error::custom("expected a tag 0 or tag 1 date/time"))
    }
}

/// Lower a payload value to CBOR, turning reserved forms into native items.
pub(crate) fn to_cbor(value: Value) -> Result<CborValue, CodecError> {
    Ok(match value {
        Value::Null => CborValue::Null,
        Value::Bool(b) => CborValue::Bool(b),
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                CborValue::Integer(u.into())
            } else if let Some(i) = n.as_i64() {
                CborValue::Integer(i.into())
            } else {
                let f = n
                    .as_f64()
                    .ok_or_else(|| CodecError::Encode(format!("unrepresentable number {n}")))?;
                CborValue::Float(f)
            }
        }
        Value::String(s) => CborValue::Text(s),
        Value::Array(items) => CborValue::Array(
            items
                .into_iter()
                .map(to_cbor)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Object(mut map) => {
            if let Some(data) = bytes_in(&map) {
                return Ok(CborValue::Bytes(data));
            }
            if let Some(tag) = tag_in(&map) {
                let inner = map.remove(TAG_VALUE_KEY).unwrap_or(Value::Null);
                return Ok(CborValue::Tag(tag, Box::new(to_cbor(inner)?)));
            }
            CborValue::Map(
                map.into_iter()
                    .map(|(k, v)| Ok((CborValue::Text(k), to_cbor(v)?)))
                    .collect::<Result<Vec<_>, CodecError>>()?,
            )
        }
    })
}

/// Lift a CBOR item into a payload value, keeping bytes and tags.
pub(crate) fn from_cbor(value: CborValue) -> Result<Value, CodecError> {
    Ok(match value {
        CborValue::Null => Value::Null,
        CborValue::Bool(b) => Value::Bool(b),
        CborValue::Integer(i) => integer_to_json(i128::from(i))?,
        // JSON has no NaN or infinities.
        CborValue::Float(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        CborValue::Text(s) => Value::String(s),
        CborValue::Bytes(data) => bytes(&data),
        CborValue::Tag(tag, inner) => tagged(tag, from_cbor(*inner)?),
        CborValue::Array(items) => Value::Array(
            items
                .into_iter()
                .map(from_cbor)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        CborValue::Map(entries) => {
            let mut map = Map::with_capacity(entries.len());
            for (key, value) in entries {
                let key = match key {
                    CborValue::Text(s) => s,
                    CborValue::Integer(i) => i128::from(i).to_string(),
                    other => {
                        return Err(CodecError::Decode(format!(
                            "unsupported map key: {other:?}"
                        )));
                    }
                };
                let _ = map.insert(key, from_cbor(value)?);
            }
            Value::Object(map)
        }
        other => return Err(CodecError::Decode(format!("unsupported item: {other:?}"))),
    })
}

fn integer_to_json(n: i128) -> Result<Value, CodecError> {
    if let Ok(u) = u64::try_from(n) {
        Ok(Value::from(u))
    } else if let Ok(i) = i64::try_from(n) {
        Ok(Value::from(i))
    } else {
        Err(CodecError::Decode(format!("integer {n} out of range")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn bytes_form() {
        let v = bytes(&[1, 2, 3]);
        assert_eq!(v, json!({"$bytes": "AQID"}));
        assert_eq!(as_bytes(&v), Some(vec![1, 2, 3]));
    }

    #[test]
    fn lookalike_objects_are_plain_maps() {
        assert_eq!(as_bytes(&json!({"$bytes": "AQID", "other": 1})), None);
        assert_eq!(as_bytes(&json!({"$bytes": "not base64!"})), None);
        assert_eq!(as_tagged(&json!({"$tag": "x", "$value": 1})), None);
        assert_eq!(as_tagged(&json!({"$tag": 1})), None);

        let plain = json!({"$bytes": "not base64!"});
        let cbor = to_cbor(plain.clone()).unwrap();
        assert!(matches!(cbor, CborValue::Map(_)));
        assert_eq!(from_cbor(cbor).unwrap(), plain);
    }

    #[test]
    fn epoch_datetime_forms() {
        let at = Utc.with_ymd_and_hms(2023, 11, 14, 22, 13, 20).unwrap();
        let v = datetime(at);
        assert_eq!(v, json!({"$tag": 1, "$value": 1_700_000_000}));
        assert_eq!(as_datetime(&v), Some(at));

        let fractional = tagged(TAG_DATETIME_EPOCH, json!(1_700_000_000.25));
        assert_eq!(
            as_datetime(&fractional).unwrap().timestamp_subsec_millis(),
            250
        );
    }

    #[test]
    fn text_datetime_form() {
        let v = tagged(TAG_DATETIME_TEXT, json!("2023-11-14T22:13:20Z"));
        assert_eq!(as_datetime(&v).unwrap().timestamp(), 1_700_000_000);
        assert_eq!(as_datetime(&tagged(32, json!("x"))), None);
    }

    #[test]
    fn cbor_items_lift_losslessly() {
        let item = CborValue::Map(vec![
            (
                CborValue::Text("raw".into()),
                CborValue::Bytes(vec![0, 255]),
            ),
            (
                CborValue::Text("uri".into()),
                CborValue::Tag(32, Box::new(CborValue::Text("https://x".into()))),
            ),
            (CborValue::Integer(5_u64.into()), CborValue::Float(0.5)),
            (
                CborValue::Text("neg".into()),
                CborValue::Integer((-4_i64).into()),
            ),
        ]);
        let value = from_cbor(item).unwrap();
        assert_eq!(
            value,
            json!({
                "raw": {"$bytes": "AP8="},
                "uri": {"$tag": 32, "$value": "https://x"},
                "5": 0.5,
                "neg": -4,
            })
        );

        let lowered = to_cbor(value).unwrap();
        let CborValue::Map(entries) = lowered else {
            panic!("expected map");
        };
        assert!(entries.iter().any(|(_, v)| *v == CborValue::Bytes(vec![0, 255])));
        assert!(entries.iter().any(|(_, v)| matches!(v, CborValue::Tag(32, _))));
    }

    #[test]
    fn non_finite_floats_become_null() {
        assert_eq!(from_cbor(CborValue::Float(f64::NAN)).unwrap(), Value::Null);
    }

    #[test]
    fn oversized_integers_are_rejected() {
        let below_i64 = ciborium::value::Integer::try_from(i128::from(i64::MIN) - 1).unwrap();
        assert!(from_cbor(CborValue::Integer(below_i64)).is_err());
        let max = ciborium::value::Integer::from(u64::MAX);
        assert_eq!(from_cbor(CborValue::Integer(max)).unwrap(), json!(u64::MAX));
    }

    #[test]
    fn unsupported_map_keys_are_rejected() {
        let item = CborValue::Map(vec![(CborValue::Bool(true), CborValue::Null)]);
        assert!(matches!(from_cbor(item), Err(CodecError::Decode(_))));
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Upload {
        blob: Binary,
        at: Timestamp,
    }

    #[test]
    fn typed_wrappers_use_reserved_forms() {
        let upload = Upload {
            blob: Binary(vec![9, 8]),
            at: Timestamp(Utc.timestamp_opt(1_700_000_000, 0).unwrap()),
        };
        let v = serde_json::to_value(&upload).unwrap();
        assert_eq!(
            v,
            json!({"blob": {"$bytes": "CQg="}, "at": {"$tag": 1, "$value": 1_700_000_000}})
        );
        let back: Upload = serde_json::from_value(v).unwrap();
        assert_eq!(back, upload);
        assert!(serde_json::from_value::<Binary>(json!([1, 2])).is_err());
    }
}
