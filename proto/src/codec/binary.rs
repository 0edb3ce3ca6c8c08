//! CBOR framing with the server's custom tags.
//!
//! The binary protocol is the default: it carries an explicit *None* tag
//! distinct from the plain null primitive, and it never reinterprets string
//! content, so values such as `data:` URLs survive untouched.

use chrono::{DateTime, Utc};
use ciborium::value::{Integer, Value as Cbor};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::record_id::{Duration, RecordId, RecordKey, Table};
use crate::{CodecError, Value};

pub const TAG_NONE: u64 = 6;
pub const TAG_TABLE: u64 = 7;
pub const TAG_RECORD_ID: u64 = 8;
pub const TAG_UUID: u64 = 9;
pub const TAG_DECIMAL: u64 = 10;
pub const TAG_DATETIME: u64 = 12;
pub const TAG_DURATION: u64 = 14;

pub fn encode(value: &Value) -> Result<Vec<u8>, CodecError> {
    let cbor = to_cbor(value)?;
    let mut out = Vec::new();
    ciborium::ser::into_writer(&cbor, &mut out).map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(out)
}

pub fn decode(bytes: &[u8]) -> Result<Value, CodecError> {
    let cbor: Cbor = ciborium::de::from_reader(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;
    from_cbor(cbor)
}

fn to_cbor(value: &Value) -> Result<Cbor, CodecError> {
    Ok(match value {
        Value::None => Cbor::Tag(TAG_NONE, Box::new(Cbor::Null)),
        Value::Null => Cbor::Null,
        Value::Bool(b) => Cbor::Bool(*b),
        Value::Int(i) => Cbor::Integer(Integer::from(*i)),
        Value::Float(f) => Cbor::Float(*f),
        Value::Decimal(d) => Cbor::Tag(TAG_DECIMAL, Box::new(Cbor::Text(d.to_string()))),
        Value::Strand(s) => Cbor::Text(s.clone()),
        Value::Bytes(b) => Cbor::Bytes(b.clone()),
        Value::Uuid(u) => Cbor::Tag(TAG_UUID, Box::new(Cbor::Text(u.to_string()))),
        Value::Datetime(dt) => Cbor::Tag(TAG_DATETIME, Box::new(Cbor::Text(dt.to_rfc3339()))),
        Value::Duration(d) => Cbor::Tag(TAG_DURATION, Box::new(Cbor::Text(d.0.clone()))),
        Value::RecordId(rid) => {
            let key = match &rid.key {
                RecordKey::Number(n) => Cbor::Integer(Integer::from(*n)),
                RecordKey::String(s) => Cbor::Text(s.clone()),
            };
            Cbor::Tag(TAG_RECORD_ID, Box::new(Cbor::Array(vec![Cbor::Text(rid.table.clone()), key])))
        }
        Value::Table(t) => Cbor::Tag(TAG_TABLE, Box::new(Cbor::Text(t.0.clone()))),
        Value::Array(items) => Cbor::Array(items.iter().map(to_cbor).collect::<Result<Vec<_>, _>>()?),
        Value::Object(map) => {
            let mut entries = Vec::with_capacity(map.len());
            for (k, v) in map {
                entries.push((Cbor::Text(k.clone()), to_cbor(v)?));
            }
            Cbor::Map(entries)
        }
    })
}

fn from_cbor(cbor: Cbor) -> Result<Value, CodecError> {
    Ok(match cbor {
        Cbor::Null => Value::Null,
        Cbor::Bool(b) => Value::Bool(b),
        Cbor::Integer(i) => {
            let wide = i128::from(i);
            Value::Int(i64::try_from(wide).map_err(|_| CodecError::Decode(format!("integer out of range: {wide}")))?)
        }
        Cbor::Float(f) => Value::Float(f),
        Cbor::Text(s) => Value::Strand(s),
        Cbor::Bytes(b) => Value::Bytes(b),
        Cbor::Array(items) => Value::Array(items.into_iter().map(from_cbor).collect::<Result<Vec<_>, _>>()?),
        Cbor::Map(entries) => {
            let mut map = std::collections::BTreeMap::new();
            for (k, v) in entries {
                let Cbor::Text(key) = k else {
                    return Err(CodecError::Decode("non-string map key".to_owned()));
                };
                map.insert(key, from_cbor(v)?);
            }
            Value::Object(map)
        }
        Cbor::Tag(tag, inner) => decode_tag(tag, *inner)?,
        other => return Err(CodecError::Decode(format!("unsupported cbor item: {other:?}"))),
    })
}

fn decode_tag(tag: u64, inner: Cbor) -> Result<Value, CodecError> {
    match tag {
        TAG_NONE => Ok(Value::None),
        TAG_TABLE => match inner {
            Cbor::Text(name) => Ok(Value::Table(Table(name))),
            other => Err(CodecError::Decode(format!("table tag over non-string: {other:?}"))),
        },
        TAG_RECORD_ID => decode_record_id(inner),
        TAG_UUID => match inner {
            Cbor::Text(s) => {
                Ok(Value::Uuid(Uuid::parse_str(&s).map_err(|e| CodecError::Decode(format!("bad uuid {s:?}: {e}")))?))
            }
            other => Err(CodecError::Decode(format!("uuid tag over non-string: {other:?}"))),
        },
        TAG_DECIMAL => match inner {
            Cbor::Text(s) => {
                Ok(Value::Decimal(s.parse::<Decimal>().map_err(|e| CodecError::Decode(format!("bad decimal {s:?}: {e}")))?))
            }
            other => Err(CodecError::Decode(format!("decimal tag over non-string: {other:?}"))),
        },
        TAG_DATETIME => match inner {
            Cbor::Text(s) => Ok(Value::Datetime(parse_datetime(&s)?)),
            other => Err(CodecError::Decode(format!("datetime tag over non-string: {other:?}"))),
        },
        TAG_DURATION => match inner {
            Cbor::Text(s) => Ok(Value::Duration(Duration(s))),
            other => Err(CodecError::Decode(format!("duration tag over non-string: {other:?}"))),
        },
        // Forward compatibility: unknown tags pass the raw tagged value
        // through so newer server payloads still decode.
        _ => from_cbor(inner),
    }
}

fn decode_record_id(inner: Cbor) -> Result<Value, CodecError> {
    match inner {
        Cbor::Array(parts) if parts.len() == 2 => {
            let mut parts = parts.into_iter();
            let table = match parts.next() {
                Some(Cbor::Text(t)) => t,
                other => return Err(CodecError::Decode(format!("record id table part: {other:?}"))),
            };
            let key = match parts.next() {
                Some(Cbor::Text(s)) => RecordKey::String(s),
                Some(Cbor::Integer(i)) => RecordKey::Number(
                    i64::try_from(i128::from(i)).map_err(|_| CodecError::Decode("record id key out of range".to_owned()))?,
                ),
                other => return Err(CodecError::Decode(format!("record id key part: {other:?}"))),
            };
            Ok(Value::RecordId(RecordId { table, key }))
        }
        // Some server versions emit the string form instead.
        Cbor::Text(s) => Ok(Value::RecordId(RecordId::parse(&s)?)),
        other => from_cbor(other),
    }
}

/// Accepts RFC 3339 with either a `Z` or a numeric offset, canonicalised to
/// UTC. Timestamps without any offset are treated as UTC.
pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, CodecError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }
    Err(CodecError::Decode(format!("bad datetime {s:?}")))
}
