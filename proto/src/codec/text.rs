//! JSON framing, the debug/compat fallback.
//!
//! JSON has no *absent* sentinel, so outbound objects drop keys whose value
//! is `Value::None` — the server then sees an absent field rather than a
//! rejected `NULL`. Inbound, null is reported as null; absence cannot be
//! reconstructed on this protocol.

use serde_json::{Number, Value as Json};

use crate::{CodecError, Value};

pub fn encode(value: &Value) -> Result<String, CodecError> {
    serde_json::to_string(&to_json(value)?).map_err(|e| CodecError::Encode(e.to_string()))
}

pub fn decode(text: &str) -> Result<Value, CodecError> {
    let json: Json = serde_json::from_str(text).map_err(|e| CodecError::Decode(e.to_string()))?;
    Ok(from_json(json))
}

pub fn to_json(value: &Value) -> Result<Json, CodecError> {
    Ok(match value {
        Value::None | Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number((*i).into()),
        Value::Float(f) => {
            Json::Number(Number::from_f64(*f).ok_or_else(|| CodecError::Encode(format!("non-finite float: {f}")))?)
        }
        // Lossy by design: the text protocol flattens typed scalars to their
        // textual or numeric JSON shape.
        Value::Decimal(d) => Json::String(d.to_string()),
        Value::Strand(s) => Json::String(s.clone()),
        Value::Bytes(_) => return Err(CodecError::Encode("bytes are not representable on the text protocol".to_owned())),
        Value::Uuid(u) => Json::String(u.to_string()),
        Value::Datetime(dt) => Json::String(dt.to_rfc3339()),
        Value::Duration(d) => Json::String(d.0.clone()),
        Value::RecordId(rid) => Json::String(rid.to_string()),
        Value::Table(t) => Json::String(t.0.clone()),
        Value::Array(items) => Json::Array(items.iter().map(to_json).collect::<Result<Vec<_>, _>>()?),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                if v.is_none() {
                    continue;
                }
                out.insert(k.clone(), to_json(v)?);
            }
            Json::Object(out)
        }
    })
}

pub fn from_json(json: Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        // Strings are never reinterpreted as record ids or dates here; the
        // caller asks for typed views explicitly.
        Json::String(s) => Value::Strand(s),
        Json::Array(items) => Value::Array(items.into_iter().map(from_json).collect()),
        Json::Object(map) => Value::Object(map.into_iter().map(|(k, v)| (k, from_json(v))).collect()),
    }
}
