//! Bridge between the wire value model and arbitrary serde types, via
//! serde_json. Used by typed function calls and record deserialization.

use serde::{de::DeserializeOwned, Serialize};

use crate::codec::text;
use crate::{CodecError, Value};

pub fn to_value<T: Serialize>(data: &T) -> Result<Value, CodecError> {
    let json = serde_json::to_value(data).map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(text::from_json(json))
}

pub fn from_value<T: DeserializeOwned>(value: &Value) -> Result<T, CodecError> {
    let json = text::to_json(value)?;
    serde_json::from_value(json).map_err(|e| CodecError::Decode(e.to_string()))
}
