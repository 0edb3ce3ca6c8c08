pub mod binary;
pub mod text;

use serde::{Deserialize, Serialize};

use crate::{CodecError, Value};

/// Serialization protocol for a connection. Binary (CBOR) is the default;
/// text (JSON) is the debug/compat fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Protocol {
    #[default]
    Cbor,
    Json,
}

impl Protocol {
    /// Subprotocol name negotiated at WebSocket connection open. Exactly one
    /// is offered; the framing is never left implicit.
    pub fn subprotocol(&self) -> &'static str {
        match self {
            Protocol::Cbor => "cbor",
            Protocol::Json => "json",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Protocol::Cbor => "application/cbor",
            Protocol::Json => "application/json",
        }
    }

    pub fn encode(&self, value: &Value) -> Result<Payload, CodecError> {
        Ok(match self {
            Protocol::Cbor => Payload::Binary(binary::encode(value)?),
            Protocol::Json => Payload::Text(text::encode(value)?),
        })
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        match self {
            Protocol::Cbor => binary::decode(bytes),
            Protocol::Json => {
                let s = std::str::from_utf8(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;
                text::decode(s)
            }
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.subprotocol()) }
}

impl std::str::FromStr for Protocol {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cbor" | "binary" => Ok(Protocol::Cbor),
            "json" | "text" => Ok(Protocol::Json),
            other => Err(CodecError::Envelope(format!("unknown protocol {other:?}"))),
        }
    }
}

/// An encoded frame, binary or text depending on the protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Binary(Vec<u8>),
    Text(String),
}

impl Payload {
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Payload::Binary(b) => b,
            Payload::Text(s) => s.into_bytes(),
        }
    }
}
