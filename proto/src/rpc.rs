//! JSON-RPC-style envelopes and the incoming-frame classifier.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::codec::{Payload, Protocol};
use crate::{CodecError, Value};

/// RPC method names.
pub mod method {
    // Authentication
    pub const SIGNIN: &str = "signin";
    pub const SIGNUP: &str = "signup";
    pub const AUTHENTICATE: &str = "authenticate";
    pub const INVALIDATE: &str = "invalidate";
    pub const INFO: &str = "info";

    // Connection
    pub const USE: &str = "use";
    pub const PING: &str = "ping";
    pub const VERSION: &str = "version";
    pub const RESET: &str = "reset";

    // CRUD
    pub const SELECT: &str = "select";
    pub const CREATE: &str = "create";
    pub const INSERT: &str = "insert";
    pub const UPDATE: &str = "update";
    pub const UPSERT: &str = "upsert";
    pub const MERGE: &str = "merge";
    pub const PATCH: &str = "patch";
    pub const DELETE: &str = "delete";
    pub const RELATE: &str = "relate";

    // Query
    pub const QUERY: &str = "query";
    pub const GRAPHQL: &str = "graphql";
    pub const RUN: &str = "run";

    // Live queries (stateful transport only)
    pub const LIVE: &str = "live";
    pub const KILL: &str = "kill";

    // Session variables (stateful transport only)
    pub const LET: &str = "let";
    pub const UNSET: &str = "unset";
}

/// Outbound request envelope. The transport assigns `id` at send time.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    pub id: u64,
    pub method: String,
    pub params: Vec<Value>,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self { id: 0, method: method.into(), params }
    }

    pub fn query(sql: impl Into<String>, vars: BTreeMap<String, Value>) -> Self {
        Self::new(method::QUERY, vec![Value::Strand(sql.into()), Value::Object(vars)])
    }

    pub fn select(thing: impl Into<String>) -> Self { Self::new(method::SELECT, vec![Value::Strand(thing.into())]) }

    pub fn create(thing: impl Into<String>, data: Value) -> Self {
        Self::new(method::CREATE, vec![Value::Strand(thing.into()), data])
    }

    pub fn insert(table: impl Into<String>, data: Value) -> Self {
        Self::new(method::INSERT, vec![Value::Strand(table.into()), data])
    }

    pub fn update(thing: impl Into<String>, data: Value) -> Self {
        Self::new(method::UPDATE, vec![Value::Strand(thing.into()), data])
    }

    pub fn upsert(thing: impl Into<String>, data: Value) -> Self {
        Self::new(method::UPSERT, vec![Value::Strand(thing.into()), data])
    }

    pub fn merge(thing: impl Into<String>, data: Value) -> Self {
        Self::new(method::MERGE, vec![Value::Strand(thing.into()), data])
    }

    pub fn patch(thing: impl Into<String>, patches: Vec<Value>) -> Self {
        Self::new(method::PATCH, vec![Value::Strand(thing.into()), Value::Array(patches)])
    }

    pub fn delete(thing: impl Into<String>) -> Self { Self::new(method::DELETE, vec![Value::Strand(thing.into())]) }

    pub fn signin(credentials: BTreeMap<String, Value>) -> Self {
        Self::new(method::SIGNIN, vec![Value::Object(credentials)])
    }

    pub fn signup(credentials: BTreeMap<String, Value>) -> Self {
        Self::new(method::SIGNUP, vec![Value::Object(credentials)])
    }

    pub fn authenticate(token: impl Into<String>) -> Self {
        Self::new(method::AUTHENTICATE, vec![Value::Strand(token.into())])
    }

    pub fn invalidate() -> Self { Self::new(method::INVALIDATE, vec![]) }

    pub fn use_ns_db(namespace: impl Into<String>, database: impl Into<String>) -> Self {
        Self::new(method::USE, vec![Value::Strand(namespace.into()), Value::Strand(database.into())])
    }

    pub fn live(table: impl Into<String>, diff: bool) -> Self {
        let mut sql = format!("LIVE SELECT * FROM {}", table.into());
        if diff {
            sql.push_str(" DIFF");
        }
        Self::query(sql, BTreeMap::new())
    }

    pub fn kill(live_id: Uuid) -> Self { Self::new(method::KILL, vec![Value::Uuid(live_id)]) }

    pub fn let_var(name: impl Into<String>, value: Value) -> Self {
        Self::new(method::LET, vec![Value::Strand(name.into()), value])
    }

    pub fn unset_var(name: impl Into<String>) -> Self { Self::new(method::UNSET, vec![Value::Strand(name.into())]) }

    pub fn to_value(&self) -> Value {
        Value::object([
            ("id", Value::Int(self.id as i64)),
            ("method", Value::Strand(self.method.clone())),
            ("params", Value::Array(self.params.clone())),
        ])
    }

    pub fn encode(&self, protocol: Protocol) -> Result<Payload, CodecError> { protocol.encode(&self.to_value()) }
}

impl std::fmt::Display for RpcRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rpc#{} {}({} params)", self.id, self.method, self.params.len())
    }
}

/// Server-reported error inside a response envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Inbound response envelope, matched to its request by id.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcResponse {
    pub id: u64,
    pub result: Option<Value>,
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn is_error(&self) -> bool { self.error.is_some() }

    pub fn from_value(value: Value) -> Result<Self, CodecError> {
        let Value::Object(mut map) = value else {
            return Err(CodecError::Envelope("response is not an object".to_owned()));
        };

        let id = match map.get("id") {
            Some(Value::Int(i)) if *i >= 0 => *i as u64,
            // Some server builds echo ids back as strings.
            Some(Value::Strand(s)) => s.parse::<u64>().unwrap_or(0),
            _ => 0,
        };

        let error = match map.remove("error") {
            Some(err) => {
                let code = err.get("code").and_then(Value::as_int).unwrap_or(-1);
                let message =
                    err.get("message").and_then(Value::as_str).unwrap_or("unknown error").to_owned();
                Some(RpcError { code, message })
            }
            None => None,
        };

        Ok(Self { id, result: map.remove("result"), error })
    }
}

/// A live-query change pushed by the server, keyed by subscription uuid.
///
/// Notification ids are server-assigned uuids and never collide with the
/// integer request-id namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveNotification {
    pub id: Uuid,
    pub action: String,
    pub result: Value,
}

/// Classification of an incoming frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Response(RpcResponse),
    Notification(LiveNotification),
    /// Unknown frame shape, discarded by the reader.
    Ignored,
}

impl ServerMessage {
    pub fn classify(value: Value) -> Self {
        let Some(map) = value.as_object() else { return ServerMessage::Ignored };

        if let Some(action) = map.get("action").and_then(Value::as_str) {
            let Some(id) = map.get("id").and_then(Value::as_uuid) else { return ServerMessage::Ignored };
            let result = map.get("result").cloned().unwrap_or(Value::None);
            return ServerMessage::Notification(LiveNotification { id, action: action.to_owned(), result });
        }

        if map.contains_key("id") || map.contains_key("result") || map.contains_key("error") {
            return match RpcResponse::from_value(value) {
                Ok(resp) => ServerMessage::Response(resp),
                Err(_) => ServerMessage::Ignored,
            };
        }

        ServerMessage::Ignored
    }
}
