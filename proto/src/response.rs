//! Typed views over raw RPC results.

use crate::Value;

/// Per-statement status reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Ok,
    Err,
}

/// Result of a single statement inside a `query` call.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub status: ResponseStatus,
    pub result: Value,
    pub time: String,
}

impl QueryResult {
    fn from_value(value: Value) -> Self {
        match value {
            Value::Object(ref map) if map.contains_key("status") => {
                let status = match map.get("status").and_then(Value::as_str) {
                    Some("ERR") => ResponseStatus::Err,
                    _ => ResponseStatus::Ok,
                };
                let time = map.get("time").and_then(Value::as_str).unwrap_or_default().to_owned();
                let result = map.get("result").cloned().unwrap_or(Value::None);
                Self { status, result, time }
            }
            other => Self { status: ResponseStatus::Ok, result: other, time: String::new() },
        }
    }

    pub fn is_ok(&self) -> bool { self.status == ResponseStatus::Ok }

    /// Result rows, empty when the statement did not yield a list.
    pub fn records(&self) -> &[Value] { self.result.as_array().unwrap_or(&[]) }

    pub fn first(&self) -> Option<&Value> { self.records().first() }

    /// Scalar view of the result when it is one.
    pub fn scalar(&self) -> Option<&Value> {
        match &self.result {
            v @ (Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Strand(_) | Value::Uuid(_)) => Some(v),
            _ => None,
        }
    }
}

/// Response of a `query` call: one `QueryResult` per statement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryResponse {
    pub results: Vec<QueryResult>,
}

impl QueryResponse {
    pub fn from_rpc_result(value: Value) -> Self {
        let results = match value {
            Value::Array(items) => items.into_iter().map(QueryResult::from_value).collect(),
            Value::None | Value::Null => Vec::new(),
            other => vec![QueryResult::from_value(other)],
        };
        Self { results }
    }

    pub fn is_ok(&self) -> bool { self.results.iter().all(QueryResult::is_ok) }

    pub fn first_result(&self) -> Option<&QueryResult> { self.results.first() }

    pub fn all_records(&self) -> Vec<&Value> { self.results.iter().flat_map(|r| r.records().iter()).collect() }
}

/// Response of single-record operations (create, relate).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordResponse {
    pub record: Option<Value>,
}

impl RecordResponse {
    pub fn from_rpc_result(value: Value) -> Self {
        let record = match value {
            Value::Object(_) => Some(value),
            Value::Array(items) => items.into_iter().next(),
            _ => None,
        };
        Self { record }
    }

    pub fn exists(&self) -> bool { self.record.is_some() }

    pub fn get(&self, key: &str) -> Option<&Value> { self.record.as_ref().and_then(|r| r.get(key)) }

    pub fn id(&self) -> Option<String> { self.get("id").and_then(Value::record_id_string) }
}

/// Response of multi-record operations (select, update, merge, insert).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordsResponse {
    pub records: Vec<Value>,
}

impl RecordsResponse {
    pub fn from_rpc_result(value: Value) -> Self {
        let records = match value {
            Value::Array(items) => items,
            Value::Object(_) => vec![value],
            _ => Vec::new(),
        };
        Self { records }
    }

    pub fn len(&self) -> usize { self.records.len() }

    pub fn is_empty(&self) -> bool { self.records.is_empty() }

    pub fn first(&self) -> Option<&Value> { self.records.first() }
}

/// Response of delete operations.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeleteResponse {
    pub deleted: Vec<Value>,
}

impl DeleteResponse {
    pub fn from_rpc_result(value: Value) -> Self {
        Self { deleted: RecordsResponse::from_rpc_result(value).records }
    }

    pub fn len(&self) -> usize { self.deleted.len() }
}

/// Response of signin/signup/authenticate.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AuthResponse {
    pub token: Option<String>,
    pub success: bool,
}

impl AuthResponse {
    pub fn from_rpc_result(value: Value) -> Self {
        match value {
            Value::Strand(token) => Self { token: Some(token), success: true },
            // A tokenless success is still a success (root signin on some
            // server configurations).
            Value::None | Value::Null => Self { token: None, success: true },
            _ => Self { token: None, success: false },
        }
    }
}

/// Response of the `info` call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InfoResponse {
    pub data: Value,
}

impl InfoResponse {
    pub fn from_rpc_result(value: Value) -> Self {
        let data = match value {
            Value::Array(items) => items.into_iter().next().unwrap_or(Value::None),
            other => other,
        };
        Self { data }
    }
}
