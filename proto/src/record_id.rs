use serde::{Deserialize, Serialize};

/// Key half of a record id. SurrealDB permits both numeric and string keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecordKey {
    Number(i64),
    String(String),
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKey::Number(n) => write!(f, "{}", n),
            RecordKey::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RecordKey {
    fn from(n: i64) -> Self { RecordKey::Number(n) }
}
impl From<&str> for RecordKey {
    fn from(s: &str) -> Self { RecordKey::String(s.to_owned()) }
}
impl From<String> for RecordKey {
    fn from(s: String) -> Self { RecordKey::String(s) }
}

/// A record id, the `table:key` pair uniquely identifying a row.
///
/// Plain strings are never promoted to record ids implicitly; callers that
/// mean a record reference construct one of these explicitly.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId {
    pub table: String,
    pub key: RecordKey,
}

impl RecordId {
    pub fn new(table: impl Into<String>, key: impl Into<RecordKey>) -> Self {
        Self { table: table.into(), key: key.into() }
    }

    /// Parse a `table:key` string. The key part is kept verbatim as a string.
    pub fn parse(value: &str) -> Result<Self, crate::CodecError> {
        match value.split_once(':') {
            Some((table, key)) if !table.is_empty() && !key.is_empty() => {
                Ok(Self { table: table.to_owned(), key: RecordKey::String(key.to_owned()) })
            }
            _ => Err(crate::CodecError::Decode(format!("invalid record id: {value:?}"))),
        }
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}:{}", self.table, self.key) }
}

/// A table reference, distinct on the wire from a plain string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Table(pub String);

impl Table {
    pub fn new(name: impl Into<String>) -> Self { Self(name.into()) }

    pub fn name(&self) -> &str { &self.0 }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.0) }
}

impl From<&str> for Table {
    fn from(s: &str) -> Self { Self(s.to_owned()) }
}

/// A SurrealDB duration kept in its textual form (`1h30m`, `500ms`, ...).
///
/// The server's duration grammar is richer than anything std expresses, so
/// the value round-trips untouched.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Duration(pub String);

impl Duration {
    pub fn new(value: impl Into<String>) -> Self { Self(value.into()) }
}

impl std::fmt::Display for Duration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.0) }
}

impl From<&str> for Duration {
    fn from(s: &str) -> Self { Self(s.to_owned()) }
}
