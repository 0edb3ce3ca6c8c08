use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::record_id::{Duration, RecordId, Table};

/// Wire value for the document-graph protocol.
///
/// `None` marks an *absent* field and is distinct from `Null` (present, with
/// a null value); the distinction survives the binary codec round-trip and is
/// load-bearing for `option<T>` fields on SCHEMAFULL tables.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Strand(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Datetime(DateTime<Utc>),
    Duration(Duration),
    RecordId(RecordId),
    Table(Table),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Default for Value {
    fn default() -> Self {
        Value::None
    }
}

impl Value {
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn record(table: impl Into<String>, key: impl Into<crate::RecordKey>) -> Self {
        Value::RecordId(RecordId::new(table, key))
    }

    pub fn is_none(&self) -> bool { matches!(self, Value::None) }

    pub fn is_null(&self) -> bool { matches!(self, Value::Null) }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Strand(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Value::Uuid(u) => Some(*u),
            Value::Strand(s) => Uuid::parse_str(s).ok(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_record_id(&self) -> Option<&RecordId> {
        match self {
            Value::RecordId(rid) => Some(rid),
            _ => None,
        }
    }

    /// Field lookup on object values.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// The record id rendered as `table:key`, accepting both typed record
    /// ids and plain strings already in that shape.
    pub fn record_id_string(&self) -> Option<String> {
        match self {
            Value::RecordId(rid) => Some(rid.to_string()),
            Value::Strand(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self { Value::Bool(b) }
}
impl From<i64> for Value {
    fn from(i: i64) -> Self { Value::Int(i) }
}
impl From<i32> for Value {
    fn from(i: i32) -> Self { Value::Int(i as i64) }
}
impl From<u32> for Value {
    fn from(i: u32) -> Self { Value::Int(i as i64) }
}
impl From<f64> for Value {
    fn from(f: f64) -> Self { Value::Float(f) }
}
impl From<&str> for Value {
    fn from(s: &str) -> Self { Value::Strand(s.to_owned()) }
}
impl From<String> for Value {
    fn from(s: String) -> Self { Value::Strand(s) }
}
impl From<Uuid> for Value {
    fn from(u: Uuid) -> Self { Value::Uuid(u) }
}
impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self { Value::Datetime(dt) }
}
impl From<Decimal> for Value {
    fn from(d: Decimal) -> Self { Value::Decimal(d) }
}
impl From<RecordId> for Value {
    fn from(rid: RecordId) -> Self { Value::RecordId(rid) }
}
impl From<Table> for Value {
    fn from(t: Table) -> Self { Value::Table(t) }
}
impl From<Duration> for Value {
    fn from(d: Duration) -> Self { Value::Duration(d) }
}
impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self { Value::Array(items) }
}
impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self { Value::Object(map) }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => v.into(),
            None => Value::None,
        }
    }
}
