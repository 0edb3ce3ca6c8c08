//! Live-query subscriptions: change parsing, WHERE-parameter inlining, the
//! async stream / callback delivery flavours, and the multiplexing manager.

mod manager;
mod stream;

use std::collections::BTreeMap;
use std::sync::Arc;

use surrealix_proto::{LiveNotification, Value};
use uuid::Uuid;

pub use manager::LiveManager;
pub use stream::{LiveStream, LiveStreamBuilder};

/// Invoked after a successful resubscribe with `(old_uuid, new_uuid)`.
pub type ReconnectHook = Arc<dyn Fn(Uuid, Uuid) + Send + Sync>;

/// Action carried by a live notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveAction {
    Create,
    Update,
    Delete,
}

impl LiveAction {
    fn parse(action: &str) -> Self {
        match action {
            "CREATE" => LiveAction::Create,
            "DELETE" => LiveAction::Delete,
            _ => LiveAction::Update,
        }
    }
}

impl std::fmt::Display for LiveAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LiveAction::Create => write!(f, "CREATE"),
            LiveAction::Update => write!(f, "UPDATE"),
            LiveAction::Delete => write!(f, "DELETE"),
        }
    }
}

/// One change delivered to a subscription.
///
/// In DIFF mode `result` is the JSON-Patch list the server sent and
/// `changed_fields` names the touched top-level fields; otherwise `result`
/// is the full record.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveChange {
    pub id: Uuid,
    pub action: LiveAction,
    pub record_id: Option<String>,
    pub result: Value,
    pub before: Option<Value>,
    pub changed_fields: Vec<String>,
}

impl LiveChange {
    pub fn from_notification(notification: LiveNotification) -> Self {
        let LiveNotification { id, action, result } = notification;

        let record_id = result.get("id").and_then(Value::record_id_string);

        let mut changed_fields = Vec::new();
        if let Some(patches) = result.as_array() {
            for patch in patches {
                if let Some(path) = patch.get("path").and_then(Value::as_str) {
                    if let Some(rest) = path.strip_prefix('/') {
                        let field = rest.split('/').next().unwrap_or(rest);
                        changed_fields.push(field.to_owned());
                    }
                }
            }
        }

        Self { id, action: LiveAction::parse(&action), record_id, result, before: None, changed_fields }
    }
}

/// Everything needed to recreate a subscription after a reconnect, plus the
/// optional hook fired once the new server uuid is known.
#[derive(Clone)]
pub struct LiveSubscriptionParams {
    pub table: String,
    pub where_clause: Option<String>,
    pub params: BTreeMap<String, Value>,
    pub diff: bool,
    pub on_reconnect: Option<ReconnectHook>,
}

impl LiveSubscriptionParams {
    pub fn new(table: impl Into<String>) -> Self {
        Self { table: table.into(), where_clause: None, params: BTreeMap::new(), diff: false, on_reconnect: None }
    }

    /// The LIVE SELECT statement with all parameters inlined.
    ///
    /// The server does not evaluate session variables inside a LIVE SELECT
    /// WHERE clause, so `$name` references are substituted with literal
    /// values before sending.
    pub fn to_sql(&self) -> String {
        let mut sql = format!("LIVE SELECT * FROM {}", self.table);
        if let Some(where_clause) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(where_clause);
        }
        if self.diff {
            sql.push_str(" DIFF");
        }
        if self.params.is_empty() {
            sql
        } else {
            inline_params(&sql, &self.params)
        }
    }
}

impl std::fmt::Debug for LiveSubscriptionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSubscriptionParams")
            .field("table", &self.table)
            .field("where_clause", &self.where_clause)
            .field("params", &self.params)
            .field("diff", &self.diff)
            .field("on_reconnect", &self.on_reconnect.as_ref().map(|_| "..."))
            .finish()
    }
}

/// Replace `$name` references with inline literals. Keys are substituted
/// longest-first so `$_f1` never eats the prefix of `$_f10`.
pub fn inline_params(sql: &str, params: &BTreeMap<String, Value>) -> String {
    let mut keys: Vec<&String> = params.keys().collect();
    keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    let mut out = sql.to_owned();
    for key in keys {
        out = out.replace(&format!("${key}"), &format_leaf(&params[key]));
    }
    out
}

/// Render a value as a SurrealQL literal for inline substitution.
pub fn format_leaf(value: &Value) -> String {
    match value {
        Value::None => "NONE".to_owned(),
        Value::Null => "NULL".to_owned(),
        Value::Bool(b) => if *b { "true" } else { "false" }.to_owned(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Decimal(d) => d.to_string(),
        Value::Strand(s) => quote(s),
        Value::Bytes(b) => quote(&String::from_utf8_lossy(b)),
        Value::Uuid(u) => format!("u'{u}'"),
        Value::Datetime(dt) => format!("d'{}'", dt.to_rfc3339()),
        Value::Duration(d) => d.0.clone(),
        Value::RecordId(rid) => rid.to_string(),
        Value::Table(t) => t.0.clone(),
        Value::Array(items) => {
            let leaves: Vec<String> = items.iter().map(format_leaf).collect();
            format!("[{}]", leaves.join(", "))
        }
        Value::Object(map) => {
            let entries: Vec<String> = map.iter().map(|(k, v)| format!("{}: {}", k, format_leaf(v))).collect();
            format!("{{ {} }}", entries.join(", "))
        }
    }
}

fn quote(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}
