//! Atomic multi-statement transactions, in two flavours sharing one
//! contract.
//!
//! The *batched* flavour buffers statements locally and dispatches them as a
//! single `BEGIN … COMMIT` request — the only option on the stateless
//! transport. The *interactive* flavour drives a server-stateful
//! transaction over the duplex channel, forwarding each operation as it
//! happens.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use surrealix_proto::{DeleteResponse, QueryResponse, RecordResponse, RecordsResponse, Value};
use tracing::{debug, warn};

use crate::config::ConnectionKind;
use crate::connection::Surreal;
use crate::error::{Error, Result, RollbackStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    New,
    Active,
    Committed,
    RolledBack,
}

/// One contract over both transaction models. Operations on a non-active
/// transaction fail with a transaction error; committed and rolled-back are
/// absorbing states.
#[async_trait]
pub trait Transaction: Send {
    async fn begin(&mut self) -> Result<()>;
    async fn commit(&mut self) -> Result<QueryResponse>;
    async fn rollback(&mut self) -> Result<()>;
    fn state(&self) -> TransactionState;

    async fn query(&mut self, sql: &str, vars: BTreeMap<String, Value>) -> Result<QueryResponse>;
    async fn create(&mut self, thing: &str, data: BTreeMap<String, Value>) -> Result<RecordResponse>;
    async fn insert(&mut self, table: &str, rows: Vec<BTreeMap<String, Value>>) -> Result<RecordsResponse>;
    async fn update(&mut self, thing: &str, data: BTreeMap<String, Value>) -> Result<RecordsResponse>;
    async fn merge(&mut self, thing: &str, data: BTreeMap<String, Value>) -> Result<RecordsResponse>;
    async fn delete(&mut self, thing: &str) -> Result<DeleteResponse>;
    async fn relate(
        &mut self,
        from: &str,
        relation: &str,
        to: &str,
        data: Option<BTreeMap<String, Value>>,
    ) -> Result<RecordResponse>;
}

/// The scoped-acquisition form: begin, run the closure, commit on success,
/// rollback and propagate on error.
pub async fn run<T>(
    tx: &mut dyn Transaction,
    f: impl for<'a> FnOnce(&'a mut dyn Transaction) -> BoxFuture<'a, Result<T>>,
) -> Result<T> {
    tx.begin().await?;
    match f(&mut *tx).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!("rollback after failed transaction body also failed: {rollback_err}");
            }
            Err(e)
        }
    }
}

/// Pick the transaction model matching the transport.
pub fn transaction_for(conn: Arc<dyn Surreal>) -> Box<dyn Transaction> {
    match conn.kind() {
        ConnectionKind::Http => Box::new(BatchedTransaction::new(conn)),
        ConnectionKind::Websocket => Box::new(InteractiveTransaction::new(conn)),
    }
}

/// A statement queued in a batched transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub vars: BTreeMap<String, Value>,
}

fn inactive(state: TransactionState) -> Error {
    Error::Transaction { message: format!("transaction not active (state: {state:?})"), rollback: RollbackStatus::Unknown }
}

fn set_fields(keys: impl Iterator<Item = impl AsRef<str>>, prefix: &str) -> String {
    keys.map(|k| {
        let k = k.as_ref();
        format!("{k} = ${prefix}{k}")
    })
    .collect::<Vec<_>>()
    .join(", ")
}

/// Batched transaction for the stateless transport.
///
/// `begin` is local; every operation is lowered to SurrealQL and buffered;
/// `commit` wraps the buffer in `BEGIN TRANSACTION; … COMMIT TRANSACTION;`
/// and dispatches once. `rollback` just discards the buffer.
pub struct BatchedTransaction {
    conn: Arc<dyn Surreal>,
    statements: Vec<Statement>,
    state: TransactionState,
}

impl BatchedTransaction {
    pub fn new(conn: Arc<dyn Surreal>) -> Self {
        Self { conn, statements: Vec::new(), state: TransactionState::New }
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state == TransactionState::Active {
            Ok(())
        } else {
            Err(inactive(self.state))
        }
    }

    fn queue(&mut self, sql: String, vars: BTreeMap<String, Value>) -> Result<()> {
        self.ensure_active()?;
        self.statements.push(Statement { sql, vars });
        Ok(())
    }

    pub fn statements(&self) -> &[Statement] { &self.statements }

    /// Render the batch. Each statement's `$name` references are rewritten to
    /// `$tx_<i>_<name>` so variables never collide across statements; keys
    /// are substituted longest-first to keep `$v` out of `$v2`.
    pub fn build(&self) -> (String, BTreeMap<String, Value>) {
        let mut parts = Vec::with_capacity(self.statements.len() + 2);
        parts.push("BEGIN TRANSACTION;".to_owned());
        let mut all_vars = BTreeMap::new();

        for (i, stmt) in self.statements.iter().enumerate() {
            let mut sql = stmt.sql.clone();
            let mut keys: Vec<&String> = stmt.vars.keys().collect();
            keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
            for key in keys {
                let namespaced = format!("tx_{i}_{key}");
                sql = sql.replace(&format!("${key}"), &format!("${namespaced}"));
                all_vars.insert(namespaced, stmt.vars[key].clone());
            }
            parts.push(sql);
        }

        parts.push("COMMIT TRANSACTION;".to_owned());
        (parts.join("\n"), all_vars)
    }
}

#[async_trait]
impl Transaction for BatchedTransaction {
    async fn begin(&mut self) -> Result<()> {
        if self.state == TransactionState::Active {
            return Err(Error::Transaction {
                message: "transaction already active".to_owned(),
                rollback: RollbackStatus::Unknown,
            });
        }
        self.state = TransactionState::Active;
        self.statements.clear();
        Ok(())
    }

    async fn commit(&mut self) -> Result<QueryResponse> {
        self.ensure_active()?;

        // An empty commit is legal and a no-op.
        if self.statements.is_empty() {
            self.state = TransactionState::Committed;
            return Ok(QueryResponse::default());
        }

        let (sql, vars) = self.build();
        debug!(statements = self.statements.len(), "committing batched transaction");
        match self.conn.query(&sql, vars).await {
            Ok(response) => {
                self.state = TransactionState::Committed;
                Ok(response)
            }
            Err(e) => {
                // The server applies the batch atomically, so a failed batch
                // leaves the database untouched.
                self.state = TransactionState::RolledBack;
                Err(Error::transaction(format!("transaction commit failed: {e}"), RollbackStatus::Succeeded))
            }
        }
    }

    async fn rollback(&mut self) -> Result<()> {
        // Nothing reached the server; discarding the buffer is the rollback.
        self.statements.clear();
        self.state = TransactionState::RolledBack;
        Ok(())
    }

    fn state(&self) -> TransactionState { self.state }

    async fn query(&mut self, sql: &str, vars: BTreeMap<String, Value>) -> Result<QueryResponse> {
        self.queue(sql.to_owned(), vars)?;
        Ok(QueryResponse::default())
    }

    async fn create(&mut self, thing: &str, data: BTreeMap<String, Value>) -> Result<RecordResponse> {
        if data.is_empty() {
            self.queue(format!("CREATE {thing};"), BTreeMap::new())?;
        } else {
            let fields = set_fields(data.keys(), "");
            self.queue(format!("CREATE {thing} SET {fields};"), data)?;
        }
        Ok(RecordResponse::default())
    }

    async fn insert(&mut self, table: &str, rows: Vec<BTreeMap<String, Value>>) -> Result<RecordsResponse> {
        for (i, row) in rows.into_iter().enumerate() {
            let prefix = format!("r{i}_");
            let fields = set_fields(row.keys(), &prefix);
            let vars = row.into_iter().map(|(k, v)| (format!("{prefix}{k}"), v)).collect();
            self.queue(format!("CREATE {table} SET {fields};"), vars)?;
        }
        Ok(RecordsResponse::default())
    }

    async fn update(&mut self, thing: &str, data: BTreeMap<String, Value>) -> Result<RecordsResponse> {
        let fields = set_fields(data.keys(), "");
        self.queue(format!("UPDATE {thing} SET {fields};"), data)?;
        Ok(RecordsResponse::default())
    }

    async fn merge(&mut self, thing: &str, data: BTreeMap<String, Value>) -> Result<RecordsResponse> {
        let fields: Vec<String> = data.keys().map(|k| format!("{k}: ${k}")).collect();
        self.queue(format!("UPDATE {thing} MERGE {{ {} }};", fields.join(", ")), data)?;
        Ok(RecordsResponse::default())
    }

    async fn delete(&mut self, thing: &str) -> Result<DeleteResponse> {
        self.queue(format!("DELETE {thing};"), BTreeMap::new())?;
        Ok(DeleteResponse::default())
    }

    async fn relate(
        &mut self,
        from: &str,
        relation: &str,
        to: &str,
        data: Option<BTreeMap<String, Value>>,
    ) -> Result<RecordResponse> {
        match data {
            Some(data) if !data.is_empty() => {
                let fields = set_fields(data.keys(), "");
                self.queue(format!("RELATE {from}->{relation}->{to} SET {fields};"), data)?;
            }
            _ => self.queue(format!("RELATE {from}->{relation}->{to};"), BTreeMap::new())?,
        }
        Ok(RecordResponse::default())
    }
}

/// Interactive transaction for the stateful transport.
///
/// `begin` claims the transport's single transaction slot and sends
/// `BEGIN TRANSACTION;`; operations execute immediately inside it. A
/// failed commit attempts `CANCEL TRANSACTION;` and records whether that
/// restored the database. Dropping an active transaction spawns a
/// best-effort cancel.
pub struct InteractiveTransaction {
    conn: Arc<dyn Surreal>,
    state: TransactionState,
}

impl InteractiveTransaction {
    pub fn new(conn: Arc<dyn Surreal>) -> Self { Self { conn, state: TransactionState::New } }

    fn ensure_active(&self) -> Result<()> {
        if self.state == TransactionState::Active {
            Ok(())
        } else {
            Err(inactive(self.state))
        }
    }
}

#[async_trait]
impl Transaction for InteractiveTransaction {
    async fn begin(&mut self) -> Result<()> {
        if self.state == TransactionState::Active {
            return Err(Error::Transaction {
                message: "transaction already active".to_owned(),
                rollback: RollbackStatus::Unknown,
            });
        }
        if !self.conn.try_begin_tx() {
            return Err(Error::Transaction {
                message: "another transaction is already active on this connection".to_owned(),
                rollback: RollbackStatus::Unknown,
            });
        }
        match self.conn.query("BEGIN TRANSACTION;", BTreeMap::new()).await {
            Ok(_) => {
                self.state = TransactionState::Active;
                Ok(())
            }
            Err(e) => {
                self.conn.end_tx();
                Err(Error::transaction(format!("begin failed: {e}"), RollbackStatus::Unknown))
            }
        }
    }

    async fn commit(&mut self) -> Result<QueryResponse> {
        self.ensure_active()?;
        match self.conn.query("COMMIT TRANSACTION;", BTreeMap::new()).await {
            Ok(response) => {
                self.state = TransactionState::Committed;
                self.conn.end_tx();
                Ok(response)
            }
            Err(e) => {
                let rollback = match self.conn.query("CANCEL TRANSACTION;", BTreeMap::new()).await {
                    Ok(_) => RollbackStatus::Succeeded,
                    Err(_) => RollbackStatus::Failed,
                };
                self.state = TransactionState::RolledBack;
                self.conn.end_tx();
                Err(Error::transaction(format!("commit failed: {e}"), rollback))
            }
        }
    }

    async fn rollback(&mut self) -> Result<()> {
        if self.state != TransactionState::Active {
            return Ok(());
        }
        // Best effort; a failed cancel is logged, not raised.
        if let Err(e) = self.conn.query("CANCEL TRANSACTION;", BTreeMap::new()).await {
            warn!("rollback failed: {e}");
        }
        self.state = TransactionState::RolledBack;
        self.conn.end_tx();
        Ok(())
    }

    fn state(&self) -> TransactionState { self.state }

    async fn query(&mut self, sql: &str, vars: BTreeMap<String, Value>) -> Result<QueryResponse> {
        self.ensure_active()?;
        self.conn.query(sql, vars).await
    }

    async fn create(&mut self, thing: &str, data: BTreeMap<String, Value>) -> Result<RecordResponse> {
        self.ensure_active()?;
        self.conn.create(thing, Value::Object(data)).await
    }

    async fn insert(&mut self, table: &str, rows: Vec<BTreeMap<String, Value>>) -> Result<RecordsResponse> {
        self.ensure_active()?;
        let rows = rows.into_iter().map(Value::Object).collect();
        self.conn.insert(table, Value::Array(rows)).await
    }

    async fn update(&mut self, thing: &str, data: BTreeMap<String, Value>) -> Result<RecordsResponse> {
        self.ensure_active()?;
        self.conn.update(thing, Value::Object(data)).await
    }

    async fn merge(&mut self, thing: &str, data: BTreeMap<String, Value>) -> Result<RecordsResponse> {
        self.ensure_active()?;
        self.conn.merge(thing, Value::Object(data)).await
    }

    async fn delete(&mut self, thing: &str) -> Result<DeleteResponse> {
        self.ensure_active()?;
        self.conn.delete(thing).await
    }

    async fn relate(
        &mut self,
        from: &str,
        relation: &str,
        to: &str,
        data: Option<BTreeMap<String, Value>>,
    ) -> Result<RecordResponse> {
        self.ensure_active()?;
        self.conn.relate(from, relation, to, data.map(Value::Object)).await
    }
}

impl Drop for InteractiveTransaction {
    fn drop(&mut self) {
        if self.state == TransactionState::Active {
            self.conn.end_tx();
            let conn = self.conn.clone();
            // Drop cannot await; hand the cancel to the runtime if one is
            // still around.
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = conn.query("CANCEL TRANSACTION;", BTreeMap::new()).await;
                });
            }
        }
    }
}
