use std::sync::{Arc, Mutex as StdMutex};

use surrealix_proto::{LiveNotification, Value};
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::connection::WebsocketConnection;
use crate::error::Result;
use crate::live::{LiveChange, LiveSubscriptionParams};

/// Builder for the async-iterator subscription flavour.
///
/// ```ignore
/// let mut stream = conn
///     .live_select("players")
///     .where_clause("table_id = $id")
///     .param("id", Value::record("game_tables", "xyz"))
///     .start()
///     .await?;
/// while let Some(change) = stream.next().await {
///     // ...
/// }
/// ```
pub struct LiveStreamBuilder {
    conn: WebsocketConnection,
    params: LiveSubscriptionParams,
}

impl LiveStreamBuilder {
    pub(crate) fn new(conn: WebsocketConnection, table: &str) -> Self {
        Self { conn, params: LiveSubscriptionParams::new(table) }
    }

    pub fn where_clause(mut self, clause: impl Into<String>) -> Self {
        self.params.where_clause = Some(clause.into());
        self
    }

    /// Bind a WHERE-clause parameter. The value is inlined into the query
    /// string before sending (see [`LiveSubscriptionParams::to_sql`]).
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.params.insert(key.into(), value.into());
        self
    }

    /// Receive JSON-Patch diffs instead of full records.
    pub fn diff(mut self) -> Self {
        self.params.diff = true;
        self
    }

    /// Hook invoked with `(old_uuid, new_uuid)` after an auto-resubscribe.
    pub fn on_reconnect(mut self, hook: impl Fn(Uuid, Uuid) + Send + Sync + 'static) -> Self {
        self.params.on_reconnect = Some(Arc::new(hook));
        self
    }

    pub async fn start(self) -> Result<LiveStream> {
        let (_live_id, receiver, id_cell) = self.conn.register_live(self.params).await?;
        Ok(LiveStream { conn: self.conn, receiver, id_cell, closed: false })
    }
}

/// An active subscription consumed as an async sequence of changes.
///
/// The subscription survives reconnects: the server-side uuid may change,
/// but this handle keeps delivering. `next` returns `None` once the stream
/// is stopped or resubscription fails permanently.
pub struct LiveStream {
    conn: WebsocketConnection,
    receiver: mpsc::UnboundedReceiver<LiveNotification>,
    id_cell: Arc<StdMutex<Option<Uuid>>>,
    closed: bool,
}

impl LiveStream {
    /// Current server-side uuid of this subscription.
    pub fn live_id(&self) -> Option<Uuid> { *self.id_cell.lock().unwrap() }

    pub fn is_active(&self) -> bool { !self.closed && self.live_id().is_some() }

    pub async fn next(&mut self) -> Option<LiveChange> {
        if self.closed {
            return None;
        }
        match self.receiver.recv().await {
            Some(notification) => Some(LiveChange::from_notification(notification)),
            None => {
                self.closed = true;
                None
            }
        }
    }

    /// Stop the subscription: best-effort server-side kill, unregister from
    /// the transport, end the iterator.
    pub async fn stop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let live_id = self.id_cell.lock().unwrap().take();
        if let Some(live_id) = live_id {
            if let Err(e) = self.conn.kill(live_id).await {
                warn!(%live_id, "kill failed while stopping stream: {e}");
                self.conn.unregister_live(live_id);
            }
        }
        self.receiver.close();
    }
}
