use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::connection::WebsocketConnection;
use crate::error::Result;
use crate::live::{LiveChange, LiveSubscriptionParams};

struct ManagedStream {
    id_cell: Arc<StdMutex<Option<Uuid>>>,
    forwarder: JoinHandle<()>,
}

/// Owns many callback subscriptions on one stateful connection.
///
/// Streams are keyed by the uuid they were created under; lookups keep
/// working after reconnects because each entry tracks its current uuid.
pub struct LiveManager {
    conn: WebsocketConnection,
    streams: StdMutex<HashMap<Uuid, ManagedStream>>,
}

impl LiveManager {
    pub fn new(conn: WebsocketConnection) -> Self { Self { conn, streams: StdMutex::new(HashMap::new()) } }

    /// Start watching; `callback` fires once per change, off the reader task.
    pub async fn watch<F>(&self, params: LiveSubscriptionParams, callback: F) -> Result<Uuid>
    where
        F: Fn(LiveChange) + Send + Sync + 'static,
    {
        let (live_id, mut receiver, id_cell) = self.conn.register_live(params).await?;
        let forwarder = tokio::spawn(async move {
            while let Some(notification) = receiver.recv().await {
                callback(LiveChange::from_notification(notification));
            }
        });
        self.streams.lock().unwrap().insert(live_id, ManagedStream { id_cell, forwarder });
        Ok(live_id)
    }

    /// Stop one subscription. Unknown ids are a no-op.
    pub async fn stop(&self, live_id: Uuid) -> Result<()> {
        let entry = self.streams.lock().unwrap().remove(&live_id);
        if let Some(stream) = entry {
            self.stop_entry(stream).await;
        }
        Ok(())
    }

    /// Stop everything. An individual stop failure never prevents the rest
    /// from being stopped.
    pub async fn stop_all(&self) {
        let entries: Vec<ManagedStream> =
            self.streams.lock().unwrap().drain().map(|(_, stream)| stream).collect();
        for stream in entries {
            self.stop_entry(stream).await;
        }
    }

    async fn stop_entry(&self, stream: ManagedStream) {
        stream.forwarder.abort();
        let current = stream.id_cell.lock().unwrap().take();
        if let Some(current) = current {
            if let Err(e) = self.conn.kill(current).await {
                warn!(live_id = %current, "kill failed while stopping managed stream: {e}");
                self.conn.unregister_live(current);
            }
        }
    }

    pub fn active_ids(&self) -> Vec<Uuid> { self.streams.lock().unwrap().keys().copied().collect() }

    pub fn count(&self) -> usize { self.streams.lock().unwrap().len() }
}
