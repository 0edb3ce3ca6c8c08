//! Named connection registry.
//!
//! Stores immutable [`ConnectionConfig`]s by name and lazily constructs one
//! shared transport per name, letting different models and queries route to
//! different databases. The registry is an explicit dependency; a
//! process-wide instance is available through [`Registry::global`] as a
//! convenience facade.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, OnceLock};

use tracing::debug;

use crate::config::ConnectionConfig;
use crate::connection::{Credentials, Surreal};
use crate::error::{Error, Result};
use crate::pool::create_connection;

/// The ergonomic default connection name.
pub const DEFAULT_CONNECTION: &str = "default";

static GLOBAL: OnceLock<Registry> = OnceLock::new();

#[derive(Default)]
pub struct Registry {
    configs: StdMutex<HashMap<String, ConnectionConfig>>,
    connections: StdMutex<HashMap<String, Arc<dyn Surreal>>>,
}

impl Registry {
    pub fn new() -> Self { Self::default() }

    /// The process-wide registry.
    pub fn global() -> &'static Registry { GLOBAL.get_or_init(Registry::new) }

    /// Register a config under a name, replacing any previous one. A cached
    /// transport for that name is dropped and closed.
    pub fn add(&self, name: impl Into<String>, config: ConnectionConfig) {
        let name = name.into();
        self.configs.lock().unwrap().insert(name.clone(), config);
        if let Some(stale) = self.connections.lock().unwrap().remove(&name) {
            debug!(%name, "closing replaced registry connection");
            Self::close_detached(stale);
        }
    }

    /// Register the `"default"` connection.
    pub fn add_default(&self, config: ConnectionConfig) { self.add(DEFAULT_CONNECTION, config) }

    pub fn config(&self, name: &str) -> Option<ConnectionConfig> { self.configs.lock().unwrap().get(name).cloned() }

    pub fn names(&self) -> Vec<String> { self.configs.lock().unwrap().keys().cloned().collect() }

    /// Get (or lazily construct, connect, and authenticate) the shared
    /// transport for a name.
    pub async fn connection(&self, name: &str) -> Result<Arc<dyn Surreal>> {
        if let Some(existing) = self.connections.lock().unwrap().get(name) {
            if existing.session().is_connected() {
                return Ok(existing.clone());
            }
        }

        let config = self
            .config(name)
            .ok_or_else(|| Error::Validation(format!("no connection named {name:?} registered")))?;

        let conn = create_connection(&config);
        conn.connect().await?;
        if !config.user.is_empty() {
            conn.signin(Credentials::root(&config.user, &config.password)).await?;
        }

        let mut connections = self.connections.lock().unwrap();
        match connections.get(name) {
            // Another task connected concurrently; keep theirs.
            Some(existing) if existing.session().is_connected() => {
                let existing = existing.clone();
                drop(connections);
                Self::close_detached(conn);
                Ok(existing)
            }
            _ => {
                connections.insert(name.to_owned(), conn.clone());
                Ok(conn)
            }
        }
    }

    pub async fn default_connection(&self) -> Result<Arc<dyn Surreal>> { self.connection(DEFAULT_CONNECTION).await }

    /// Remove a named config and close its transport if one was built.
    pub async fn remove(&self, name: &str) {
        self.configs.lock().unwrap().remove(name);
        let conn = self.connections.lock().unwrap().remove(name);
        if let Some(conn) = conn {
            let _ = conn.close().await;
        }
    }

    /// Close every cached transport; configs stay registered.
    pub async fn close_all(&self) {
        let connections: Vec<Arc<dyn Surreal>> = self.connections.lock().unwrap().drain().map(|(_, c)| c).collect();
        for conn in connections {
            let _ = conn.close().await;
        }
    }

    fn close_detached(conn: Arc<dyn Surreal>) {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = conn.close().await;
            });
        }
    }
}
