//! Bounded connection pool.
//!
//! A counting semaphore caps concurrent acquisitions at the pool size; the
//! idle deque and in-use set live under one mutex that is never held across
//! I/O. Permits are tied to the RAII guard, so they cannot leak on error
//! paths.

use std::collections::{BTreeMap, VecDeque};
use std::ops::Deref;
use std::sync::{Arc, Mutex as StdMutex};

use surrealix_proto::{DeleteResponse, QueryResponse, RecordResponse, RecordsResponse, Value};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::config::{ConnectionConfig, ConnectionKind};
use crate::connection::{Credentials, HttpConnection, Surreal, WebsocketConnection};
use crate::error::{Error, Result};

/// Construct the transport matching the config's URL scheme.
pub fn create_connection(config: &ConnectionConfig) -> Arc<dyn Surreal> {
    match config.kind() {
        ConnectionKind::Http => Arc::new(HttpConnection::new(config)),
        ConnectionKind::Websocket => Arc::new(WebsocketConnection::new(config)),
    }
}

struct PoolState {
    idle: VecDeque<Arc<dyn Surreal>>,
    in_use: Vec<Arc<dyn Surreal>>,
    closed: bool,
}

struct PoolInner {
    config: ConnectionConfig,
    size: usize,
    semaphore: Arc<Semaphore>,
    state: StdMutex<PoolState>,
    credentials: StdMutex<Option<(String, String)>>,
}

/// A bounded set of reusable connections. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(config: ConnectionConfig, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::Validation(format!("pool size must be > 0, got {size}")));
        }
        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                size,
                semaphore: Arc::new(Semaphore::new(size)),
                state: StdMutex::new(PoolState { idle: VecDeque::new(), in_use: Vec::new(), closed: false }),
                credentials: StdMutex::new(None),
            }),
        })
    }

    /// Acquire a connection, waiting on the semaphore when the pool is at
    /// capacity. Dead idle connections are closed and discarded; a new
    /// connection is constructed only when no healthy idle one exists.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        if self.inner.state.lock().unwrap().closed {
            return Err(Error::connection("pool is closed"));
        }

        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::connection("pool is closed"))?;

        loop {
            let candidate = {
                let mut state = self.inner.state.lock().unwrap();
                if state.closed {
                    return Err(Error::connection("pool is closed"));
                }
                state.idle.pop_front()
            };

            match candidate {
                Some(conn) if conn.session().is_connected() => {
                    self.inner.state.lock().unwrap().in_use.push(conn.clone());
                    return Ok(PooledConnection { conn: Some(conn), pool: self.inner.clone(), _permit: permit });
                }
                Some(conn) => {
                    debug!("discarding dead pooled connection");
                    let _ = conn.close().await;
                }
                None => break,
            }
        }

        // Nothing idle; the held permit guarantees capacity for a new one.
        let conn = create_connection(&self.inner.config);
        self.init_connection(&conn).await?;
        self.inner.state.lock().unwrap().in_use.push(conn.clone());
        Ok(PooledConnection { conn: Some(conn), pool: self.inner.clone(), _permit: permit })
    }

    async fn init_connection(&self, conn: &Arc<dyn Surreal>) -> Result<()> {
        conn.connect().await?;
        let (user, password) = self
            .inner
            .credentials
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| (self.inner.config.user.clone(), self.inner.config.password.clone()));
        if !user.is_empty() {
            conn.signin(Credentials::root(user, password)).await?;
        }
        Ok(())
    }

    /// Update the credentials used for new connections and opportunistically
    /// re-authenticate idle ones. In-use connections are left alone.
    pub async fn set_credentials(&self, user: impl Into<String>, password: impl Into<String>) {
        let (user, password) = (user.into(), password.into());
        *self.inner.credentials.lock().unwrap() = Some((user.clone(), password.clone()));

        let idle: Vec<Arc<dyn Surreal>> = self.inner.state.lock().unwrap().idle.iter().cloned().collect();
        for conn in idle {
            if let Err(e) = conn.signin(Credentials::root(user.clone(), password.clone())).await {
                warn!("re-authentication of idle connection failed: {e}");
            }
        }
    }

    /// Close every connection, idle and in-use.
    pub async fn close(&self) {
        let connections: Vec<Arc<dyn Surreal>> = {
            let mut state = self.inner.state.lock().unwrap();
            state.closed = true;
            let mut connections: Vec<Arc<dyn Surreal>> = state.idle.drain(..).collect();
            connections.extend(state.in_use.drain(..));
            connections
        };
        for conn in connections {
            if let Err(e) = conn.close().await {
                warn!("error closing pooled connection: {e}");
            }
        }
        self.inner.semaphore.close();
    }

    pub fn available(&self) -> usize { self.inner.state.lock().unwrap().idle.len() }

    pub fn in_use(&self) -> usize { self.inner.state.lock().unwrap().in_use.len() }

    pub fn total(&self) -> usize {
        let state = self.inner.state.lock().unwrap();
        state.idle.len() + state.in_use.len()
    }

    pub fn size(&self) -> usize { self.inner.size }

    // Convenience operations that acquire internally.

    pub async fn query(&self, sql: &str, vars: BTreeMap<String, Value>) -> Result<QueryResponse> {
        self.acquire().await?.query(sql, vars).await
    }

    pub async fn select(&self, thing: &str) -> Result<RecordsResponse> { self.acquire().await?.select(thing).await }

    pub async fn create(&self, thing: &str, data: Value) -> Result<RecordResponse> {
        self.acquire().await?.create(thing, data).await
    }

    pub async fn update(&self, thing: &str, data: Value) -> Result<RecordsResponse> {
        self.acquire().await?.update(thing, data).await
    }

    pub async fn merge(&self, thing: &str, data: Value) -> Result<RecordsResponse> {
        self.acquire().await?.merge(thing, data).await
    }

    pub async fn delete(&self, thing: &str) -> Result<DeleteResponse> { self.acquire().await?.delete(thing).await }
}

/// RAII acquisition guard. Dropping it returns a healthy connection to the
/// idle deque (or closes an unhealthy one) and releases the permit.
pub struct PooledConnection {
    conn: Option<Arc<dyn Surreal>>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection").field("conn", &self.conn.is_some()).finish()
    }
}

impl PooledConnection {
    pub fn connection(&self) -> Arc<dyn Surreal> { self.conn.as_ref().expect("guard not yet dropped").clone() }
}

impl Deref for PooledConnection {
    type Target = dyn Surreal;

    fn deref(&self) -> &Self::Target { self.conn.as_ref().expect("guard not yet dropped").as_ref() }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else { return };
        let mut state = self.pool.state.lock().unwrap();
        state.in_use.retain(|c| !Arc::ptr_eq(c, &conn));
        if !state.closed && conn.session().is_connected() {
            state.idle.push_back(conn);
        } else {
            drop(state);
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = conn.close().await;
                });
            }
        }
    }
}
