//! Stateful duplex transport.
//!
//! One reader task demultiplexes every incoming frame: responses are matched
//! to pending requests by id, action-bearing frames are routed to live
//! subscriptions by server uuid, anything else is discarded. Request ids are
//! a strictly increasing u64 counter and never collide with the uuid
//! namespace of notifications.
//!
//! When the reader exits for any reason other than an explicit close, a
//! reconnect loop re-opens the channel, re-authenticates with the retained
//! token, re-selects namespace/database, and resubscribes every live query.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use surrealix_proto::codec::{binary, text};
use surrealix_proto::{CodecError, LiveNotification, Payload, Protocol, RpcRequest, RpcResponse, ServerMessage, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{ConnectionConfig, ConnectionKind};
use crate::connection::{Connection, Session, Surreal};
use crate::error::{Error, Result};
use crate::functions::FunctionNamespace;
use crate::live::{LiveChange, LiveStreamBuilder, LiveSubscriptionParams};
use crate::transaction::InteractiveTransaction;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Connection lifecycle, observable through [`WebsocketConnection::state`].
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Reconnection gave up; pending requests failed and subscriptions ended.
    Failed,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

pub(crate) struct LiveEntry {
    pub(crate) sender: mpsc::UnboundedSender<LiveNotification>,
    pub(crate) params: LiveSubscriptionParams,
    /// The subscription's current server uuid, shared with its consumer so
    /// the swap on resubscribe is visible to `stop()`.
    pub(crate) id_cell: Arc<StdMutex<Option<Uuid>>>,
}

struct Inner {
    url: String,
    protocol: Protocol,
    timeout: Duration,
    auto_reconnect: bool,
    reconnect_interval: Duration,
    max_reconnect_attempts: u32,
    session: Session,
    next_id: AtomicU64,
    pending: StdMutex<HashMap<u64, oneshot::Sender<RpcResponse>>>,
    subscriptions: StdMutex<HashMap<Uuid, LiveEntry>>,
    sink: Mutex<Option<WsSink>>,
    state: watch::Sender<ConnectionState>,
    closing: AtomicBool,
    tx_active: AtomicBool,
    reader: StdMutex<Option<JoinHandle<()>>>,
    reconnector: StdMutex<Option<JoinHandle<()>>>,
    forwarders: StdMutex<Vec<JoinHandle<()>>>,
}

/// Stateful WebSocket connection. Cheap to clone; clones share the socket,
/// the session, and all subscriptions.
#[derive(Clone)]
pub struct WebsocketConnection {
    inner: Arc<Inner>,
}

impl WebsocketConnection {
    pub fn new(config: &ConnectionConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                url: Self::normalize_url(&config.url),
                protocol: config.protocol,
                timeout: config.timeout,
                auto_reconnect: config.auto_reconnect,
                reconnect_interval: config.reconnect_interval,
                max_reconnect_attempts: config.max_reconnect_attempts,
                session: Session::new(&config.namespace, &config.database),
                next_id: AtomicU64::new(0),
                pending: StdMutex::new(HashMap::new()),
                subscriptions: StdMutex::new(HashMap::new()),
                sink: Mutex::new(None),
                state,
                closing: AtomicBool::new(false),
                tx_active: AtomicBool::new(false),
                reader: StdMutex::new(None),
                reconnector: StdMutex::new(None),
                forwarders: StdMutex::new(Vec::new()),
            }),
        }
    }

    fn normalize_url(url: &str) -> String {
        let url = match url {
            u if u.starts_with("http://") => format!("ws://{}", &u[7..]),
            u if u.starts_with("https://") => format!("wss://{}", &u[8..]),
            u if u.starts_with("ws://") || u.starts_with("wss://") => u.to_owned(),
            u => format!("ws://{u}"),
        };
        let url = url.trim_end_matches('/');
        if url.ends_with("/rpc") {
            url.to_owned()
        } else {
            format!("{url}/rpc")
        }
    }

    /// Observe connection state transitions.
    pub fn state(&self) -> watch::Receiver<ConnectionState> { self.inner.state.subscribe() }

    /// Wait until the connection is usable, or fail on a terminal state.
    pub async fn wait_connected(&self) -> Result<()> {
        let mut rx = self.state();
        loop {
            match &*rx.borrow() {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Failed => return Err(Error::connection("reconnection failed permanently")),
                ConnectionState::Closed => return Err(Error::connection("connection closed")),
                _ => {}
            }
            if rx.changed().await.is_err() {
                return Err(Error::connection("connection dropped"));
            }
        }
    }

    fn next_request_id(&self) -> u64 { self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1 }

    /// Open the socket, negotiate the subprotocol, and start the reader.
    fn open_socket(inner: &Arc<Inner>) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + '_>> {
        Box::pin(Self::open_socket_inner(inner))
    }

    async fn open_socket_inner(inner: &Arc<Inner>) -> Result<()> {
        let mut request = inner
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::connection(format!("invalid url {}: {e}", inner.url)))?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(inner.protocol.subprotocol()),
        );

        let (ws, _) = connect_async(request)
            .await
            .map_err(|e| Error::connection(format!("websocket connection failed: {e}")))?;
        debug!(url = %inner.url, protocol = %inner.protocol, "websocket handshake completed");

        let (sink, stream) = ws.split();
        *inner.sink.lock().await = Some(sink);

        let reader = tokio::spawn(Self::read_loop(inner.clone(), stream));
        if let Some(old) = inner.reader.lock().unwrap().replace(reader) {
            old.abort();
        }

        inner.session.set_connected(true);

        // Yield so the reader is live before the first write.
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn read_loop(inner: Arc<Inner>, mut stream: WsStream) {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Binary(data)) => Self::handle_frame(&inner, binary::decode(&data)),
                Ok(Message::Text(data)) => Self::handle_frame(&inner, text::decode(data.as_str())),
                Ok(Message::Ping(data)) => {
                    if let Some(sink) = inner.sink.lock().await.as_mut() {
                        if let Err(e) = sink.send(Message::Pong(data)).await {
                            warn!("failed to send pong: {e}");
                            break;
                        }
                    }
                }
                Ok(Message::Close(_)) => {
                    info!("websocket closed by server");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("websocket read error: {e}");
                    break;
                }
            }
        }

        if inner.closing.load(Ordering::Acquire) {
            return;
        }

        // Abnormal exit: everything in flight fails, then reconnect if
        // configured.
        inner.session.set_connected(false);
        Self::fail_pending(&inner);

        if inner.auto_reconnect {
            // A reader spawned by a half-successful reconnect attempt may
            // also exit here; the running reconnect loop keeps ownership.
            let mut reconnector = inner.reconnector.lock().unwrap();
            let already_running = reconnector.as_ref().map(|task| !task.is_finished()).unwrap_or(false);
            if !already_running {
                *reconnector = Some(tokio::spawn(Self::reconnect_loop(inner.clone())));
            }
        } else {
            inner.state.send_replace(ConnectionState::Disconnected);
            Self::end_subscriptions(&inner);
        }
    }

    fn handle_frame(inner: &Arc<Inner>, decoded: std::result::Result<Value, CodecError>) {
        let value = match decoded {
            Ok(value) => value,
            Err(e) => {
                warn!("discarding undecodable frame: {e}");
                return;
            }
        };

        match ServerMessage::classify(value) {
            ServerMessage::Response(response) => {
                let completion = inner.pending.lock().unwrap().remove(&response.id);
                match completion {
                    // A completion dropped by a cancelled caller is fine.
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => debug!(id = response.id, "discarding response with no pending request"),
                }
            }
            ServerMessage::Notification(notification) => {
                let id = notification.id;
                let sender = inner.subscriptions.lock().unwrap().get(&id).map(|entry| entry.sender.clone());
                match sender {
                    Some(sender) => {
                        if sender.send(notification).is_err() {
                            // Consumer is gone; drop the dispatch entry.
                            inner.subscriptions.lock().unwrap().remove(&id);
                        }
                    }
                    None => debug!(%id, "discarding notification for unknown subscription"),
                }
            }
            ServerMessage::Ignored => debug!("discarding frame with unknown shape"),
        }
    }

    async fn reconnect_loop(inner: Arc<Inner>) {
        for attempt in 1..=inner.max_reconnect_attempts {
            if inner.closing.load(Ordering::Acquire) {
                return;
            }
            inner.state.send_replace(ConnectionState::Reconnecting { attempt });
            sleep(inner.reconnect_interval).await;

            match Self::reopen(&inner).await {
                Ok(()) => {
                    info!(attempt, "reconnected");
                    inner.state.send_replace(ConnectionState::Connected);
                    Self::resubscribe_all(&inner).await;
                    return;
                }
                Err(e) => {
                    warn!(attempt, "reconnect attempt failed: {e}");
                    inner.session.set_connected(false);
                }
            }
        }

        error!(attempts = inner.max_reconnect_attempts, "giving up on reconnection");
        inner.state.send_replace(ConnectionState::Failed);
        Self::fail_pending(&inner);
        Self::end_subscriptions(&inner);
    }

    /// One reconnect attempt: reopen, re-authenticate with the retained
    /// token, and re-select namespace/database.
    async fn reopen(inner: &Arc<Inner>) -> Result<()> {
        Self::open_socket(inner).await?;

        let conn = WebsocketConnection { inner: inner.clone() };
        if let Some(token) = inner.session.token().filter(|t| !t.is_empty()) {
            // Raw RPC rather than `authenticate`: the retained token must
            // survive a failed attempt so the next one can retry it.
            conn.rpc(surrealix_proto::rpc::method::AUTHENTICATE, vec![Value::Strand(token)])
                .await
                .map_err(|e| Error::Authentication(format!("re-authentication failed: {e}")))?;
        }
        let (ns, db) = (inner.session.namespace(), inner.session.database());
        conn.send_use(&ns, &db).await?;
        Ok(())
    }

    /// Re-establish every live subscription. A stream whose resubscription
    /// fails receives end-of-stream; the others continue.
    async fn resubscribe_all(inner: &Arc<Inner>) {
        let old: Vec<(Uuid, LiveEntry)> = inner.subscriptions.lock().unwrap().drain().collect();
        if old.is_empty() {
            return;
        }

        let conn = WebsocketConnection { inner: inner.clone() };
        for (old_id, entry) in old {
            match conn.start_live_query(&entry.params).await {
                Ok(new_id) => {
                    *entry.id_cell.lock().unwrap() = Some(new_id);
                    if let Some(hook) = entry.params.on_reconnect.clone() {
                        hook(old_id, new_id);
                    }
                    inner.subscriptions.lock().unwrap().insert(new_id, entry);
                    info!(%old_id, %new_id, "live query resubscribed");
                }
                Err(e) => {
                    warn!(%old_id, "resubscribe failed, ending stream: {e}");
                    // Dropping the entry drops its sender; the consumer sees
                    // end-of-stream.
                }
            }
        }
    }

    /// All outstanding completions resolve with a connection-closed error
    /// (the oneshot sender is dropped; callers map the recv failure).
    fn fail_pending(inner: &Arc<Inner>) {
        let pending: Vec<_> = inner.pending.lock().unwrap().drain().collect();
        if !pending.is_empty() {
            debug!(count = pending.len(), "failing pending requests");
        }
    }

    fn end_subscriptions(inner: &Arc<Inner>) {
        inner.subscriptions.lock().unwrap().clear();
        for task in inner.forwarders.lock().unwrap().drain(..) {
            task.abort();
        }
    }

    /// Issue the LIVE SELECT and extract the server-assigned uuid.
    pub(crate) async fn start_live_query(&self, params: &LiveSubscriptionParams) -> Result<Uuid> {
        let sql = params.to_sql();
        let response = self
            .query(&sql, BTreeMap::new())
            .await
            .map_err(|e| Error::LiveQuery(format!("failed to start live query: {e}")))?;

        let result = response
            .first_result()
            .ok_or_else(|| Error::LiveQuery("no live query id returned".to_owned()))?;
        if !result.is_ok() {
            return Err(Error::LiveQuery(format!("live query rejected: {:?}", result.result)));
        }
        result.result.as_uuid().ok_or_else(|| Error::LiveQuery("invalid live query response".to_owned()))
    }

    /// Start a live query and register a queue sink for its notifications.
    /// Returns the server uuid, the notification receiver, and the shared
    /// cell tracking the current uuid across reconnects.
    pub(crate) async fn register_live(
        &self,
        params: LiveSubscriptionParams,
    ) -> Result<(Uuid, mpsc::UnboundedReceiver<LiveNotification>, Arc<StdMutex<Option<Uuid>>>)> {
        let live_id = self.start_live_query(&params).await?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let id_cell = Arc::new(StdMutex::new(Some(live_id)));
        let entry = LiveEntry { sender, params, id_cell: id_cell.clone() };
        self.inner.subscriptions.lock().unwrap().insert(live_id, entry);
        Ok((live_id, receiver, id_cell))
    }

    /// Callback flavour: a forwarder task drains the subscription queue and
    /// invokes `callback` per change, so a slow consumer never stalls the
    /// reader.
    pub async fn live<F>(&self, table: &str, diff: bool, callback: F) -> Result<Uuid>
    where
        F: Fn(LiveChange) + Send + Sync + 'static,
    {
        let mut params = LiveSubscriptionParams::new(table);
        params.diff = diff;
        let (live_id, mut receiver, _id_cell) = self.register_live(params).await?;

        let forwarder = tokio::spawn(async move {
            while let Some(notification) = receiver.recv().await {
                callback(LiveChange::from_notification(notification));
            }
        });
        self.inner.forwarders.lock().unwrap().push(forwarder);
        Ok(live_id)
    }

    /// Async-iterator flavour; see [`LiveStreamBuilder`].
    pub fn live_select(&self, table: &str) -> LiveStreamBuilder { LiveStreamBuilder::new(self.clone(), table) }

    /// Stop a live query server-side and unregister its dispatch entry.
    pub async fn kill(&self, live_id: Uuid) -> Result<()> {
        self.rpc(surrealix_proto::rpc::method::KILL, vec![Value::Uuid(live_id)]).await?;
        self.inner.subscriptions.lock().unwrap().remove(&live_id);
        Ok(())
    }

    /// Stop every live query, tolerating individual kill failures.
    pub async fn kill_all(&self) {
        for live_id in self.live_ids() {
            if let Err(e) = self.kill(live_id).await {
                warn!(%live_id, "kill failed: {e}");
                self.inner.subscriptions.lock().unwrap().remove(&live_id);
            }
        }
    }

    pub fn live_ids(&self) -> Vec<Uuid> { self.inner.subscriptions.lock().unwrap().keys().copied().collect() }

    pub(crate) fn unregister_live(&self, live_id: Uuid) {
        self.inner.subscriptions.lock().unwrap().remove(&live_id);
    }

    /// Set a session variable scoped to this connection.
    pub async fn let_var(&self, name: &str, value: Value) -> Result<()> {
        self.rpc(surrealix_proto::rpc::method::LET, vec![Value::Strand(name.to_owned()), value]).await?;
        Ok(())
    }

    /// Clear a session variable.
    pub async fn unset_var(&self, name: &str) -> Result<()> {
        self.rpc(surrealix_proto::rpc::method::UNSET, vec![Value::Strand(name.to_owned())]).await?;
        Ok(())
    }

    /// Server-stateful transaction using BEGIN/COMMIT/CANCEL round-trips.
    pub fn transaction(&self) -> InteractiveTransaction { InteractiveTransaction::new(Arc::new(self.clone())) }

    /// Entry point to the function-call facade.
    pub fn fn_(&self) -> FunctionNamespace<'_> { FunctionNamespace::new(self) }
}

#[async_trait]
impl Connection for WebsocketConnection {
    async fn connect(&self) -> Result<()> {
        if self.inner.session.is_connected() {
            return Ok(());
        }
        self.inner.closing.store(false, Ordering::Release);
        self.inner.state.send_replace(ConnectionState::Connecting);

        if let Err(e) = Self::open_socket(&self.inner).await {
            self.inner.state.send_replace(ConnectionState::Disconnected);
            return Err(e);
        }

        let (ns, db) = (self.inner.session.namespace(), self.inner.session.database());
        if let Err(e) = self.send_use(&ns, &db).await {
            let _ = self.close().await;
            return Err(Error::connection(format!("namespace selection failed: {e}")));
        }

        self.inner.state.send_replace(ConnectionState::Connected);
        info!(url = %self.inner.url, "websocket connection established");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // Safe to call multiple times.
        self.inner.closing.store(true, Ordering::Release);
        self.inner.session.set_connected(false);
        self.inner.session.set_token(None);

        if let Some(task) = self.inner.reconnector.lock().unwrap().take() {
            task.abort();
        }
        if let Some(task) = self.inner.reader.lock().unwrap().take() {
            task.abort();
        }

        Self::fail_pending(&self.inner);
        Self::end_subscriptions(&self.inner);

        if let Some(mut sink) = self.inner.sink.lock().await.take() {
            let _ = sink.close().await;
        }

        self.inner.state.send_replace(ConnectionState::Closed);
        Ok(())
    }

    async fn send_rpc(&self, mut request: RpcRequest) -> Result<RpcResponse> {
        if self.inner.closing.load(Ordering::Acquire) || !self.inner.session.is_connected() {
            return Err(Error::connection("not connected, call connect() first"));
        }

        let id = self.next_request_id();
        request.id = id;

        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().unwrap().insert(id, tx);

        let send_result: Result<()> = async {
            let payload = request.encode(self.inner.protocol)?;
            let message = match payload {
                Payload::Binary(bytes) => Message::Binary(bytes.into()),
                Payload::Text(text) => Message::Text(text.into()),
            };
            let mut guard = self.inner.sink.lock().await;
            match guard.as_mut() {
                Some(sink) => {
                    sink.send(message).await.map_err(|e| Error::connection(format!("send failed: {e}")))
                }
                None => Err(Error::connection("connection closed")),
            }
        }
        .await;

        if let Err(e) = send_result {
            self.inner.pending.lock().unwrap().remove(&id);
            return Err(e);
        }

        match timeout(self.inner.timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            // Sender dropped: the connection went away under us.
            Ok(Err(_)) => Err(Error::connection("connection closed while awaiting response")),
            Err(_) => {
                self.inner.pending.lock().unwrap().remove(&id);
                Err(Error::Timeout(self.inner.timeout))
            }
        }
    }

    fn session(&self) -> &Session { &self.inner.session }

    fn kind(&self) -> ConnectionKind { ConnectionKind::Websocket }

    fn try_begin_tx(&self) -> bool {
        self.inner.tx_active.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    fn end_tx(&self) { self.inner.tx_active.store(false, Ordering::Release) }
}

#[async_trait]
impl Surreal for WebsocketConnection {}
