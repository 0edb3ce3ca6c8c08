use std::time::Duration;

use surrealix_proto::Protocol;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Immutable connection settings. Identity is the name under which a config
/// is stored in the registry; the struct itself is never mutated after
/// construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    pub url: String,
    pub user: String,
    pub password: String,
    pub namespace: String,
    pub database: String,
    pub protocol: Protocol,
    /// Per-call deadline for every RPC.
    pub timeout: Duration,
    pub auto_reconnect: bool,
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
}

impl ConnectionConfig {
    pub fn new(
        url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        namespace: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            user: user.into(),
            password: password.into(),
            namespace: namespace.into(),
            database: database.into(),
            protocol: Protocol::default(),
            timeout: DEFAULT_TIMEOUT,
            auto_reconnect: true,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, interval: Duration, max_attempts: u32) -> Self {
        self.reconnect_interval = interval;
        self.max_reconnect_attempts = max_attempts;
        self
    }

    pub fn without_reconnect(mut self) -> Self {
        self.auto_reconnect = false;
        self
    }

    /// Transport kind implied by the URL scheme.
    pub fn kind(&self) -> ConnectionKind { ConnectionKind::from_url(&self.url) }
}

/// Which transport a URL selects: `ws(s)://` is the stateful duplex channel,
/// anything else the stateless request/response one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    Http,
    Websocket,
}

impl ConnectionKind {
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("ws://") || url.starts_with("wss://") {
            ConnectionKind::Websocket
        } else {
            ConnectionKind::Http
        }
    }
}
