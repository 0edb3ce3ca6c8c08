//! # Surrealix
//!
//! A client runtime for SurrealDB. Two transports speak the same RPC
//! protocol: a stateless HTTP connection for one-shot exchanges and a
//! stateful WebSocket connection for sessions, live queries, and
//! interactive transactions. On top sit a named-connection registry, a
//! bounded connection pool, batched and interactive transactions, live
//! subscription streams that survive reconnects, a cursored change-feed
//! streamer, and a typed function-call facade.
//!
//! ```ignore
//! use surrealix::{ConnectionConfig, Credentials, Surreal, WebsocketConnection};
//!
//! let config = ConnectionConfig::new("ws://localhost:8000", "root", "root", "app", "main");
//! let conn = WebsocketConnection::new(&config);
//! conn.connect().await?;
//! conn.signin(Credentials::root("root", "root")).await?;
//!
//! let mut stream = conn.live_select("players").start().await?;
//! while let Some(change) = stream.next().await {
//!     println!("{} {:?}", change.action, change.record_id);
//! }
//! ```

pub use surrealix_core::changefeed::{self, ChangeEntry, ChangeFeedStream, MultiTableChangeFeed, TableChange};
pub use surrealix_core::config::{ConnectionConfig, ConnectionKind};
pub use surrealix_core::connection::{
    Connection, ConnectionState, Credentials, HttpConnection, Session, Surreal, WebsocketConnection,
};
pub use surrealix_core::error::{Error, Result, RollbackStatus};
pub use surrealix_core::functions::{FunctionCall, FunctionNamespace};
pub use surrealix_core::live::{
    LiveAction, LiveChange, LiveManager, LiveStream, LiveStreamBuilder, LiveSubscriptionParams,
};
pub use surrealix_core::pool::{ConnectionPool, PooledConnection};
pub use surrealix_core::registry::{Registry, DEFAULT_CONNECTION};
pub use surrealix_core::transaction::{
    self, transaction_for, BatchedTransaction, InteractiveTransaction, Transaction, TransactionState,
};

pub use surrealix_proto as proto;
pub use surrealix_proto::{
    from_value, to_value, AuthResponse, DeleteResponse, Duration, InfoResponse, Protocol, QueryResponse,
    QueryResult, RecordId, RecordKey, RecordsResponse, RecordResponse, RpcError, RpcRequest, RpcResponse, Table,
    Value,
};
