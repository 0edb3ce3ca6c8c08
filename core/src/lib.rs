pub mod changefeed;
pub mod config;
pub mod connection;
pub mod error;
pub mod functions;
pub mod live;
pub mod pool;
pub mod registry;
pub mod transaction;

pub use surrealix_proto as proto;

pub use changefeed::{ChangeEntry, ChangeFeedStream, MultiTableChangeFeed, TableChange};
pub use config::{ConnectionConfig, ConnectionKind};
pub use connection::{
    Connection, ConnectionState, Credentials, HttpConnection, Session, Surreal, WebsocketConnection,
};
pub use error::{Error, Result, RollbackStatus};
pub use functions::{FunctionCall, FunctionNamespace};
pub use live::{LiveAction, LiveChange, LiveManager, LiveStream, LiveStreamBuilder, LiveSubscriptionParams};
pub use pool::{ConnectionPool, PooledConnection};
pub use registry::{Registry, DEFAULT_CONNECTION};
pub use transaction::{
    transaction_for, BatchedTransaction, InteractiveTransaction, Transaction, TransactionState,
};
