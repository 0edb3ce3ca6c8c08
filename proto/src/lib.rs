pub mod codec;
pub mod convert;
pub mod error;
pub mod record_id;
pub mod response;
pub mod rpc;
pub mod value;

pub use codec::{Payload, Protocol};
pub use convert::{from_value, to_value};
pub use error::CodecError;
pub use record_id::{Duration, RecordId, RecordKey, Table};
pub use response::{
    AuthResponse, DeleteResponse, InfoResponse, QueryResponse, QueryResult, RecordResponse, RecordsResponse,
    ResponseStatus,
};
pub use rpc::{LiveNotification, RpcError, RpcRequest, RpcResponse, ServerMessage};
pub use value::Value;
