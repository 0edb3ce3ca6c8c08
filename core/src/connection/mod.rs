pub mod http;
pub mod websocket;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use surrealix_proto::{
    from_value, AuthResponse, DeleteResponse, InfoResponse, QueryResponse, RecordResponse, RecordsResponse,
    RpcRequest, RpcResponse, Value,
};

use crate::config::ConnectionKind;
use crate::error::{Error, Result};

pub use http::HttpConnection;
pub use websocket::{ConnectionState, WebsocketConnection};

/// Session state shared by both transports: connection/auth flags, the
/// retained bearer token, and the selected namespace/database.
#[derive(Debug)]
pub struct Session {
    connected: AtomicBool,
    authenticated: AtomicBool,
    token: Mutex<Option<String>>,
    namespace: Mutex<String>,
    database: Mutex<String>,
}

impl Session {
    pub fn new(namespace: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            connected: AtomicBool::new(false),
            authenticated: AtomicBool::new(false),
            token: Mutex::new(None),
            namespace: Mutex::new(namespace.into()),
            database: Mutex::new(database.into()),
        }
    }

    pub fn is_connected(&self) -> bool { self.connected.load(Ordering::Acquire) }

    pub fn set_connected(&self, connected: bool) { self.connected.store(connected, Ordering::Release) }

    pub fn is_authenticated(&self) -> bool { self.authenticated.load(Ordering::Acquire) }

    pub fn token(&self) -> Option<String> { self.token.lock().unwrap().clone() }

    /// Setting a token marks the session authenticated; clearing it revokes.
    pub fn set_token(&self, token: Option<String>) {
        self.authenticated.store(token.is_some(), Ordering::Release);
        *self.token.lock().unwrap() = token;
    }

    pub fn namespace(&self) -> String { self.namespace.lock().unwrap().clone() }

    pub fn database(&self) -> String { self.database.lock().unwrap().clone() }

    pub fn set_ns_db(&self, namespace: &str, database: &str) {
        *self.namespace.lock().unwrap() = namespace.to_owned();
        *self.database.lock().unwrap() = database.to_owned();
    }
}

/// Signin credentials. Root/namespace/database auth uses `user`/`password`;
/// record access auth names an access method and carries arbitrary extra
/// fields (email, password, ...).
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub user: Option<String>,
    pub password: Option<String>,
    pub namespace: Option<String>,
    pub database: Option<String>,
    pub access: Option<String>,
    pub extra: BTreeMap<String, Value>,
}

impl Credentials {
    pub fn root(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self { user: Some(user.into()), password: Some(password.into()), ..Default::default() }
    }

    pub fn access(namespace: impl Into<String>, database: impl Into<String>, access: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            database: Some(database.into()),
            access: Some(access.into()),
            ..Default::default()
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Parameter object for the `signin`/`signup` RPC. The password travels
    /// under `pass` here; the HTTP signin endpoint differs (see
    /// [`Credentials::http_payload`]).
    pub fn rpc_params(&self) -> BTreeMap<String, Value> {
        let mut params = BTreeMap::new();
        if let Some(user) = &self.user {
            params.insert("user".to_owned(), Value::Strand(user.clone()));
        }
        if let Some(password) = &self.password {
            params.insert("pass".to_owned(), Value::Strand(password.clone()));
        }
        if let Some(ns) = &self.namespace {
            params.insert("ns".to_owned(), Value::Strand(ns.clone()));
        }
        if let Some(db) = &self.database {
            params.insert("db".to_owned(), Value::Strand(db.clone()));
        }
        if let Some(access) = &self.access {
            params.insert("ac".to_owned(), Value::Strand(access.clone()));
        }
        for (k, v) in &self.extra {
            params.insert(k.clone(), v.clone());
        }
        params
    }

    /// Payload for POST /signin. Access-method auth passes the password under
    /// the literal key `password`; root/ns/db auth under `pass`.
    pub fn http_payload(&self) -> BTreeMap<String, Value> {
        let mut payload = BTreeMap::new();
        if let Some(user) = &self.user {
            payload.insert("user".to_owned(), Value::Strand(user.clone()));
        }
        if let Some(ns) = &self.namespace {
            payload.insert("ns".to_owned(), Value::Strand(ns.clone()));
        }
        if let Some(db) = &self.database {
            payload.insert("db".to_owned(), Value::Strand(db.clone()));
        }
        match (&self.access, &self.password) {
            (Some(access), password) => {
                payload.insert("ac".to_owned(), Value::Strand(access.clone()));
                if let Some(password) = password {
                    payload.insert("password".to_owned(), Value::Strand(password.clone()));
                }
            }
            (None, Some(password)) => {
                payload.insert("pass".to_owned(), Value::Strand(password.clone()));
            }
            (None, None) => {}
        }
        for (k, v) in &self.extra {
            payload.insert(k.clone(), v.clone());
        }
        payload
    }
}

/// A transport endpoint. Implementations own the socket/client and the
/// request-id counter; everything above speaks [`Surreal`].
#[async_trait]
pub trait Connection: Send + Sync {
    async fn connect(&self) -> Result<()>;

    /// Idempotent. After close every operation fails with a connection error.
    async fn close(&self) -> Result<()>;

    /// Dispatch one request and await its matched response.
    async fn send_rpc(&self, request: RpcRequest) -> Result<RpcResponse>;

    fn session(&self) -> &Session;

    fn kind(&self) -> ConnectionKind;

    /// Claim the transport's single interactive-transaction slot. Stateless
    /// transports have no server-side transaction state and always permit.
    fn try_begin_tx(&self) -> bool { true }

    fn end_tx(&self) {}
}

/// High-level operation surface layered over any [`Connection`].
#[async_trait]
pub trait Surreal: Connection {
    /// Execute an RPC call, unwrapping the envelope into a result value or a
    /// query error.
    async fn rpc(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let response = self.send_rpc(RpcRequest::new(method, params)).await?;
        match response.error {
            Some(err) => Err(Error::query(err.message, Some(err.code))),
            None => Ok(response.result.unwrap_or(Value::None)),
        }
    }

    async fn signin(&self, credentials: Credentials) -> Result<AuthResponse> {
        let result = self
            .rpc(surrealix_proto::rpc::method::SIGNIN, vec![Value::Object(credentials.rpc_params())])
            .await
            .map_err(|e| Error::Authentication(format!("signin failed: {e}")))?;
        let response = AuthResponse::from_rpc_result(result);
        if response.token.is_some() {
            self.session().set_token(response.token.clone());
        } else if response.success {
            // Tokenless root signin still authenticates the session.
            self.session().set_token(Some(String::new()));
        }
        Ok(response)
    }

    async fn signup(&self, credentials: Credentials) -> Result<AuthResponse> {
        let result = self
            .rpc(surrealix_proto::rpc::method::SIGNUP, vec![Value::Object(credentials.rpc_params())])
            .await
            .map_err(|e| Error::Authentication(format!("signup failed: {e}")))?;
        let response = AuthResponse::from_rpc_result(result);
        if response.token.is_some() {
            self.session().set_token(response.token.clone());
        }
        Ok(response)
    }

    /// Validate an existing JWT and adopt its identity for this session.
    async fn authenticate(&self, token: &str) -> Result<AuthResponse> {
        match self.rpc(surrealix_proto::rpc::method::AUTHENTICATE, vec![Value::Strand(token.to_owned())]).await {
            Ok(_) => {
                self.session().set_token(Some(token.to_owned()));
                Ok(AuthResponse { token: Some(token.to_owned()), success: true })
            }
            Err(e) => {
                self.session().set_token(None);
                Err(Error::Authentication(format!("token authentication failed: {e}")))
            }
        }
    }

    async fn invalidate(&self) -> Result<()> {
        self.rpc(surrealix_proto::rpc::method::INVALIDATE, vec![]).await?;
        self.session().set_token(None);
        Ok(())
    }

    async fn use_ns_db(&self, namespace: &str, database: &str) -> Result<()> {
        self.send_use(namespace, database).await?;
        self.session().set_ns_db(namespace, database);
        Ok(())
    }

    async fn send_use(&self, namespace: &str, database: &str) -> Result<()> {
        self.rpc(
            surrealix_proto::rpc::method::USE,
            vec![Value::Strand(namespace.to_owned()), Value::Strand(database.to_owned())],
        )
        .await?;
        Ok(())
    }

    async fn info(&self) -> Result<InfoResponse> {
        Ok(InfoResponse::from_rpc_result(self.rpc(surrealix_proto::rpc::method::INFO, vec![]).await?))
    }

    async fn version(&self) -> Result<String> {
        let result = self.rpc(surrealix_proto::rpc::method::VERSION, vec![]).await?;
        Ok(result.as_str().unwrap_or_default().to_owned())
    }

    async fn ping(&self) -> bool { self.rpc(surrealix_proto::rpc::method::PING, vec![]).await.is_ok() }

    async fn query(&self, sql: &str, vars: BTreeMap<String, Value>) -> Result<QueryResponse> {
        let request = RpcRequest::query(sql, vars);
        let response = self.send_rpc(request).await?;
        match response.error {
            Some(err) => Err(Error::query_with_sql(err.message, Some(err.code), sql)),
            None => Ok(QueryResponse::from_rpc_result(response.result.unwrap_or(Value::None))),
        }
    }

    async fn select(&self, thing: &str) -> Result<RecordsResponse> {
        Ok(RecordsResponse::from_rpc_result(
            self.rpc(surrealix_proto::rpc::method::SELECT, vec![Value::Strand(thing.to_owned())]).await?,
        ))
    }

    async fn create(&self, thing: &str, data: Value) -> Result<RecordResponse> {
        Ok(RecordResponse::from_rpc_result(
            self.rpc(surrealix_proto::rpc::method::CREATE, vec![Value::Strand(thing.to_owned()), data]).await?,
        ))
    }

    async fn insert(&self, table: &str, data: Value) -> Result<RecordsResponse> {
        Ok(RecordsResponse::from_rpc_result(
            self.rpc(surrealix_proto::rpc::method::INSERT, vec![Value::Strand(table.to_owned()), data]).await?,
        ))
    }

    async fn update(&self, thing: &str, data: Value) -> Result<RecordsResponse> {
        Ok(RecordsResponse::from_rpc_result(
            self.rpc(surrealix_proto::rpc::method::UPDATE, vec![Value::Strand(thing.to_owned()), data]).await?,
        ))
    }

    /// Create-or-replace; the idempotent save operation.
    async fn upsert(&self, thing: &str, data: Value) -> Result<RecordsResponse> {
        Ok(RecordsResponse::from_rpc_result(
            self.rpc(surrealix_proto::rpc::method::UPSERT, vec![Value::Strand(thing.to_owned()), data]).await?,
        ))
    }

    async fn merge(&self, thing: &str, data: Value) -> Result<RecordsResponse> {
        Ok(RecordsResponse::from_rpc_result(
            self.rpc(surrealix_proto::rpc::method::MERGE, vec![Value::Strand(thing.to_owned()), data]).await?,
        ))
    }

    async fn patch(&self, thing: &str, patches: Vec<Value>) -> Result<RecordsResponse> {
        Ok(RecordsResponse::from_rpc_result(
            self.rpc(
                surrealix_proto::rpc::method::PATCH,
                vec![Value::Strand(thing.to_owned()), Value::Array(patches)],
            )
            .await?,
        ))
    }

    async fn delete(&self, thing: &str) -> Result<DeleteResponse> {
        Ok(DeleteResponse::from_rpc_result(
            self.rpc(surrealix_proto::rpc::method::DELETE, vec![Value::Strand(thing.to_owned())]).await?,
        ))
    }

    async fn relate(&self, from: &str, relation: &str, to: &str, data: Option<Value>) -> Result<RecordResponse> {
        let mut params =
            vec![Value::Strand(from.to_owned()), Value::Strand(relation.to_owned()), Value::Strand(to.to_owned())];
        if let Some(data) = data {
            params.push(data);
        }
        Ok(RecordResponse::from_rpc_result(self.rpc(surrealix_proto::rpc::method::RELATE, params).await?))
    }

    /// Call a database function by name, returning the raw scalar result.
    /// Bare names are treated as user-defined functions (`fn::` prefix).
    async fn call_value(&self, function: &str, params: BTreeMap<String, Value>) -> Result<Value> {
        let function = if function.contains("::") { function.to_owned() } else { format!("fn::{function}") };
        let placeholders: Vec<String> = params.keys().map(|k| format!("${k}")).collect();
        let sql = format!("RETURN {}({});", function, placeholders.join(", "));
        let response = self.query(&sql, params).await?;
        Ok(response.first_result().map(|r| r.result.clone()).unwrap_or(Value::None))
    }

    /// Typed function call: deserializes the result into `T`.
    async fn call<T>(&self, function: &str, params: BTreeMap<String, Value>) -> Result<T>
    where
        T: DeserializeOwned,
        Self: Sized,
    {
        let value = self.call_value(function, params).await?;
        Ok(from_value(&value)?)
    }
}
