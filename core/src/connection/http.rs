//! Stateless request/response transport.
//!
//! Each call is an independent HTTP exchange; namespace, database, and the
//! bearer token travel as headers on every request. Ideal for serverless and
//! horizontally scaled consumers that cannot hold a socket open.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use surrealix_proto::codec::text;
use surrealix_proto::{AuthResponse, Payload, Protocol, RpcRequest, RpcResponse, Value};
use tracing::debug;

use crate::config::{ConnectionConfig, ConnectionKind};
use crate::connection::{Connection, Credentials, Session, Surreal};
use crate::error::{Error, Result};
use crate::functions::FunctionNamespace;
use crate::transaction::BatchedTransaction;

struct Inner {
    base_url: String,
    protocol: Protocol,
    timeout: std::time::Duration,
    session: Session,
    next_id: AtomicU64,
    client: Mutex<Option<reqwest::Client>>,
}

/// Stateless HTTP connection. Cheap to clone; clones share the underlying
/// client and session.
#[derive(Clone)]
pub struct HttpConnection {
    inner: Arc<Inner>,
}

impl HttpConnection {
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                base_url: Self::normalize_url(&config.url),
                protocol: config.protocol,
                timeout: config.timeout,
                session: Session::new(&config.namespace, &config.database),
                next_id: AtomicU64::new(0),
                client: Mutex::new(None),
            }),
        }
    }

    fn normalize_url(url: &str) -> String {
        let url = match url {
            u if u.starts_with("ws://") => format!("http://{}", &u[5..]),
            u if u.starts_with("wss://") => format!("https://{}", &u[6..]),
            u if u.starts_with("http://") || u.starts_with("https://") => u.to_owned(),
            u => format!("http://{u}"),
        };
        url.trim_end_matches('/').to_owned()
    }

    fn next_request_id(&self) -> u64 { self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1 }

    fn client(&self) -> Result<reqwest::Client> {
        self.inner
            .client
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::connection("not connected, call connect() first"))
    }

    fn headers(&self) -> HeaderMap {
        let session = &self.inner.session;
        let mut headers = HeaderMap::new();
        if let Ok(ns) = HeaderValue::from_str(&session.namespace()) {
            headers.insert("Surreal-NS", ns);
        }
        if let Ok(db) = HeaderValue::from_str(&session.database()) {
            headers.insert("Surreal-DB", db);
        }
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = session.token().filter(|t| !t.is_empty()) {
            if let Ok(auth) = HeaderValue::from_str(&format!("Bearer {token}")) {
                headers.insert(AUTHORIZATION, auth);
            }
        }
        headers
    }

    fn request_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout(self.inner.timeout)
        } else {
            Error::Connection(format!("request failed: {e}"))
        }
    }

    async fn parse_json_body(&self, response: reqwest::Response) -> Result<Value> {
        let json: serde_json::Value =
            response.json().await.map_err(|e| Error::connection(format!("malformed response body: {e}")))?;
        Ok(text::from_json(json))
    }

    fn check_status(status: StatusCode, body: &str) -> Result<()> {
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::query(format!("HTTP error: {} - {}", status.as_u16(), body), Some(status.as_u16() as i64)))
        }
    }

    /// Execute raw SurrealQL via POST /sql, an alternative to RPC.
    pub async fn sql(&self, query: &str) -> Result<Vec<Value>> {
        let client = self.client()?;
        let url = format!("{}/sql", self.inner.base_url);
        let response =
            client.post(&url).headers(self.headers()).body(query.to_owned()).send().await.map_err(|e| self.request_error(e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::query_with_sql(
                format!("SQL query failed: {body}"),
                Some(status.as_u16() as i64),
                query,
            ));
        }
        match self.parse_json_body(response).await? {
            Value::Array(items) => Ok(items),
            other => Ok(vec![other]),
        }
    }

    /// GET /health: server is able to serve requests.
    pub async fn health(&self) -> bool {
        match self.client() {
            Ok(client) => match client.get(format!("{}/health", self.inner.base_url)).send().await {
                Ok(resp) => resp.status().is_success(),
                Err(_) => false,
            },
            Err(_) => false,
        }
    }

    /// GET /status: server process is up.
    pub async fn status(&self) -> bool {
        match self.client() {
            Ok(client) => match client.get(format!("{}/status", self.inner.base_url)).send().await {
                Ok(resp) => resp.status().is_success(),
                Err(_) => false,
            },
            Err(_) => false,
        }
    }

    fn key_path(&self, table: &str, record_id: Option<&str>) -> String {
        match record_id {
            Some(id) => format!("{}/key/{}/{}", self.inner.base_url, table, id),
            None => format!("{}/key/{}", self.inner.base_url, table),
        }
    }

    // REST fallback surface on /key/:table[/:id]. Semantics mirror the
    // corresponding RPC operations for callers that cannot speak RPC.

    pub async fn rest_select(&self, table: &str, record_id: Option<&str>) -> Result<Vec<Value>> {
        let client = self.client()?;
        let response = client
            .get(self.key_path(table, record_id))
            .headers(self.headers())
            .send()
            .await
            .map_err(|e| self.request_error(e))?;
        Self::check_status(response.status(), "")?;
        match self.parse_json_body(response).await? {
            Value::Array(items) => Ok(items),
            other => Ok(vec![other]),
        }
    }

    pub async fn rest_create(&self, table: &str, record_id: Option<&str>, data: &Value) -> Result<Value> {
        let client = self.client()?;
        let body = text::to_json(data).map_err(Error::from)?;
        let response = client
            .post(self.key_path(table, record_id))
            .headers(self.headers())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;
        Self::check_status(response.status(), "")?;
        self.parse_json_body(response).await
    }

    pub async fn rest_update(&self, table: &str, record_id: &str, data: &Value) -> Result<Value> {
        let client = self.client()?;
        let body = text::to_json(data).map_err(Error::from)?;
        let response = client
            .put(self.key_path(table, Some(record_id)))
            .headers(self.headers())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;
        Self::check_status(response.status(), "")?;
        self.parse_json_body(response).await
    }

    pub async fn rest_patch(&self, table: &str, record_id: &str, data: &Value) -> Result<Value> {
        let client = self.client()?;
        let body = text::to_json(data).map_err(Error::from)?;
        let response = client
            .patch(self.key_path(table, Some(record_id)))
            .headers(self.headers())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;
        Self::check_status(response.status(), "")?;
        self.parse_json_body(response).await
    }

    pub async fn rest_delete(&self, table: &str, record_id: Option<&str>) -> Result<Value> {
        let client = self.client()?;
        let response = client
            .delete(self.key_path(table, record_id))
            .headers(self.headers())
            .send()
            .await
            .map_err(|e| self.request_error(e))?;
        Self::check_status(response.status(), "")?;
        self.parse_json_body(response).await
    }

    /// Statements batched locally, dispatched atomically on commit.
    pub fn transaction(&self) -> BatchedTransaction { BatchedTransaction::new(Arc::new(self.clone())) }

    /// Entry point to the function-call facade.
    pub fn fn_(&self) -> FunctionNamespace<'_> { FunctionNamespace::new(self) }
}

#[async_trait]
impl Connection for HttpConnection {
    async fn connect(&self) -> Result<()> {
        if self.inner.session.is_connected() {
            return Ok(());
        }
        let client = reqwest::Client::builder()
            .timeout(self.inner.timeout)
            .build()
            .map_err(|e| Error::connection(format!("client construction failed: {e}")))?;
        *self.inner.client.lock().unwrap() = Some(client);
        self.inner.session.set_connected(true);
        debug!(url = %self.inner.base_url, "http connection ready");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        *self.inner.client.lock().unwrap() = None;
        self.inner.session.set_connected(false);
        self.inner.session.set_token(None);
        Ok(())
    }

    async fn send_rpc(&self, mut request: RpcRequest) -> Result<RpcResponse> {
        let client = self.client()?;
        request.id = self.next_request_id();

        let payload = request.encode(self.inner.protocol)?;
        let mut headers = self.headers();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(self.inner.protocol.content_type()));
        headers.insert(ACCEPT, HeaderValue::from_static(self.inner.protocol.content_type()));

        let url = format!("{}/rpc", self.inner.base_url);
        let builder = match payload {
            Payload::Binary(bytes) => client.post(&url).headers(headers).body(bytes),
            Payload::Text(text) => client.post(&url).headers(headers).body(text),
        };

        let response = builder.send().await.map_err(|e| self.request_error(e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::query(
                format!("HTTP error: {} - {}", status.as_u16(), body),
                Some(status.as_u16() as i64),
            ));
        }

        let bytes = response.bytes().await.map_err(|e| self.request_error(e))?;
        let value = self.inner.protocol.decode(&bytes)?;
        Ok(RpcResponse::from_value(value)?)
    }

    fn session(&self) -> &Session { &self.inner.session }

    fn kind(&self) -> ConnectionKind { ConnectionKind::Http }
}

#[async_trait]
impl Surreal for HttpConnection {
    /// HTTP signin goes through POST /signin rather than the RPC envelope;
    /// the JWT comes back in the response body and is attached to every
    /// subsequent request.
    async fn signin(&self, credentials: Credentials) -> Result<AuthResponse> {
        let client = self.client().map_err(|e| Error::Authentication(e.to_string()))?;

        let payload = text::to_json(&Value::Object(credentials.http_payload())).map_err(Error::from)?;
        let response = client
            .post(format!("{}/signin", self.inner.base_url))
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Authentication(format!("authentication request failed: {e}")))?;

        if response.status() != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Authentication(format!("authentication failed: {body}")));
        }

        let body = self
            .parse_json_body(response)
            .await
            .map_err(|e| Error::Authentication(format!("authentication failed: {e}")))?;
        let token = body.get("token").and_then(Value::as_str).map(str::to_owned);
        self.inner.session.set_token(Some(token.clone().unwrap_or_default()));
        Ok(AuthResponse { token, success: true })
    }
}
