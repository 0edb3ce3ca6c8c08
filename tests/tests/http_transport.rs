//! Stateless transport against an in-process HTTP server: header-based
//! auth, RPC over POST /rpc, and the REST fallback surface.

mod common;

use std::sync::{Arc, Mutex};

use anyhow::Result;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use common::init_tracing;
use serde_json::{json, Value as JsonValue};
use surrealix::{Connection, ConnectionConfig, Credentials, Protocol, Surreal, Value};

#[derive(Clone, Default)]
struct AppState {
    /// `(authorization, surreal-ns, surreal-db)` per /rpc request.
    seen_headers: Arc<Mutex<Vec<(Option<String>, Option<String>, Option<String>)>>>,
}

fn record_headers(state: &AppState, headers: &HeaderMap) {
    let get = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_owned);
    state.seen_headers.lock().unwrap().push((get("authorization"), get("surreal-ns"), get("surreal-db")));
}

async fn signin(Json(body): Json<JsonValue>) -> (StatusCode, Json<JsonValue>) {
    if body["user"] == "root" && body["pass"] == "root" {
        (StatusCode::OK, Json(json!({"code": 200, "token": "test-token"})))
    } else {
        (StatusCode::FORBIDDEN, Json(json!({"code": 403, "details": "invalid credentials"})))
    }
}

async fn rpc(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<JsonValue>) -> Json<JsonValue> {
    record_headers(&state, &headers);
    let id = body["id"].clone();
    match body["method"].as_str().unwrap_or("") {
        "select" => Json(json!({"id": id, "result": [{"id": "users:alice", "name": "alice"}]})),
        "query" => Json(json!({
            "id": id,
            "result": [{"status": "OK", "time": "", "result": [{"ok": true}]}],
        })),
        "version" => Json(json!({"id": id, "result": "surrealdb-mock-2.0"})),
        _ => Json(json!({"id": id, "result": null})),
    }
}

async fn rest_get_table(State(state): State<AppState>, headers: HeaderMap) -> Json<JsonValue> {
    record_headers(&state, &headers);
    Json(json!([{"id": "users:alice"}, {"id": "users:bob"}]))
}

async fn start_http_server(state: AppState) -> Result<String> {
    let app = Router::new()
        .route("/signin", post(signin))
        .route("/rpc", post(rpc))
        .route("/key/users", get(rest_get_table))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}

fn http_config(url: &str) -> ConnectionConfig {
    ConnectionConfig::new(url, "root", "root", "app", "main").with_protocol(Protocol::Json)
}

#[tokio::test]
async fn signin_attaches_bearer_token_to_requests() -> Result<()> {
    init_tracing();

    let state = AppState::default();
    let url = start_http_server(state.clone()).await?;

    let conn = surrealix::HttpConnection::new(&http_config(&url));
    conn.connect().await?;

    let auth = conn.signin(Credentials::root("root", "root")).await?;
    assert!(auth.success);
    assert_eq!(auth.token.as_deref(), Some("test-token"));
    assert!(conn.session().is_authenticated());

    let records = conn.select("users").await?;
    assert_eq!(records.len(), 1);
    assert_eq!(records.first().unwrap().get("name"), Some(&Value::Strand("alice".into())));

    let (authorization, ns, db) = state.seen_headers.lock().unwrap().last().cloned().unwrap();
    assert_eq!(authorization.as_deref(), Some("Bearer test-token"));
    assert_eq!(ns.as_deref(), Some("app"));
    assert_eq!(db.as_deref(), Some("main"));

    conn.close().await?;
    Ok(())
}

#[tokio::test]
async fn bad_credentials_surface_as_authentication_errors() -> Result<()> {
    init_tracing();

    let url = start_http_server(AppState::default()).await?;
    let conn = surrealix::HttpConnection::new(&http_config(&url));
    conn.connect().await?;

    let err = conn.signin(Credentials::root("root", "wrong")).await.unwrap_err();
    assert!(matches!(err, surrealix::Error::Authentication(_)));
    assert!(!conn.session().is_authenticated());

    // A transport-level failure during signin also surfaces as an
    // authentication error.
    let unreachable = surrealix::HttpConnection::new(&http_config("http://127.0.0.1:1"));
    unreachable.connect().await?;
    let err = unreachable.signin(Credentials::root("root", "root")).await.unwrap_err();
    assert!(matches!(err, surrealix::Error::Authentication(_)));

    conn.close().await?;
    Ok(())
}

#[tokio::test]
async fn rpc_and_rest_share_semantics() -> Result<()> {
    init_tracing();

    let state = AppState::default();
    let url = start_http_server(state.clone()).await?;
    let conn = surrealix::HttpConnection::new(&http_config(&url));
    conn.connect().await?;

    let version = conn.version().await?;
    assert_eq!(version, "surrealdb-mock-2.0");

    let query = conn.query("SELECT * FROM users", Default::default()).await?;
    assert!(query.is_ok());

    let rest = conn.rest_select("users", None).await?;
    assert_eq!(rest.len(), 2);

    conn.close().await?;
    Ok(())
}
