//! Session semantics on the stateful transport: signin retains the token,
//! session variables round-trip, and reconnection re-authenticates with the
//! retained token before re-selecting namespace/database.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use common::*;
use serde_json::{json, Value as JsonValue};
use surrealix::{Connection, ConnectionState, Credentials, Surreal, Value, WebsocketConnection};
use tokio::time::timeout;

#[tokio::test]
async fn session_variables_use_let_and_unset() -> Result<()> {
    init_tracing();

    let log: Arc<Mutex<Vec<JsonValue>>> = Arc::new(Mutex::new(Vec::new()));
    let handler: ConnHandler = {
        let log = log.clone();
        Arc::new(move |mut conn| {
            let log = log.clone();
            Box::pin(async move {
                while let Some(request) = conn.recv().await {
                    log.lock().unwrap().push(request.clone());
                    conn.respond_ok(&request);
                }
            })
        })
    };

    let (url, server) = start_ws_server(handler).await?;
    let conn = WebsocketConnection::new(&ws_config(&url));
    conn.connect().await?;

    conn.let_var("role", Value::Strand("admin".into())).await?;
    conn.unset_var("role").await?;

    let methods: Vec<String> =
        log.lock().unwrap().iter().map(|r| r["method"].as_str().unwrap_or("").to_owned()).collect();
    assert_eq!(methods, ["use", "let", "unset"]);

    let let_request = log.lock().unwrap()[1].clone();
    assert_eq!(let_request["params"], json!(["role", "admin"]));

    conn.close().await?;
    server.abort();
    Ok(())
}

#[tokio::test]
async fn reconnect_reauthenticates_with_retained_token() -> Result<()> {
    init_tracing();

    let connection_count = Arc::new(AtomicUsize::new(0));
    let reauth: Arc<Mutex<Option<JsonValue>>> = Arc::new(Mutex::new(None));

    let handler: ConnHandler = {
        let connection_count = connection_count.clone();
        let reauth = reauth.clone();
        Arc::new(move |mut conn| {
            let n = connection_count.fetch_add(1, Ordering::SeqCst);
            let reauth = reauth.clone();
            Box::pin(async move {
                while let Some(request) = conn.recv().await {
                    match method_of(&request) {
                        "signin" => {
                            conn.send(ok_result(&request, json!("jwt-abc")));
                            // Let the response flush, then drop the
                            // connection to force a reconnect.
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            return;
                        }
                        "authenticate" if n > 0 => {
                            *reauth.lock().unwrap() = Some(request["params"][0].clone());
                            conn.respond_ok(&request);
                        }
                        _ => conn.respond_ok(&request),
                    }
                }
            })
        })
    };

    let (url, server) = start_ws_server(handler).await?;
    let conn = WebsocketConnection::new(&ws_config(&url));
    conn.connect().await?;

    let auth = conn.signin(Credentials::root("root", "root")).await?;
    assert_eq!(auth.token.as_deref(), Some("jwt-abc"));
    assert_eq!(conn.session().token().as_deref(), Some("jwt-abc"));

    // The server dropped the channel right after signin; wait out the
    // reconnect and verify it re-authenticated with the retained token.
    let mut state = conn.state();
    timeout(Duration::from_secs(5), async {
        loop {
            if *state.borrow() == ConnectionState::Connected
                && connection_count.load(Ordering::SeqCst) > 1
            {
                return;
            }
            if state.changed().await.is_err() {
                return;
            }
        }
    })
    .await?;

    assert_eq!(reauth.lock().unwrap().clone(), Some(json!("jwt-abc")));
    assert!(conn.session().is_authenticated());

    conn.close().await?;
    server.abort();
    Ok(())
}
