//! Transaction statements as the server actually sees them, over the real
//! stateful transport.

mod common;

use std::sync::{Arc, Mutex};

use anyhow::Result;
use common::*;
use serde_json::Value as JsonValue;
use surrealix::{transaction, Connection, Error, Transaction, Value, WebsocketConnection};

fn recording_handler(log: Arc<Mutex<Vec<JsonValue>>>) -> ConnHandler {
    Arc::new(move |mut conn| {
        let log = log.clone();
        Box::pin(async move {
            while let Some(request) = conn.recv().await {
                log.lock().unwrap().push(request.clone());
                conn.respond_ok(&request);
            }
        })
    })
}

fn queries(log: &Arc<Mutex<Vec<JsonValue>>>) -> Vec<String> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|r| method_of(r) == "query")
        .map(|r| sql_of(r).to_owned())
        .collect()
}

#[tokio::test]
async fn interactive_commit_round_trips() -> Result<()> {
    init_tracing();

    let log: Arc<Mutex<Vec<JsonValue>>> = Arc::new(Mutex::new(Vec::new()));
    let (url, server) = start_ws_server(recording_handler(log.clone())).await?;
    let conn = WebsocketConnection::new(&ws_config(&url));
    conn.connect().await?;

    let mut tx = conn.transaction();
    tx.begin().await?;
    tx.update(
        "players:abc",
        [("is_ready".to_owned(), Value::Bool(true))].into_iter().collect(),
    )
    .await?;
    tx.commit().await?;

    assert_eq!(
        queries(&log),
        ["BEGIN TRANSACTION;", "COMMIT TRANSACTION;"],
        "update travels as an `update` RPC between the begin and commit statements"
    );
    let methods: Vec<String> =
        log.lock().unwrap().iter().map(|r| method_of(r).to_owned()).collect();
    assert_eq!(methods, ["use", "query", "update", "query"]);

    conn.close().await?;
    server.abort();
    Ok(())
}

#[tokio::test]
async fn scoped_run_cancels_over_the_wire() -> Result<()> {
    init_tracing();

    let log: Arc<Mutex<Vec<JsonValue>>> = Arc::new(Mutex::new(Vec::new()));
    let (url, server) = start_ws_server(recording_handler(log.clone())).await?;
    let conn = WebsocketConnection::new(&ws_config(&url));
    conn.connect().await?;

    let mut tx = conn.transaction();
    let outcome: surrealix::Result<()> = transaction::run(&mut tx, |tx| {
        Box::pin(async move {
            tx.query("UPDATE game_tables:xyz SET ready_count = 1;", Default::default()).await?;
            Err(Error::Validation("abort on purpose".to_owned()))
        })
    })
    .await;

    assert!(matches!(outcome, Err(Error::Validation(_))), "the original error is re-raised");
    assert_eq!(
        queries(&log),
        [
            "BEGIN TRANSACTION;",
            "UPDATE game_tables:xyz SET ready_count = 1;",
            "CANCEL TRANSACTION;",
        ]
    );

    conn.close().await?;
    server.abort();
    Ok(())
}
