//! Data round-trips: strings that merely look like record ids or data URLs
//! must come back byte-for-byte as strings, and live notifications flow to
//! the right subscriber.

mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use common::*;
use serde_json::json;
use surrealix::{Connection, LiveAction, LiveManager, LiveSubscriptionParams, Surreal, Value, WebsocketConnection};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

const DATA_URL: &str = "data:image/png;base64,iVBORw0KGgo=";

/// Echo server: `create` answers with the record payload it was sent.
fn echo_handler() -> ConnHandler {
    Arc::new(|mut conn| {
        Box::pin(async move {
            while let Some(request) = conn.recv().await {
                match method_of(&request) {
                    "create" => {
                        let data = request["params"][1].clone();
                        conn.send(ok_result(&request, data));
                    }
                    _ => conn.respond_ok(&request),
                }
            }
        })
    })
}

#[tokio::test]
async fn data_url_survives_create_roundtrip() -> Result<()> {
    init_tracing();

    let (url, server) = start_ws_server(echo_handler()).await?;
    let conn = WebsocketConnection::new(&ws_config(&url));
    conn.connect().await?;

    let record = Value::object([
        ("avatar", Value::Strand(DATA_URL.into())),
        ("ref_like", Value::Strand("users:1".into())),
    ]);
    let response = conn.create("items", record).await?;

    let avatar = response.get("avatar").expect("avatar field");
    assert_eq!(avatar, &Value::Strand(DATA_URL.into()), "data URL must round-trip byte-for-byte");
    let ref_like = response.get("ref_like").expect("ref_like field");
    assert_eq!(ref_like, &Value::Strand("users:1".into()), "record-id-shaped string must stay a string");

    conn.close().await?;
    server.abort();
    Ok(())
}

/// Two subscriptions on one connection each receive only their own
/// notifications, in the order the server pushed them.
#[tokio::test]
async fn notifications_route_by_subscription_uuid() -> Result<()> {
    init_tracing();

    let players_id = Uuid::new_v4();
    let tables_id = Uuid::new_v4();

    let handler: ConnHandler = {
        Arc::new(move |mut conn| {
            Box::pin(async move {
                let mut live_count = 0;
                while let Some(request) = conn.recv().await {
                    if method_of(&request) == "query" && sql_of(&request).starts_with("LIVE SELECT") {
                        let id = if sql_of(&request).contains("players") { players_id } else { tables_id };
                        conn.send(ok_result(&request, statement_ok(json!(id.to_string()))));
                        live_count += 1;
                        if live_count == 2 {
                            // Interleave pushes across the two subscriptions.
                            sleep(Duration::from_millis(50)).await;
                            for (uuid, rid, n) in [
                                (players_id, "players:a", 1),
                                (tables_id, "game_tables:x", 1),
                                (players_id, "players:b", 2),
                            ] {
                                conn.send(json!({
                                    "id": uuid.to_string(),
                                    "action": "CREATE",
                                    "result": {"id": rid, "seq": n},
                                }));
                            }
                        }
                    } else {
                        conn.respond_ok(&request);
                    }
                }
            })
        })
    };

    let (url, server) = start_ws_server(handler).await?;
    let conn = WebsocketConnection::new(&ws_config(&url));
    conn.connect().await?;

    let mut players = conn.live_select("players").start().await?;

    let manager = LiveManager::new(conn.clone());
    let (table_tx, mut table_rx) = mpsc::unbounded_channel();
    let watched = manager
        .watch(LiveSubscriptionParams::new("game_tables"), move |change| {
            let _ = table_tx.send(change);
        })
        .await?;
    assert_eq!(watched, tables_id);
    assert_eq!(manager.count(), 1);

    let first = timeout(Duration::from_secs(5), players.next()).await?.expect("players change 1");
    assert_eq!(first.record_id.as_deref(), Some("players:a"));
    let second = timeout(Duration::from_secs(5), players.next()).await?.expect("players change 2");
    assert_eq!(second.record_id.as_deref(), Some("players:b"));

    let table_change = timeout(Duration::from_secs(5), table_rx.recv()).await?.expect("table change");
    assert_eq!(table_change.action, LiveAction::Create);
    assert_eq!(table_change.record_id.as_deref(), Some("game_tables:x"));

    manager.stop_all().await;
    assert_eq!(manager.count(), 0);

    players.stop().await;
    conn.close().await?;
    server.abort();
    Ok(())
}

/// Stopping a stream issues a server-side kill and ends the iterator.
#[tokio::test]
async fn stop_kills_and_ends_stream() -> Result<()> {
    init_tracing();

    let live_id = Uuid::new_v4();
    let (kill_tx, mut kill_rx) = mpsc::unbounded_channel();

    let handler: ConnHandler = {
        Arc::new(move |mut conn| {
            let kill_tx = kill_tx.clone();
            Box::pin(async move {
                while let Some(request) = conn.recv().await {
                    match method_of(&request) {
                        "query" if sql_of(&request).starts_with("LIVE SELECT") => {
                            conn.send(ok_result(&request, statement_ok(json!(live_id.to_string()))));
                        }
                        "kill" => {
                            let _ = kill_tx.send(request["params"][0].clone());
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

    let mut stream = conn.live_select("items").start().await?;
    assert_eq!(conn.live_ids(), vec![live_id]);

    stream.stop().await;
    let killed = timeout(Duration::from_secs(5), kill_rx.recv()).await?.expect("kill request");
    assert_eq!(killed.as_str(), Some(live_id.to_string().as_str()));
    assert!(conn.live_ids().is_empty());
    assert!(stream.next().await.is_none());

    conn.close().await?;
    server.abort();
    Ok(())
}
