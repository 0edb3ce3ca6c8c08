//! Reconnect behaviour of the stateful transport: after the server drops
//! the channel, the client re-opens it, re-selects namespace/database,
//! resubscribes live queries under new server uuids, and keeps delivering
//! changes to the same consumer.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use common::*;
use serde_json::json;
use surrealix::{Connection, ConnectionState, LiveAction, WebsocketConnection};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

#[tokio::test]
async fn reconnect_resubscribes_and_delivers() -> Result<()> {
    init_tracing();

    let u1 = Uuid::new_v4();
    let u2 = Uuid::new_v4();
    let connection_count = Arc::new(AtomicUsize::new(0));

    let handler: ConnHandler = {
        let connection_count = connection_count.clone();
        Arc::new(move |mut conn| {
            let n = connection_count.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if n == 0 {
                    // First connection: serve the handshake and the LIVE
                    // query, then drop the channel.
                    while let Some(request) = conn.recv().await {
                        if method_of(&request) == "query" && sql_of(&request).starts_with("LIVE SELECT") {
                            conn.send(ok_result(&request, statement_ok(json!(u1.to_string()))));
                            sleep(Duration::from_millis(50)).await;
                            return;
                        }
                        conn.respond_ok(&request);
                    }
                } else {
                    // Reconnected: serve the handshake, assign a new uuid to
                    // the resubscribed live query, then push a change.
                    let mut live_served = false;
                    loop {
                        tokio::select! {
                            request = conn.recv() => {
                                let Some(request) = request else { return };
                                if method_of(&request) == "query" && sql_of(&request).starts_with("LIVE SELECT") {
                                    conn.send(ok_result(&request, statement_ok(json!(u2.to_string()))));
                                    live_served = true;
                                } else {
                                    conn.respond_ok(&request);
                                }
                            }
                            _ = sleep(Duration::from_millis(150)), if live_served => {
                                conn.send(json!({
                                    "id": u2.to_string(),
                                    "action": "CREATE",
                                    "result": {"id": "items:fresh", "name": "after reconnect"},
                                }));
                                live_served = false;
                            }
                        }
                    }
                }
            })
        })
    };

    let (url, server) = start_ws_server(handler).await?;
    let conn = WebsocketConnection::new(&ws_config(&url));
    conn.connect().await?;

    let (hook_tx, mut hook_rx) = mpsc::unbounded_channel();
    let mut stream = conn
        .live_select("items")
        .on_reconnect(move |old, new| {
            let _ = hook_tx.send((old, new));
        })
        .start()
        .await?;
    assert_eq!(stream.live_id(), Some(u1));

    // The server drops the socket; the reconnect hook reports the uuid swap.
    let (old, new) = timeout(Duration::from_secs(5), hook_rx.recv()).await?.expect("reconnect hook fired");
    assert_eq!((old, new), (u1, u2));
    assert_eq!(stream.live_id(), Some(u2));

    // The same consumer receives the post-reconnect change.
    let change = timeout(Duration::from_secs(5), stream.next()).await?.expect("change after reconnect");
    assert_eq!(change.action, LiveAction::Create);
    assert_eq!(change.record_id.as_deref(), Some("items:fresh"));

    assert!(connection_count.load(Ordering::SeqCst) >= 2);

    stream.stop().await;
    conn.close().await?;
    server.abort();
    Ok(())
}

#[tokio::test]
async fn exhausted_reconnects_end_streams_and_fail_state() -> Result<()> {
    init_tracing();

    let handler: ConnHandler = Arc::new(move |mut conn| {
        Box::pin(async move {
            // Serve exactly one connection, then vanish for good.
            while let Some(request) = conn.recv().await {
                if method_of(&request) == "query" && sql_of(&request).starts_with("LIVE SELECT") {
                    conn.send(ok_result(&request, statement_ok(json!(Uuid::new_v4().to_string()))));
                    return;
                }
                conn.respond_ok(&request);
            }
        })
    });

    let (url, server) = start_ws_server(handler).await?;

    let mut config = ws_config(&url);
    config.max_reconnect_attempts = 2;
    let conn = WebsocketConnection::new(&config);
    conn.connect().await?;

    let mut stream = conn.live_select("items").start().await?;

    // Kill the server entirely so every reconnect attempt fails.
    server.abort();

    // The stream ends rather than hanging.
    let end = timeout(Duration::from_secs(10), stream.next()).await?;
    assert!(end.is_none(), "stream should see end-of-stream after reconnect gives up");

    let mut state = conn.state();
    let state = timeout(Duration::from_secs(10), async {
        loop {
            if *state.borrow() == ConnectionState::Failed {
                return ConnectionState::Failed;
            }
            if state.changed().await.is_err() {
                return state.borrow().clone();
            }
        }
    })
    .await?;
    assert_eq!(state, ConnectionState::Failed);

    conn.close().await?;
    Ok(())
}
