//! Change-feed replay: cursored polling yields changes in order, the cursor
//! advances to each delivered versionstamp, and later inserts arrive without
//! gaps.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use common::*;
use serde_json::{json, Value as Json};
use surrealix::{ChangeEntry, ChangeFeedStream, Connection, WebsocketConnection};
use tokio::time::timeout;

type Rows = Arc<Mutex<Vec<(String, Json)>>>;

fn change_row(versionstamp: &str, record_id: &str) -> (String, Json) {
    (
        versionstamp.to_owned(),
        json!({
            "versionstamp": versionstamp,
            "changes": [{"create": {"id": record_id, "status": "new"}}],
        }),
    )
}

/// Serves `SHOW CHANGES FOR TABLE orders SINCE '<x>'` from a shared row
/// store, returning rows with versionstamp greater than the cursor.
fn changefeed_handler(rows: Rows) -> ConnHandler {
    Arc::new(move |mut conn| {
        let rows = rows.clone();
        Box::pin(async move {
            while let Some(request) = conn.recv().await {
                let sql = sql_of(&request);
                if method_of(&request) == "query" && sql.starts_with("SHOW CHANGES") {
                    let since = sql.split('\'').nth(1).unwrap_or("").to_owned();
                    let batch: Vec<Json> = rows
                        .lock()
                        .unwrap()
                        .iter()
                        .filter(|(versionstamp, _)| versionstamp.as_str() > since.as_str())
                        .map(|(_, row)| row.clone())
                        .collect();
                    conn.send(ok_result(&request, statement_ok(json!(batch))));
                } else {
                    conn.respond_ok(&request);
                }
            }
        })
    })
}

#[tokio::test]
async fn replay_and_follow_in_order() -> Result<()> {
    init_tracing();

    let rows: Rows = Arc::new(Mutex::new(vec![
        change_row("00000001", "orders:r1"),
        change_row("00000002", "orders:r2"),
        change_row("00000003", "orders:r3"),
    ]));

    let (url, server) = start_ws_server(changefeed_handler(rows.clone())).await?;
    let conn = WebsocketConnection::new(&ws_config(&url));
    conn.connect().await?;

    let mut stream = ChangeFeedStream::new(Arc::new(conn.clone()), "orders")
        .with_poll_interval(Duration::from_millis(20))
        .since("00000000");

    let mut seen = Vec::new();
    let mut last_versionstamp = String::new();
    for _ in 0..3 {
        let change = timeout(Duration::from_secs(5), stream.next()).await?.expect("replayed change");
        let versionstamp = change.versionstamp.clone().expect("versionstamp");
        assert!(versionstamp >= last_versionstamp, "versionstamps must be non-decreasing");
        last_versionstamp = versionstamp;
        match &change.changes[0] {
            ChangeEntry::Create(_) => seen.push(change.changes[0].record_id().unwrap()),
            other => panic!("expected create, got {other:?}"),
        }
    }
    assert_eq!(seen, ["orders:r1", "orders:r2", "orders:r3"]);
    assert_eq!(stream.cursor(), Some("00000003"));

    // A later insert arrives without gaps or repeats.
    rows.lock().unwrap().push(change_row("00000004", "orders:r4"));
    let change = timeout(Duration::from_secs(5), stream.next()).await?.expect("follow-up change");
    assert_eq!(change.changes[0].record_id().as_deref(), Some("orders:r4"));
    assert_eq!(stream.cursor(), Some("00000004"));

    stream.stop();
    conn.close().await?;
    server.abort();
    Ok(())
}

#[tokio::test]
async fn batch_variant_yields_whole_batches() -> Result<()> {
    init_tracing();

    let rows: Rows = Arc::new(Mutex::new(vec![
        change_row("00000001", "orders:r1"),
        change_row("00000002", "orders:r2"),
    ]));

    let (url, server) = start_ws_server(changefeed_handler(rows)).await?;
    let conn = WebsocketConnection::new(&ws_config(&url));
    conn.connect().await?;

    let mut stream = ChangeFeedStream::new(Arc::new(conn.clone()), "orders")
        .with_poll_interval(Duration::from_millis(20))
        .since("00000000");

    let batch = timeout(Duration::from_secs(5), stream.next_batch()).await?.expect("batch");
    assert_eq!(batch.len(), 2);
    assert_eq!(stream.cursor(), Some("00000002"));

    stream.stop();
    conn.close().await?;
    server.abort();
    Ok(())
}

#[tokio::test]
async fn schema_descriptors_are_identifiable() -> Result<()> {
    init_tracing();

    let rows: Rows = Arc::new(Mutex::new(vec![(
        "00000001".to_owned(),
        json!({
            "versionstamp": "00000001",
            "changes": [{"define_table": {"name": "orders"}}],
        }),
    )]));

    let (url, server) = start_ws_server(changefeed_handler(rows)).await?;
    let conn = WebsocketConnection::new(&ws_config(&url));
    conn.connect().await?;

    let mut stream = ChangeFeedStream::new(Arc::new(conn.clone()), "orders")
        .with_poll_interval(Duration::from_millis(20))
        .since("00000000");

    let change = timeout(Duration::from_secs(5), stream.next()).await?.expect("schema change row");
    assert!(change.changes[0].is_schema());
    assert_eq!(change.changes[0].record_id(), None);

    stream.stop();
    conn.close().await?;
    server.abort();
    Ok(())
}
