//! Request/response correlation on the stateful transport: responses
//! arriving in arbitrary order are matched by id, never by arrival order.

mod common;

use std::sync::Arc;

use anyhow::Result;
use common::*;
use serde_json::json;
use surrealix::{Connection, Surreal, WebsocketConnection};

#[tokio::test]
async fn reordered_responses_reach_their_callers() -> Result<()> {
    init_tracing();

    // Collect three queries, then answer them last-first-second.
    let handler: ConnHandler = Arc::new(|mut conn| {
        Box::pin(async move {
            let mut queries = Vec::new();
            while let Some(request) = conn.recv().await {
                match method_of(&request) {
                    "query" => {
                        queries.push(request);
                        if queries.len() == 3 {
                            for idx in [2usize, 0, 1] {
                                let request = &queries[idx];
                                let scalar: i64 = sql_of(request)
                                    .trim_start_matches("RETURN ")
                                    .trim_end_matches(';')
                                    .parse()
                                    .expect("scalar query");
                                conn.send(ok_result(request, statement_ok(json!(scalar))));
                            }
                            queries.clear();
                        }
                    }
                    _ => conn.respond_ok(&request),
                }
            }
        })
    });

    let (url, server) = start_ws_server(handler).await?;
    let conn = WebsocketConnection::new(&ws_config(&url));
    conn.connect().await?;

    let mut tasks = Vec::new();
    for scalar in [1i64, 2, 3] {
        let conn = conn.clone();
        tasks.push(tokio::spawn(async move {
            let response = conn.query(&format!("RETURN {scalar};"), Default::default()).await?;
            let result = response.first_result().expect("one statement").result.clone();
            anyhow::Ok((scalar, result))
        }));
    }

    for task in tasks {
        let (scalar, result) = task.await??;
        assert_eq!(result, surrealix::Value::Int(scalar), "caller for {scalar} got someone else's result");
    }

    conn.close().await?;
    server.abort();
    Ok(())
}

#[tokio::test]
async fn late_response_for_unknown_id_is_discarded() -> Result<()> {
    init_tracing();

    // Answer the first query twice; the duplicate must be dropped silently
    // and the connection must stay usable.
    let handler: ConnHandler = Arc::new(|mut conn| {
        Box::pin(async move {
            while let Some(request) = conn.recv().await {
                match method_of(&request) {
                    "query" => {
                        conn.send(ok_result(&request, statement_ok(json!(1))));
                        conn.send(ok_result(&request, statement_ok(json!(999))));
                    }
                    _ => conn.respond_ok(&request),
                }
            }
        })
    });

    let (url, server) = start_ws_server(handler).await?;
    let conn = WebsocketConnection::new(&ws_config(&url));
    conn.connect().await?;

    let first = conn.query("RETURN 1;", Default::default()).await?;
    assert_eq!(first.first_result().unwrap().result, surrealix::Value::Int(1));

    let second = conn.query("RETURN 1;", Default::default()).await?;
    assert_eq!(second.first_result().unwrap().result, surrealix::Value::Int(1));

    conn.close().await?;
    server.abort();
    Ok(())
}
