//! Shared plumbing for integration tests: an in-process WebSocket RPC
//! server with per-test connection handlers, speaking the JSON protocol.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value as Json};
use surrealix::{ConnectionConfig, Protocol};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;

/// Server side of one accepted connection: requests in, frames out.
pub struct ServerConn {
    pub requests: mpsc::UnboundedReceiver<Json>,
    pub sender: mpsc::UnboundedSender<Json>,
}

impl ServerConn {
    pub async fn recv(&mut self) -> Option<Json> { self.requests.recv().await }

    pub fn send(&self, frame: Json) { let _ = self.sender.send(frame); }

    pub fn respond_ok(&self, request: &Json) { self.send(json!({"id": request["id"], "result": null})); }
}

pub type ConnHandler = Arc<dyn Fn(ServerConn) -> BoxFuture<'static, ()> + Send + Sync>;

/// Bind a listener and serve each accepted connection with `handler`. The
/// connection is torn down when the handler returns or the client leaves.
pub async fn start_ws_server(handler: ConnHandler) -> anyhow::Result<(String, JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("ws://{}", listener.local_addr()?);

    let task = tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { break };
            let handler = handler.clone();
            tokio::spawn(async move {
                let echo_subprotocol = |request: &Request, mut response: Response| {
                    if let Some(protocol) = request.headers().get("Sec-WebSocket-Protocol") {
                        response.headers_mut().insert("Sec-WebSocket-Protocol", protocol.clone());
                    }
                    Ok(response)
                };
                let Ok(ws) = accept_hdr_async(stream, echo_subprotocol).await else { return };
                let (mut sink, mut stream) = ws.split();

                let (req_tx, req_rx) = mpsc::unbounded_channel();
                let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<Json>();

                let writer = tokio::spawn(async move {
                    while let Some(frame) = frame_rx.recv().await {
                        if sink.send(Message::Text(frame.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                });

                let mut running = tokio::spawn(handler(ServerConn { requests: req_rx, sender: frame_tx }));

                loop {
                    tokio::select! {
                        msg = stream.next() => match msg {
                            Some(Ok(Message::Text(text))) => {
                                if let Ok(value) = serde_json::from_str::<Json>(text.as_str()) {
                                    let _ = req_tx.send(value);
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(_)) => break,
                        },
                        _ = &mut running => break,
                    }
                }

                writer.abort();
            });
        }
    });

    Ok((url, task))
}

pub fn method_of(request: &Json) -> &str { request["method"].as_str().unwrap_or("") }

pub fn sql_of(request: &Json) -> &str { request["params"][0].as_str().unwrap_or("") }

/// Response envelope carrying `result`.
pub fn ok_result(request: &Json, result: Json) -> Json { json!({"id": request["id"], "result": result}) }

/// A one-statement query result in the server's `[{status, time, result}]`
/// shape.
pub fn statement_ok(result: Json) -> Json { json!([{"status": "OK", "time": "", "result": result}]) }

/// Client config pointed at a mock server: JSON protocol, fast reconnects,
/// no credentials.
pub fn ws_config(url: &str) -> ConnectionConfig {
    ConnectionConfig::new(url, "", "", "test", "test")
        .with_protocol(Protocol::Json)
        .with_timeout(Duration::from_secs(5))
        .with_reconnect(Duration::from_millis(100), 5)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).try_init();
}
