//! Shared helpers for watcher integration tests.
//!
//! HTTP endpoints are served by `wiremock`; the event stream by a
//! single-connection `tokio-tungstenite` server bound to an ephemeral port.

#![allow(dead_code)]

use std::time::Duration;

use comfyrest_comfyui::WatchConfig;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const JOB_ID: &str = "abc123";

/// Test configuration with short timings.
pub fn test_config(api_url: &str, ws_url: &str) -> WatchConfig {
    let mut config = WatchConfig::new(api_url);
    config.ws_url = ws_url.to_string();
    config.poll_interval = Duration::from_millis(50);
    config.stream_check_interval = Duration::from_millis(10);
    config.queue_drain_grace = Duration::from_millis(150);
    config.request_timeout = Duration::from_secs(2);
    config
}

/// A `ws://` URL nothing is listening on.
pub async fn refused_ws_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{addr}")
}

/// Mount `GET /history/{JOB_ID}` answering `body` for every call.
pub async fn mount_history(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(format!("/history/{JOB_ID}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Mount `GET /history/{JOB_ID}` answering `{}` for the first `n` calls.
pub async fn mount_pending_history(server: &MockServer, n: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/history/{JOB_ID}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .up_to_n_times(n)
        .with_priority(1)
        .mount(server)
        .await;
}

pub fn outputs() -> serde_json::Value {
    json!({"9": {"images": [{"filename": "ComfyUI_00001_.png", "subfolder": "", "type": "output"}]}})
}

pub fn executing(prompt_id: &str, node: Option<&str>) -> String {
    json!({"type": "executing", "data": {"node": node, "prompt_id": prompt_id}}).to_string()
}

pub fn queue_status(remaining: i64) -> String {
    json!({"type": "status", "data": {"status": {"exec_info": {"queue_remaining": remaining}}}})
        .to_string()
}

pub fn execution_error(prompt_id: &str, message: &str) -> String {
    json!({"type": "execution_error", "data": {
        "prompt_id": prompt_id,
        "node_id": "5",
        "node_type": "KSampler",
        "exception_type": "RuntimeError",
        "exception_message": message,
        "traceback": []
    }})
    .to_string()
}

pub fn interrupted(prompt_id: &str, node_id: &str) -> String {
    json!({"type": "execution_interrupted", "data": {
        "prompt_id": prompt_id,
        "node_id": node_id,
        "node_type": "KSampler",
        "executed": []
    }})
    .to_string()
}

pub fn progress(prompt_id: &str, value: i64, max: i64) -> String {
    json!({"type": "progress", "data": {"value": value, "max": max, "prompt_id": prompt_id, "node": "3"}})
        .to_string()
}

/// What the fake stream server does after sending its frames.
#[derive(Debug, Clone, Copy)]
pub enum AfterFrames {
    /// Keep the socket open until the client closes it.
    HoldOpen,
    /// Close the socket from the server side.
    Close,
}

pub struct WsServer {
    pub url: String,
    /// Resolves once the server observes the connection closed.
    pub closed: oneshot::Receiver<()>,
    /// Resolves with the request path (including `clientId`) on handshake.
    pub handshake: oneshot::Receiver<String>,
}

/// Serve one WebSocket connection that sends `frames` with `gap` between
/// them, then behaves per `after`.
pub async fn spawn_ws_server(frames: Vec<String>, gap: Duration, after: AfterFrames) -> WsServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (closed_tx, closed_rx) = oneshot::channel();
    let (handshake_tx, handshake_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            let _ = handshake_tx.send(req.uri().to_string());
            Ok(resp)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .unwrap();

        for frame in frames {
            if ws.send(Message::Text(frame.into())).await.is_err() {
                let _ = closed_tx.send(());
                return;
            }
            tokio::time::sleep(gap).await;
        }

        match after {
            AfterFrames::HoldOpen => {
                while let Some(msg) = ws.next().await {
                    if matches!(msg, Err(_) | Ok(Message::Close(_))) {
                        break;
                    }
                }
            }
            AfterFrames::Close => {
                let _ = ws.close(None).await;
            }
        }
        let _ = closed_tx.send(());
    });

    WsServer {
        url: format!("ws://{addr}"),
        closed: closed_rx,
        handshake: handshake_rx,
    }
}

/// Serve up to `connections` WebSocket clients that receive no frames.
/// Each handshake's request path is sent on the returned channel.
pub async fn spawn_recording_ws_server(connections: usize) -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        for _ in 0..connections {
            let (stream, _) = listener.accept().await.unwrap();
            let tx = tx.clone();
            tokio::spawn(async move {
                let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    let _ = tx.send(req.uri().to_string());
                    Ok(resp)
                };
                let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
                    .await
                    .unwrap();
                while let Some(msg) = ws.next().await {
                    if matches!(msg, Err(_) | Ok(Message::Close(_))) {
                        break;
                    }
                }
            });
        }
    });

    (format!("ws://{addr}"), rx)
}
