//! In-process fake tool service speaking both transports.

#![allow(dead_code)]

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

type EventSender = mpsc::Sender<Result<String, Infallible>>;

#[derive(Default)]
pub struct FakeState {
    pub requests: Mutex<Vec<Value>>,
    pub headers: Mutex<Vec<HeaderMap>>,
    sessions: Mutex<HashMap<String, EventSender>>,
    connections: AtomicUsize,
    pub json_replies: std::sync::atomic::AtomicBool,
}

pub struct FakeService {
    pub addr: SocketAddr,
    pub state: Arc<FakeState>,
}

impl FakeService {
    pub async fn start() -> Self {
        let state = Arc::new(FakeState::default());
        let app = Router::new()
            .route("/mcp", post(direct))
            .route("/sse", get(open_stream))
            .route("/silent", get(silent_stream))
            .route("/messages/", post(submit))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn direct_url(&self) -> String {
        format!("http://{}/mcp", self.addr)
    }

    pub fn stream_url(&self) -> String {
        format!("http://{}/sse", self.addr)
    }

    pub fn silent_url(&self) -> String {
        format!("http://{}/silent", self.addr)
    }

    pub fn methods(&self) -> Vec<String> {
        self.state
            .requests
            .lock()
            .iter()
            .filter_map(|r| r["method"].as_str().map(str::to_string))
            .collect()
    }

    pub fn last_header(&self, name: &str) -> Option<String> {
        self.state
            .headers
            .lock()
            .last()
            .and_then(|h| h.get(name))
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    pub fn stream_connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// End every open event stream from the server side.
    pub fn drop_streams(&self) {
        self.state.sessions.lock().clear();
    }

    pub fn reply_with_json(&self) {
        self.state.json_replies.store(true, Ordering::SeqCst);
    }
}

pub fn tool_list() -> Value {
    json!([
        {
            "name": "get_time",
            "description": "Current time",
            "inputSchema": {
                "type": "object",
                "properties": {"timezone": {"type": "string", "description": "IANA zone"}},
                "required": ["timezone"]
            }
        },
        {
            "name": "echo",
            "description": "Echo arguments back",
            "inputSchema": {"type": "object", "properties": {}}
        },
        {"name": "fail", "description": "Always fails", "inputSchema": {"type": "object"}},
        {"name": "hang", "description": "Never answers", "inputSchema": {"type": "object"}}
    ])
}

/// Reply to a request, or `None` for notifications and tools that never answer.
pub fn answer(request: &Value) -> Option<Value> {
    let id = request.get("id")?.clone();
    let result = match request["method"].as_str().unwrap_or_default() {
        "initialize" => json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "fake", "version": "0.0.1"}
        }),
        "tools/list" => json!({"tools": tool_list()}),
        "ping" => json!({}),
        "tools/call" => match request["params"]["name"].as_str().unwrap_or_default() {
            "get_time" => json!({"content": [{"type": "text", "text": "2024-01-01T00:00:00Z"}]}),
            "echo" => json!({
                "content": [{"type": "text", "text": request["params"]["arguments"].to_string()}],
                "structuredContent": request["params"]["arguments"]
            }),
            "fail" => json!({"content": [{"type": "text", "text": "boom"}], "isError": true}),
            "hang" => return None,
            other => {
                return Some(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -32602, "message": format!("unknown tool {other}")}
                }));
            }
        },
        other => {
            return Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": format!("method not found: {other}")}
            }));
        }
    };
    Some(json!({"jsonrpc": "2.0", "id": id, "result": result}))
}

fn message_event(reply: &Value) -> String {
    format!("event: message\ndata: {reply}\n\n")
}

async fn direct(State(state): State<Arc<FakeState>>, headers: HeaderMap, body: Bytes) -> Response {
    let request: Value = serde_json::from_slice(&body).unwrap();
    state.requests.lock().push(request.clone());
    state.headers.lock().push(headers);

    if request["params"]["name"] == "hang" {
        tokio::time::sleep(Duration::from_secs(60)).await;
    }
    let Some(reply) = answer(&request) else {
        return (StatusCode::ACCEPTED, [("mcp-session-id", "direct-1")]).into_response();
    };

    if state.json_replies.load(Ordering::SeqCst) {
        (
            [
                (header::CONTENT_TYPE.as_str(), "application/json"),
                ("mcp-session-id", "direct-1"),
            ],
            reply.to_string(),
        )
            .into_response()
    } else {
        (
            [
                (header::CONTENT_TYPE.as_str(), "text/event-stream"),
                ("mcp-session-id", "direct-1"),
            ],
            message_event(&reply),
        )
            .into_response()
    }
}

async fn open_stream(State(state): State<Arc<FakeState>>, headers: HeaderMap) -> Response {
    state.headers.lock().push(headers);
    let n = state.connections.fetch_add(1, Ordering::SeqCst) + 1;
    let session_id = format!("sess-{n}");

    let (tx, rx) = mpsc::channel(32);
    tx.send(Ok(": connected\n\n".to_string())).await.unwrap();
    tx.send(Ok(format!(
        "event: endpoint\ndata: /messages/?session_id={session_id}\n\n"
    )))
    .await
    .unwrap();
    state.sessions.lock().insert(session_id, tx);

    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response()
}

async fn silent_stream() -> Response {
    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        "event: ping\ndata: hello\n\n",
    )
        .into_response()
}

async fn submit(
    State(state): State<Arc<FakeState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let request: Value = serde_json::from_slice(&body).unwrap();
    state.requests.lock().push(request.clone());
    state.headers.lock().push(headers);

    let Some(sender) = query
        .get("session_id")
        .and_then(|id| state.sessions.lock().get(id).cloned())
    else {
        return StatusCode::NOT_FOUND;
    };
    if let Some(reply) = answer(&request) {
        let _ = sender.send(Ok(message_event(&reply))).await;
    }
    StatusCode::ACCEPTED
}
