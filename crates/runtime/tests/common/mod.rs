//! Fake services and a scripted model for runtime tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use mcp::ServiceConfig;
use parking_lot::Mutex;
use runtime::{
    Backend, Message, ModelError, ModelRequest, ModelResponse, Part, Role, ToolCall, Usage,
};
use serde_json::{Value, json};
use storage::CallRecord;
use tokio_stream::StreamExt;

#[derive(Default)]
pub struct FakeState {
    /// `(service, method)` for every request seen.
    pub requests: Mutex<Vec<(String, String)>>,
}

/// Direct-mode services mounted at `/{service}`, plus a stream endpoint
/// that never announces where to post.
pub struct FakeServices {
    pub addr: SocketAddr,
    pub state: Arc<FakeState>,
}

impl FakeServices {
    pub async fn start() -> Self {
        let state = Arc::new(FakeState::default());
        let app = Router::new()
            .route("/silent", get(silent_stream))
            .route("/{service}", post(handle))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn direct(&self, service: &str) -> ServiceConfig {
        ServiceConfig::direct(format!("http://{}/{service}", self.addr))
    }

    pub fn silent_stream(&self) -> ServiceConfig {
        ServiceConfig::stream(format!("http://{}/silent", self.addr))
            .with_timeout(Duration::from_secs(1))
    }

    /// Both direct services.
    pub fn configs(&self) -> BTreeMap<String, ServiceConfig> {
        let mut configs = BTreeMap::new();
        configs.insert("clock".to_string(), self.direct("clock"));
        configs.insert("weather".to_string(), self.direct("weather"));
        configs
    }

    pub fn methods(&self, service: &str) -> Vec<String> {
        self.state
            .requests
            .lock()
            .iter()
            .filter(|(s, _)| s == service)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

fn tools_of(service: &str) -> Value {
    match service {
        "clock" => json!([
            {
                "name": "getTime",
                "description": "Current time",
                "inputSchema": {
                    "type": "object",
                    "properties": {"timezone": {"type": "string"}}
                }
            },
            {"name": "fail", "description": "Always fails", "inputSchema": {"type": "object"}}
        ]),
        "weather" => json!([
            {
                "name": "forecast",
                "description": "Forecast for a city",
                "inputSchema": {
                    "type": "object",
                    "properties": {"city": {"type": "string"}},
                    "required": ["city"]
                }
            },
            {"name": "alerts", "description": "Active alerts", "inputSchema": {"type": "object"}}
        ]),
        _ => json!([]),
    }
}

fn call_result(tool: &str, arguments: &Value) -> Value {
    match tool {
        "getTime" => json!({
            "content": [{"type": "text", "text": "2024-01-01T00:00:00Z"}],
            "structuredContent": {"iso": "2024-01-01T00:00:00Z"}
        }),
        "fail" => json!({"content": [{"type": "text", "text": "boom"}], "isError": true}),
        "forecast" => json!({
            "content": [{"type": "text", "text": format!("sunny in {}", arguments["city"].as_str().unwrap_or("?"))}]
        }),
        "alerts" => json!({"content": [{"type": "text", "text": "none"}]}),
        _ => json!({"content": [], "isError": true}),
    }
}

async fn handle(
    State(state): State<Arc<FakeState>>,
    Path(service): Path<String>,
    Json(request): Json<Value>,
) -> Response {
    let method = request["method"].as_str().unwrap_or_default().to_string();
    state.requests.lock().push((service.clone(), method.clone()));

    let Some(id) = request.get("id").cloned() else {
        return StatusCode::ACCEPTED.into_response();
    };
    let result = match method.as_str() {
        "initialize" => json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": service, "version": "0.0.1"}
        }),
        "tools/list" => json!({"tools": tools_of(&service)}),
        "ping" => json!({}),
        "tools/call" => call_result(
            request["params"]["name"].as_str().unwrap_or_default(),
            &request["params"]["arguments"],
        ),
        other => {
            return Json(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": format!("method not found: {other}")}
            }))
            .into_response();
        }
    };
    Json(json!({"jsonrpc": "2.0", "id": id, "result": result})).into_response()
}

/// Opens an event stream and then says nothing useful, forever.
async fn silent_stream() -> Response {
    let events = tokio_stream::once(Ok::<_, Infallible>(": connected\n\n"))
        .chain(tokio_stream::pending());
    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(events),
    )
        .into_response()
}

enum Step {
    Reply(Message),
    Fail,
}

/// A model that follows a script, then answers "done".
#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Step>>,
    /// Sent whenever tools are offered and the script is used up.
    repeat: Option<Message>,
    /// Fail calls that offer no tools.
    fail_without_tools: bool,
    /// Number of tools offered on each call.
    pub tool_counts: Mutex<Vec<usize>>,
    /// Every request's messages.
    pub seen: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_reply(self, message: Message) -> Self {
        self.script.lock().push_back(Step::Reply(message));
        self
    }

    pub fn then_fail(self) -> Self {
        self.script.lock().push_back(Step::Fail);
        self
    }

    pub fn repeating(mut self, message: Message) -> Self {
        self.repeat = Some(message);
        self
    }

    pub fn failing_without_tools(mut self) -> Self {
        self.fail_without_tools = true;
        self
    }

    fn next(&self, tools_offered: bool) -> Step {
        if !tools_offered && self.fail_without_tools {
            return Step::Fail;
        }
        if let Some(step) = self.script.lock().pop_front() {
            return step;
        }
        match &self.repeat {
            Some(message) if tools_offered => Step::Reply(message.clone()),
            _ => Step::Reply(Message::assistant("done")),
        }
    }
}

impl Backend for ScriptedBackend {
    async fn call(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        self.tool_counts.lock().push(request.tools.len());
        self.seen.lock().push(request.messages.to_vec());
        match self.next(!request.tools.is_empty()) {
            Step::Reply(message) => Ok(ModelResponse {
                message,
                usage: Usage {
                    input_tokens: 10,
                    output_tokens: 5,
                },
            }),
            Step::Fail => Err(ModelError::Api {
                status: 529,
                body: "overloaded".into(),
            }),
        }
    }
}

/// An assistant message asking for `(id, name, arguments)` calls.
pub fn calls(intents: &[(&str, &str, &str)]) -> Message {
    Message {
        role: Role::Assistant,
        parts: intents
            .iter()
            .map(|(id, name, arguments)| {
                Part::ToolCall(ToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    arguments: arguments.to_string(),
                })
            })
            .collect(),
    }
}

/// Collects audit records in memory.
#[derive(Default)]
pub struct MemoryAudit {
    pub records: Mutex<Vec<CallRecord>>,
}

impl runtime::AuditSink for MemoryAudit {
    fn record(&self, record: CallRecord) {
        self.records.lock().push(record);
    }
}
