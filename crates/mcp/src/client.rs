//! MCP client: session lifecycle and typed requests over a transport.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, JsonRpcNotification,
    JsonRpcRequest, ListToolsResult, RequestId, Tool,
};
use crate::transport::{AnyTransport, Transport};

/// Connection to one remote tool service.
///
/// Once initialized, every request first checks that the transport is
/// still on the connection the handshake was made on. A reopened
/// connection gets the handshake again before the request goes out.
#[derive(Debug)]
pub struct McpClient {
    name: String,
    transport: AnyTransport,
    next_id: AtomicI64,
    initialized: AtomicBool,
    /// Transport generation the last handshake was made on.
    generation: AtomicU64,
    handshake_lock: Mutex<()>,
    server_info: Mutex<Option<InitializeResult>>,
}

impl McpClient {
    /// Build a client for `config`. Nothing is sent until [`initialize`](Self::initialize).
    pub fn new(name: impl Into<String>, config: &ServiceConfig) -> Result<Self> {
        Ok(Self::with_transport(name, AnyTransport::from_config(config)?))
    }

    pub fn with_transport(name: impl Into<String>, transport: impl Into<AnyTransport>) -> Self {
        Self {
            name: name.into(),
            transport: transport.into(),
            next_id: AtomicI64::new(1),
            initialized: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            handshake_lock: Mutex::new(()),
            server_info: Mutex::new(None),
        }
    }

    /// Get the service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transport(&self) -> &AnyTransport {
        &self.transport
    }

    /// Perform the initialize handshake and announce readiness.
    pub async fn initialize(&self, cancel: &CancellationToken) -> Result<InitializeResult> {
        let _guard = self.handshake_lock.lock().await;
        self.handshake(cancel).await
    }

    async fn handshake(&self, cancel: &CancellationToken) -> Result<InitializeResult> {
        let generation = self
            .transport
            .connect(cancel)
            .await
            .map_err(into_init_error)?;
        let result: InitializeResult = self
            .exchange("initialize", Some(InitializeParams::default()), cancel)
            .await
            .map_err(into_init_error)?;

        self.transport
            .notify(
                &JsonRpcNotification::new("notifications/initialized"),
                cancel,
            )
            .await
            .map_err(into_init_error)?;

        debug!(
            service = %self.name,
            server = ?result.server_info.as_ref().map(|s| s.name.as_str()),
            protocol = %result.protocol_version,
            generation,
            "service initialized"
        );
        *self.server_info.lock().await = Some(result.clone());
        self.generation.store(generation, Ordering::SeqCst);
        self.initialized.store(true, Ordering::SeqCst);
        Ok(result)
    }

    /// Repeat the handshake when the transport has reconnected since the
    /// last one. Concurrent callers wait for a single handshake.
    async fn ensure_handshake(&self, cancel: &CancellationToken) -> Result<()> {
        if !self.is_initialized() {
            return Ok(());
        }
        if self.transport.connect(cancel).await? == self.generation.load(Ordering::SeqCst) {
            return Ok(());
        }

        let _guard = self.handshake_lock.lock().await;
        if !self.is_initialized() {
            return Ok(());
        }
        let current = self.transport.connect(cancel).await?;
        if current != self.generation.load(Ordering::SeqCst) {
            info!(
                service = %self.name,
                generation = current,
                "connection reopened; repeating handshake"
            );
            self.handshake(cancel).await?;
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Get server info (after initialization).
    pub async fn server_info(&self) -> Option<InitializeResult> {
        self.server_info.lock().await.clone()
    }

    pub async fn list_tools(&self, cancel: &CancellationToken) -> Result<Vec<Tool>> {
        let result: ListToolsResult = self.request("tools/list", None::<()>, cancel).await?;
        Ok(result.tools)
    }

    /// Call a tool by name. A result flagged as an error becomes
    /// [`Error::ToolCallFailed`].
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
        cancel: &CancellationToken,
    ) -> Result<CallToolResult> {
        if !self.is_initialized() {
            return Err(Error::NotInitialized);
        }

        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        let result: CallToolResult = self.request("tools/call", Some(params), cancel).await?;

        if result.is_error {
            return Err(Error::ToolCallFailed(result.text()));
        }
        Ok(result)
    }

    /// Liveness check.
    pub async fn ping(&self, cancel: &CancellationToken) -> Result<()> {
        let _: Value = self.request("ping", None::<()>, cancel).await?;
        Ok(())
    }

    /// Close the underlying connection. Safe to call more than once.
    pub async fn close(&self) -> Result<()> {
        self.initialized.store(false, Ordering::SeqCst);
        self.transport.close().await
    }

    pub fn session_id(&self) -> Option<String> {
        self.transport.session_id()
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Send a request and decode its result.
    pub async fn request<P, R>(
        &self,
        method: &str,
        params: Option<P>,
        cancel: &CancellationToken,
    ) -> Result<R>
    where
        P: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        self.ensure_handshake(cancel).await?;
        self.exchange(method, params, cancel).await
    }

    async fn exchange<P, R>(
        &self,
        method: &str,
        params: Option<P>,
        cancel: &CancellationToken,
    ) -> Result<R>
    where
        P: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        let mut request = JsonRpcRequest::new(self.next_request_id(), method);
        if let Some(p) = params {
            request = request.with_params(p)?;
        }

        let response = self.transport.send(&request, cancel).await?;
        let value = response.into_result()?;
        serde_json::from_value(value)
            .map_err(|e| Error::Decode(format!("unexpected {method} result: {e}")))
    }
}

fn into_init_error(err: Error) -> Error {
    match err {
        Error::Init(_) | Error::Cancelled => err,
        other => Error::Init(other.to_string()),
    }
}
