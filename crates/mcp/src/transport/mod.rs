//! Ways of moving envelopes to a service and replies back.

mod direct;
mod stream;

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::config::ServiceConfig;
use crate::error::Result;
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

pub use direct::DirectTransport;
pub use stream::{CLOSE_TIMEOUT, StreamTransport};

/// Session id header echoed back to servers that assign one.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Moves one request to a service and returns its matching reply.
pub trait Transport: Send + Sync {
    /// Make sure a connection is open and return its generation. The
    /// generation changes whenever a new connection replaces an old one,
    /// which means the service has forgotten any earlier handshake.
    fn connect(&self, cancel: &CancellationToken) -> impl Future<Output = Result<u64>> + Send;

    fn send(
        &self,
        request: &JsonRpcRequest,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<JsonRpcResponse>> + Send;

    fn notify(
        &self,
        notification: &JsonRpcNotification,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Release the connection. Safe to call more than once.
    fn close(&self) -> impl Future<Output = Result<()>> + Send;

    fn session_id(&self) -> Option<String>;
}

/// Either transport, chosen from a [`ServiceConfig`].
#[derive(Debug)]
pub enum AnyTransport {
    Direct(DirectTransport),
    Stream(StreamTransport),
}

impl AnyTransport {
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        Ok(match config {
            ServiceConfig::Direct(endpoint) => Self::Direct(DirectTransport::new(endpoint)?),
            ServiceConfig::Stream(endpoint) => Self::Stream(StreamTransport::new(endpoint)?),
        })
    }
}

impl From<DirectTransport> for AnyTransport {
    fn from(transport: DirectTransport) -> Self {
        Self::Direct(transport)
    }
}

impl From<StreamTransport> for AnyTransport {
    fn from(transport: StreamTransport) -> Self {
        Self::Stream(transport)
    }
}

impl Transport for AnyTransport {
    async fn connect(&self, cancel: &CancellationToken) -> Result<u64> {
        match self {
            Self::Direct(t) => t.connect(cancel).await,
            Self::Stream(t) => t.connect(cancel).await,
        }
    }

    async fn send(
        &self,
        request: &JsonRpcRequest,
        cancel: &CancellationToken,
    ) -> Result<JsonRpcResponse> {
        match self {
            Self::Direct(t) => t.send(request, cancel).await,
            Self::Stream(t) => t.send(request, cancel).await,
        }
    }

    async fn notify(
        &self,
        notification: &JsonRpcNotification,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match self {
            Self::Direct(t) => t.notify(notification, cancel).await,
            Self::Stream(t) => t.notify(notification, cancel).await,
        }
    }

    async fn close(&self) -> Result<()> {
        match self {
            Self::Direct(t) => t.close().await,
            Self::Stream(t) => t.close().await,
        }
    }

    fn session_id(&self) -> Option<String> {
        match self {
            Self::Direct(t) => t.session_id(),
            Self::Stream(t) => t.session_id(),
        }
    }
}

/// Build the shared HTTP client. No overall timeout: the event stream
/// stays open indefinitely, so deadlines are set per request instead.
pub(crate) fn http_client(connect_timeout: std::time::Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .build()
        .map_err(|e| crate::Error::Config(format!("failed to build HTTP client: {e}")))
}

/// Read an error body for an unsuccessful status.
pub(crate) async fn http_error(response: reqwest::Response) -> crate::Error {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    crate::Error::Http { status, body }
}
