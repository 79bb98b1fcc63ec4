//! MCP error types.

use crate::protocol::{JsonRpcError, RequestId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid service config: {0}")]
    Config(String),

    #[error("initialization failed: {0}")]
    Init(String),

    #[error("client not initialized")]
    NotInitialized,

    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("timeout waiting for response")]
    Timeout,

    #[error("request cancelled")]
    Cancelled,

    #[error("event stream closed")]
    ConnectionClosed,

    #[error("event larger than {0} bytes")]
    EventTooLarge(usize),

    #[error("request id already pending: {0}")]
    DuplicateRequestId(RequestId),

    #[error("failed to serialize request: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("malformed envelope: {0}")]
    Decode(String),

    #[error("JSON-RPC error: {0}")]
    JsonRpc(#[from] JsonRpcError),

    #[error("tool call failed: {0}")]
    ToolCallFailed(String),
}

impl Error {
    /// True when the request gave up waiting rather than failing outright.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout | Error::Cancelled)
    }

    pub(crate) fn network(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout
        } else {
            Error::Network(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
