use serde::{Deserialize, Serialize};
use storage::CallStatus;
use thiserror::Error;

/// Errors that can occur while executing a single tool call.
///
/// These never abort a run; they are reported back to the model as an
/// error tool result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    Unknown(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("service error: {0}")]
    Remote(String),
    #[error("execution failed: {0}")]
    Execution(String),
}

impl ToolError {
    /// Audit status for a call that failed this way.
    pub fn status(&self) -> CallStatus {
        match self {
            ToolError::Timeout(_) => CallStatus::Timeout,
            _ => CallStatus::Failed,
        }
    }

    /// Whether the call never reached a tool.
    pub fn is_rejected(&self) -> bool {
        matches!(self, ToolError::Unknown(_) | ToolError::InvalidArguments(_))
    }

    pub(crate) fn from_mcp(service: &str, err: mcp::Error) -> Self {
        match err {
            mcp::Error::Timeout | mcp::Error::Cancelled => {
                ToolError::Timeout(format!("{service}: {err}"))
            }
            mcp::Error::ToolCallFailed(text) => ToolError::Execution(text),
            mcp::Error::JsonRpc(e) => ToolError::Remote(format!("{service}: {e}")),
            other => ToolError::Unavailable(format!("{service}: {other}")),
        }
    }
}
