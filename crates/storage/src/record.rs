//! Audit records for remote and local tool calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of a recorded call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Success,
    Failed,
    Timeout,
}

impl CallStatus {
    /// Stored form: 1 success, 0 failed, 2 timeout.
    pub fn code(self) -> i64 {
        match self {
            CallStatus::Failed => 0,
            CallStatus::Success => 1,
            CallStatus::Timeout => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(CallStatus::Failed),
            1 => Some(CallStatus::Success),
            2 => Some(CallStatus::Timeout),
            _ => None,
        }
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CallStatus::Success => "success",
            CallStatus::Failed => "failed",
            CallStatus::Timeout => "timeout",
        })
    }
}

/// One executed tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: Uuid,
    pub conversation_id: String,
    /// `None` for local tools.
    pub service: Option<String>,
    pub tool: String,
    pub request_payload: String,
    pub response_payload: Option<String>,
    pub status: CallStatus,
    pub error_message: Option<String>,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl CallRecord {
    /// A record for a call about to start, marked successful until told otherwise.
    pub fn new(
        conversation_id: impl Into<String>,
        service: Option<String>,
        tool: impl Into<String>,
        request_payload: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id: conversation_id.into(),
            service,
            tool: tool.into(),
            request_payload: request_payload.into(),
            response_payload: None,
            status: CallStatus::Success,
            error_message: None,
            duration_ms: 0,
            created_at: Utc::now(),
        }
    }

    pub fn succeeded(mut self, response_payload: impl Into<String>, duration_ms: u64) -> Self {
        self.status = CallStatus::Success;
        self.response_payload = Some(response_payload.into());
        self.duration_ms = duration_ms;
        self
    }

    pub fn failed(mut self, status: CallStatus, error: impl Into<String>, duration_ms: u64) -> Self {
        self.status = status;
        self.error_message = Some(error.into());
        self.duration_ms = duration_ms;
        self
    }

    /// Service name or `local`.
    pub fn origin(&self) -> &str {
        self.service.as_deref().unwrap_or("local")
    }
}
