//! Skiff runtime: drives a language model through bounded rounds of tool
//! calls against MCP services and in-process tools.
//!
//! # Overview
//!
//! - **[`ToolRegistry`]**: one [`mcp::McpClient`] per configured service,
//!   the tools each exposes, and routing of `service__tool` calls.
//! - **[`LocalTools`]**: tools implemented in this process.
//! - **[`Orchestrator`]**: the model/tool loop. Each round calls the
//!   [`Backend`], executes the requested tools in order and feeds the
//!   results back, until the model answers or the round budget runs out.
//! - **[`RunOutput`]**: documents, structured payloads and per-call
//!   outcomes gathered along the way, plus the final answer.
//!
//! # Example
//!
//! ```no_run
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! use runtime::{AnthropicBackend, Message, Orchestrator, RunOptions, ToolRegistry};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> runtime::Result<()> {
//! let mut services = BTreeMap::new();
//! services.insert("clock".to_string(), mcp::ServiceConfig::direct("http://localhost:8000/mcp"));
//!
//! let registry = Arc::new(ToolRegistry::new(services));
//! registry.load(&CancellationToken::new()).await;
//!
//! let backend = AnthropicBackend::builder("sk-ant-...", "claude-sonnet-4-20250514").build();
//! let orchestrator = Orchestrator::new(backend, registry.clone());
//!
//! let tools = orchestrator.available_tools(None).await;
//! let output = orchestrator
//!     .run(vec![Message::user("What time is it?")], tools, RunOptions::default())
//!     .await?;
//! println!("{}", output.final_answer);
//!
//! registry.close().await;
//! # Ok(())
//! # }
//! ```

mod aggregate;
mod audit;
mod conversation;
mod error;
pub mod model;
mod orchestrator;
mod progress;
pub mod providers;
pub mod tools;

pub use aggregate::{
    Aggregator, Document, DocumentMetadata, DocumentSource, RunOutput, Termination, ToolOutcome,
};
pub use audit::{AuditSink, NoopAudit, StoreAuditSink};
pub use conversation::Conversation;
pub use error::{Error, Result};
pub use model::{
    Backend, Message, ModelError, ModelRequest, ModelResponse, Part, Role, ToolCall, ToolResult,
    ToolSpec, Usage,
};
pub use orchestrator::{DEFAULT_MAX_ROUNDS, Orchestrator, RunOptions};
pub use progress::{Progress, SUMMARY_CHARS, summarize};
pub use providers::{AnthropicBackend, AnthropicBackendBuilder};
pub use tools::{
    FnTool, LocalOutput, LocalTool, LocalTools, RemoteOutput, SqliteToolCache, ToolCache,
    ToolDescriptor, ToolError, ToolRegistry, ToolSchema,
};
