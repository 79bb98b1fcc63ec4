//! MCP (Model Context Protocol) client library.
//!
//! Talks JSON-RPC 2.0 to remote tool services over HTTP, either as one
//! POST per request ([`DirectTransport`]) or as posted requests whose
//! replies come back on a long-lived event stream ([`StreamTransport`]).
//!
//! # Example
//!
//! ```no_run
//! use mcp::{McpClient, ServiceConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> mcp::Result<()> {
//! let config = ServiceConfig::stream("http://localhost:8931/sse").with_credential("token");
//! let client = McpClient::new("weather", &config)?;
//! let cancel = CancellationToken::new();
//!
//! client.initialize(&cancel).await?;
//! for tool in client.list_tools(&cancel).await? {
//!     println!("Tool: {}", tool.name);
//! }
//!
//! let mut args = serde_json::Map::new();
//! args.insert("city".to_string(), "Oslo".into());
//! let result = client.call_tool("forecast", Some(args), &cancel).await?;
//! println!("{}", result.text());
//!
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod correlator;
mod discovery;
mod error;
mod protocol;
pub mod sse;
mod transport;

pub use client::McpClient;
pub use config::{DEFAULT_TIMEOUT, EndpointConfig, ServiceConfig};
pub use correlator::{Correlator, PendingReply};
pub use discovery::{EndpointDiscovery, QueryParamDiscovery, SessionEndpoint};
pub use error::{Error, Result};
pub use protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, JsonRpcError,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsResult, PROTOCOL_VERSION,
    RequestId, ServerCapabilities, ServerInfo, Tool, ToolContent, decode, encode,
    encode_notification,
};
pub use transport::{
    AnyTransport, CLOSE_TIMEOUT, DirectTransport, SESSION_HEADER, StreamTransport, Transport,
};
