//! Remote and local tools, and the registry that routes calls to them.

mod cache;
pub mod errors;
mod local;
mod registry;
mod schema;

pub use cache::{SqliteToolCache, ToolCache};
pub use errors::ToolError;
pub use local::{FnTool, LocalOutput, LocalTool, LocalTools};
pub use registry::{
    NAME_SEPARATOR, RemoteOutput, ToolRegistry, qualified_name, split_qualified,
};
pub use schema::{ParamSpec, ToolDescriptor, ToolSchema};
