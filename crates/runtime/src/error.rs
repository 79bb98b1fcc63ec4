use crate::model::ModelError;
use crate::tools::ToolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("model call failed: {0}")]
    Model(#[from] ModelError),

    #[error("run cancelled")]
    Cancelled,

    #[error(transparent)]
    Mcp(#[from] mcp::Error),

    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Storage(#[from] storage::Error),

    #[error(transparent)]
    Policy(#[from] policy::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
