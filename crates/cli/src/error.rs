//! CLI error types.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;

/// CLI errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The call log does not exist yet.
    ///
    /// This typically means no question has been asked.
    #[error("call log not found at {path}. Run 'skiff ask' first")]
    DatabaseNotFound { path: PathBuf },

    /// No calls were logged for the given conversation.
    #[error("no calls logged for conversation '{0}'")]
    ConversationNotFound(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Runtime(#[from] runtime::Error),

    #[error(transparent)]
    Storage(#[from] storage::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
