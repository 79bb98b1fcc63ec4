//! Tool filter errors.

use thiserror::Error;

/// Errors from loading a [`ToolFilter`](crate::ToolFilter).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The filter is well-formed TOML but makes no sense.
    #[error("invalid tool filter: {0}")]
    Invalid(String),

    /// Failed to parse a filter file.
    #[error("failed to parse tool filter: {0}")]
    Parse(String),

    /// An I/O error occurred while reading a filter file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
