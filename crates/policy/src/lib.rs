//! Tool access policy.
//!
//! Decides which remote tools a run may offer to the model, per service.

mod error;
mod filter;

pub use error::{Error, Result};
pub use filter::{Decision, ToolFilter, WILDCARD, check};
