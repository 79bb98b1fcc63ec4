//! SQLite-backed persistence for skiff.
//!
//! Two stores share one database file:
//!
//! - [`CallLogStore`] keeps an audit row for every tool call a run makes:
//!   what was asked, what came back, how it ended and how long it took.
//! - [`ToolCacheStore`] remembers the descriptors each service last
//!   returned from `tools/list`, so startup can skip the listing.
//!
//! # Example
//!
//! ```no_run
//! use storage::{CallLogStore, CallRecord, CallStatus};
//!
//! let store = CallLogStore::open("skiff.db")?;
//!
//! let record = CallRecord::new("conv-1", Some("clock".into()), "get_time", "{}")
//!     .succeeded("2024-01-01T00:00:00Z", 42);
//! store.append(&record)?;
//!
//! for call in store.load_conversation("conv-1")? {
//!     println!("{} {}: {}", call.origin(), call.tool, call.status);
//! }
//! # Ok::<(), storage::Error>(())
//! ```

mod error;
mod record;
mod store;

pub use error::{Error, Result};
pub use record::{CallRecord, CallStatus};
pub use store::{CallLogStore, ConversationSummary, ToolCacheStore};
