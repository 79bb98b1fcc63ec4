//! Descriptor cache consulted before asking a service for its tools.

use std::path::Path;

use parking_lot::Mutex;
use storage::ToolCacheStore;
use tracing::warn;

/// Remembers the tools each service last reported.
///
/// Failures are swallowed by implementations: a cache miss only costs a
/// `tools/list` round trip.
pub trait ToolCache: Send + Sync {
    fn load(&self, service: &str) -> Option<Vec<mcp::Tool>>;

    fn store(&self, service: &str, tools: &[mcp::Tool]);
}

/// [`ToolCache`] backed by the SQLite `tool_cache` table.
pub struct SqliteToolCache {
    store: Mutex<ToolCacheStore>,
}

impl SqliteToolCache {
    pub fn new(store: ToolCacheStore) -> Self {
        Self {
            store: Mutex::new(store),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> storage::Result<Self> {
        Ok(Self::new(ToolCacheStore::open(path)?))
    }

    /// Drop the cached tools of `service`.
    pub fn invalidate(&self, service: &str) -> bool {
        match self.store.lock().clear(service) {
            Ok(removed) => removed,
            Err(e) => {
                warn!(service, error = %e, "failed to clear tool cache");
                false
            }
        }
    }
}

impl ToolCache for SqliteToolCache {
    fn load(&self, service: &str) -> Option<Vec<mcp::Tool>> {
        let value = match self.store.lock().get(service) {
            Ok(value) => value?,
            Err(e) => {
                warn!(service, error = %e, "failed to read tool cache");
                return None;
            }
        };
        match serde_json::from_value(value) {
            Ok(tools) => Some(tools),
            Err(e) => {
                warn!(service, error = %e, "ignoring malformed tool cache entry");
                None
            }
        }
    }

    fn store(&self, service: &str, tools: &[mcp::Tool]) {
        let value = match serde_json::to_value(tools) {
            Ok(value) => value,
            Err(e) => {
                warn!(service, error = %e, "failed to serialize tools for cache");
                return;
            }
        };
        if let Err(e) = self.store.lock().put(service, &value) {
            warn!(service, error = %e, "failed to write tool cache");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stores_and_loads_tools() {
        let cache = SqliteToolCache::new(ToolCacheStore::in_memory().unwrap());
        assert!(cache.load("clock").is_none());

        let tool: mcp::Tool = serde_json::from_value(json!({
            "name": "get_time",
            "description": "Current time",
            "inputSchema": {"type": "object", "properties": {}}
        }))
        .unwrap();
        cache.store("clock", std::slice::from_ref(&tool));

        assert_eq!(cache.load("clock"), Some(vec![tool]));
        assert!(cache.invalidate("clock"));
        assert!(cache.load("clock").is_none());
    }
}
