//! Registry of remote services and the tools they expose.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use mcp::{CallToolResult, McpClient, ServiceConfig};
use policy::ToolFilter;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ToolCache, ToolDescriptor, ToolError};
use crate::model::ToolSpec;

/// Separates service and tool in a model-facing tool name.
pub const NAME_SEPARATOR: &str = "__";

/// `service__tool`.
pub fn qualified_name(service: &str, tool: &str) -> String {
    format!("{service}{NAME_SEPARATOR}{tool}")
}

/// Split a model-facing name into service and tool. Service names never
/// contain the separator, so the first occurrence is the split point.
pub fn split_qualified(name: &str) -> Option<(&str, &str)> {
    name.split_once(NAME_SEPARATOR)
        .filter(|(service, tool)| !service.is_empty() && !tool.is_empty())
}

/// A successful remote call.
#[derive(Debug, Clone)]
pub struct RemoteOutput {
    pub result: CallToolResult,
    /// Description of the tool that ran.
    pub description: String,
}

struct RemoteService {
    client: McpClient,
    tools: parking_lot::RwLock<Vec<ToolDescriptor>>,
}

/// Owns one client per configured service.
///
/// Built explicitly and handed to the orchestrator. Services that fail to
/// come up are logged and left out; the rest stay usable.
pub struct ToolRegistry {
    configs: BTreeMap<String, ServiceConfig>,
    services: RwLock<BTreeMap<String, Arc<RemoteService>>>,
    cache: Option<Arc<dyn ToolCache>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("configured", &self.configs.keys().collect::<Vec<_>>())
            .field("cached", &self.cache.is_some())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new(configs: BTreeMap<String, ServiceConfig>) -> Self {
        Self {
            configs,
            services: RwLock::new(BTreeMap::new()),
            cache: None,
        }
    }

    /// A registry with no services, for runs that only use local tools.
    pub fn empty() -> Self {
        Self::new(BTreeMap::new())
    }

    pub fn with_cache(mut self, cache: Arc<dyn ToolCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Connect to every enabled service and collect its tools. Returns the
    /// number of tools registered.
    pub async fn load(&self, cancel: &CancellationToken) -> usize {
        let mut loaded = BTreeMap::new();
        let mut total = 0;

        for (name, config) in &self.configs {
            if !config.is_enabled() {
                debug!(service = %name, "service disabled, skipping");
                continue;
            }
            if name.is_empty() || name.contains(NAME_SEPARATOR) {
                warn!(service = %name, "service name is empty or contains the separator, skipping");
                continue;
            }
            match self.connect(name, config, cancel).await {
                Ok(service) => {
                    let count = service.tools.read().len();
                    info!(service = %name, tools = count, "service registered");
                    total += count;
                    loaded.insert(name.clone(), Arc::new(service));
                }
                Err(e) => warn!(service = %name, error = %e, "service unavailable, its tools are skipped"),
            }
        }

        *self.services.write().await = loaded;
        total
    }

    /// Close every client and load again.
    pub async fn reload(&self, cancel: &CancellationToken) -> usize {
        self.close().await;
        self.load(cancel).await
    }

    async fn connect(
        &self,
        name: &str,
        config: &ServiceConfig,
        cancel: &CancellationToken,
    ) -> mcp::Result<RemoteService> {
        let client = McpClient::new(name, config)?;
        if let Err(e) = client.initialize(cancel).await {
            if let Err(close) = client.close().await {
                debug!(service = %name, error = %close, "close after failed initialize");
            }
            return Err(e);
        }

        let cached = self
            .cache
            .as_ref()
            .and_then(|cache| cache.load(name))
            .filter(|tools| !tools.is_empty());
        let tools = match cached {
            Some(tools) => {
                debug!(service = %name, tools = tools.len(), "using cached tools");
                tools
            }
            None => {
                let tools = client.list_tools(cancel).await?;
                if let Some(cache) = &self.cache {
                    cache.store(name, &tools);
                }
                tools
            }
        };

        Ok(RemoteService {
            client,
            tools: parking_lot::RwLock::new(tools.iter().map(ToolDescriptor::from_wire).collect()),
        })
    }

    async fn service(&self, name: &str) -> Option<Arc<RemoteService>> {
        self.services.read().await.get(name).cloned()
    }

    /// Ask a service for its tools again, bypassing the cache.
    pub async fn refresh_tools(
        &self,
        service: &str,
        cancel: &CancellationToken,
    ) -> Result<usize, ToolError> {
        let remote = self
            .service(service)
            .await
            .ok_or_else(|| ToolError::Unavailable(format!("{service}: not registered")))?;
        let tools = remote
            .client
            .list_tools(cancel)
            .await
            .map_err(|e| ToolError::from_mcp(service, e))?;
        if let Some(cache) = &self.cache {
            cache.store(service, &tools);
        }
        let descriptors: Vec<_> = tools.iter().map(ToolDescriptor::from_wire).collect();
        let count = descriptors.len();
        *remote.tools.write() = descriptors;
        Ok(count)
    }

    /// Names of the services that came up.
    pub async fn services(&self) -> Vec<String> {
        self.services.read().await.keys().cloned().collect()
    }

    /// Every registered tool with its service.
    pub async fn descriptors(&self) -> Vec<(String, ToolDescriptor)> {
        let services = self.services.read().await;
        services
            .iter()
            .flat_map(|(name, service)| {
                service
                    .tools
                    .read()
                    .iter()
                    .map(|tool| (name.clone(), tool.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Model-facing specs of the tools `filter` admits, namespaced as
    /// `service__tool`. No filter admits everything.
    pub async fn available_tools(&self, filter: Option<&ToolFilter>) -> Vec<ToolSpec> {
        let mut seen = HashSet::new();
        let mut specs = Vec::new();
        for (service, tool) in self.descriptors().await {
            let decision = policy::check(filter, &service, &tool.name);
            if !decision.is_allowed() {
                debug!(service = %service, tool = %tool.name, ?decision, "tool filtered out");
                continue;
            }
            let name = qualified_name(&service, &tool.name);
            if seen.insert(name.clone()) {
                specs.push(tool.spec(name));
            }
        }
        specs
    }

    /// Call `tool` on `service`. Required parameters are checked before
    /// anything goes over the wire.
    pub async fn call_tool(
        &self,
        service: &str,
        tool: &str,
        arguments: Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<RemoteOutput, ToolError> {
        let remote = self
            .service(service)
            .await
            .ok_or_else(|| ToolError::Unknown(qualified_name(service, tool)))?;
        let descriptor = remote
            .tools
            .read()
            .iter()
            .find(|d| d.name == tool)
            .cloned()
            .ok_or_else(|| ToolError::Unknown(qualified_name(service, tool)))?;

        let missing = descriptor.schema.missing_required(&arguments);
        if !missing.is_empty() {
            return Err(ToolError::InvalidArguments(format!(
                "missing required parameter(s): {}",
                missing.join(", ")
            )));
        }

        let result = remote
            .client
            .call_tool(tool, Some(arguments), cancel)
            .await
            .map_err(|e| ToolError::from_mcp(service, e))?;
        Ok(RemoteOutput {
            result,
            description: descriptor.description,
        })
    }

    pub async fn ping(&self, service: &str, cancel: &CancellationToken) -> Result<(), ToolError> {
        let remote = self
            .service(service)
            .await
            .ok_or_else(|| ToolError::Unavailable(format!("{service}: not registered")))?;
        remote
            .client
            .ping(cancel)
            .await
            .map_err(|e| ToolError::from_mcp(service, e))
    }

    /// Close every client. Close errors are logged.
    pub async fn close(&self) {
        let services = std::mem::take(&mut *self.services.write().await);
        for (name, service) in services {
            if let Err(e) = service.client.close().await {
                warn!(service = %name, error = %e, "error closing service");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_names() {
        assert_eq!(qualified_name("clock", "get_time"), "clock__get_time");
        assert_eq!(split_qualified("clock__get_time"), Some(("clock", "get_time")));
        assert_eq!(split_qualified("clock__a__b"), Some(("clock", "a__b")));
        assert_eq!(split_qualified("get_time"), None);
        assert_eq!(split_qualified("__get_time"), None);
        assert_eq!(split_qualified("clock__"), None);
    }

    #[tokio::test]
    async fn empty_registry() {
        let registry = ToolRegistry::empty();
        assert_eq!(registry.load(&CancellationToken::new()).await, 0);
        assert!(registry.available_tools(None).await.is_empty());

        let err = registry
            .call_tool("clock", "get_time", Map::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, ToolError::Unknown("clock__get_time".into()));
        registry.close().await;
    }

    #[tokio::test]
    async fn unreachable_and_disabled_services_are_skipped() {
        let mut configs = BTreeMap::new();
        configs.insert(
            "down".to_string(),
            ServiceConfig::direct("http://127.0.0.1:9/mcp")
                .with_timeout(std::time::Duration::from_secs(1)),
        );
        let mut disabled = mcp::EndpointConfig::new("http://127.0.0.1:9/mcp");
        disabled.enabled = false;
        configs.insert("off".to_string(), ServiceConfig::Direct(disabled));
        configs.insert(
            "bad__name".to_string(),
            ServiceConfig::direct("http://127.0.0.1:9/mcp"),
        );

        let registry = ToolRegistry::new(configs);
        assert_eq!(registry.load(&CancellationToken::new()).await, 0);
        assert!(registry.services().await.is_empty());
    }
}
