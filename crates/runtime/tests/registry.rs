mod common;

use std::sync::Arc;

use common::FakeServices;
use runtime::{SqliteToolCache, ToolCache, ToolError, ToolRegistry};
use serde_json::{Map, json};
use storage::ToolCacheStore;
use tokio_util::sync::CancellationToken;

fn cache() -> Arc<SqliteToolCache> {
    Arc::new(SqliteToolCache::new(ToolCacheStore::in_memory().unwrap()))
}

#[tokio::test]
async fn listing_is_written_to_cache() {
    let services = FakeServices::start().await;
    let cache = cache();
    let registry = ToolRegistry::new(services.configs()).with_cache(cache.clone());

    assert_eq!(registry.load(&CancellationToken::new()).await, 4);
    let cached = cache.load("weather").unwrap();
    assert_eq!(cached.len(), 2);
    assert_eq!(cached[0].name, "forecast");
}

#[tokio::test]
async fn cached_tools_skip_listing() {
    let services = FakeServices::start().await;
    let cache = cache();
    let only_alerts: mcp::Tool = serde_json::from_value(json!({
        "name": "alerts",
        "description": "Cached alerts",
        "inputSchema": {"type": "object"}
    }))
    .unwrap();
    cache.store("weather", &[only_alerts]);

    let registry = ToolRegistry::new(services.configs()).with_cache(cache.clone());
    let cancel = CancellationToken::new();
    assert_eq!(registry.load(&cancel).await, 3);
    assert_eq!(
        services.methods("weather"),
        ["initialize", "notifications/initialized"]
    );

    // A refresh asks the service and rewrites the cache.
    assert_eq!(registry.refresh_tools("weather", &cancel).await.unwrap(), 2);
    assert_eq!(cache.load("weather").unwrap().len(), 2);
    assert_eq!(registry.available_tools(None).await.len(), 4);
}

#[tokio::test]
async fn call_ping_and_reload() {
    let services = FakeServices::start().await;
    let registry = ToolRegistry::new(services.configs());
    let cancel = CancellationToken::new();
    registry.load(&cancel).await;

    let mut args = Map::new();
    args.insert("city".to_string(), json!("Lima"));
    let output = registry
        .call_tool("weather", "forecast", args, &cancel)
        .await
        .unwrap();
    assert_eq!(output.result.text(), "sunny in Lima");
    assert_eq!(output.description, "Forecast for a city");

    let err = registry
        .call_tool("clock", "fail", Map::new(), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err, ToolError::Execution("boom".into()));

    registry.ping("clock", &cancel).await.unwrap();
    assert!(matches!(
        registry.ping("missing", &cancel).await,
        Err(ToolError::Unavailable(_))
    ));

    assert_eq!(registry.reload(&cancel).await, 4);
    assert_eq!(
        services
            .methods("clock")
            .iter()
            .filter(|m| *m == "initialize")
            .count(),
        2
    );

    registry.close().await;
    assert!(registry.services().await.is_empty());
}
