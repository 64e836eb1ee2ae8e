//! API Integration Tests for the plugin host.
//!
//! These tests run the management API on a real socket and verify:
//! - Health check endpoint
//! - Plugin listing, lookup and lifecycle actions
//! - Extension resolution
//! - Metrics endpoint

mod common;

use common::*;
use plugin_host::{ExtensionInstance, ExtensionPointDescriptor, PluginBuilder};

// ========== Health Endpoint Tests ==========

#[tokio::test]
async fn test_health_endpoint_returns_200() {
    let mut server = TestServer::new();
    server.start().await;

    let (status, body) = with_timeout(http_get(&server.url("/health")))
        .await
        .unwrap();

    assert_status(200, status);
    assert_json_contains(&body, "\"status\":\"ok\"");
    assert_json_contains(&body, "version");
    assert_json_contains(&body, "uptime");

    server.stop().await;
}

// ========== Plugin Endpoint Tests ==========

#[tokio::test]
async fn test_plugin_lifecycle_over_http() {
    let log = HookLog::default();
    let host = test_host();
    host.registry()
        .register(RecordingPlugin::new("audit", &log).build())
        .await
        .unwrap();
    let mut server = TestServer::with_host(host.clone());
    server.start().await;

    // Arrange: initialize then start
    let (status, body) = with_timeout(http_post(&server.url("/plugins/audit/initialize")))
        .await
        .unwrap();
    assert_status(200, status);
    assert_json_contains(&body, "\"state\":\"initialized\"");

    let (status, _) = with_timeout(http_post(&server.url("/plugins/audit/start")))
        .await
        .unwrap();
    assert_status(200, status);

    // Act: uninstall
    let (status, body) = with_timeout(http_delete(&server.url("/plugins/audit")))
        .await
        .unwrap();

    // Assert
    assert_status(200, status);
    assert_json_contains(&body, "\"state\":\"uninstalled\"");
    assert_eq!(
        log.entries(),
        vec!["audit:initialize", "audit:start", "audit:stop", "audit:uninstall"]
    );
    assert!(!host.registry().contains("audit"));

    server.stop().await;
}

#[tokio::test]
async fn test_start_with_unmet_dependency_is_conflict() {
    let log = HookLog::default();
    let host = test_host();
    host.registry()
        .register(RecordingPlugin::new("base", &log).build())
        .await
        .unwrap();
    host.registry()
        .register(RecordingPlugin::new("app", &log).depends_on("base").build())
        .await
        .unwrap();
    host.registry().initialize("app").await.unwrap();
    let mut server = TestServer::with_host(host);
    server.start().await;

    let (status, body) = with_timeout(http_post(&server.url("/plugins/app/start")))
        .await
        .unwrap();

    assert_status(409, status);
    assert_json_contains(&body, "depends on 'base'");
    assert!(log.plugins_for(plugin_host::LifecyclePhase::Start).is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_list_plugins_returns_page() {
    let host = test_host();
    for id in ["one", "two", "three"] {
        host.install(PluginBuilder::new(id).build()).await.unwrap();
    }
    let mut server = TestServer::with_host(host);
    server.start().await;

    let (status, body) = with_timeout(http_get(&server.url("/plugins?page=1&size=2&sort=id")))
        .await
        .unwrap();

    assert_status(200, status);
    let page: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(page["total_elements"], 3);
    assert_eq!(page["content"].as_array().unwrap().len(), 1);
    assert_eq!(page["content"][0]["metadata"]["id"], "two");

    server.stop().await;
}

#[tokio::test]
async fn test_unknown_action_is_not_found() {
    let host = test_host();
    host.install(PluginBuilder::new("p").build()).await.unwrap();
    let mut server = TestServer::with_host(host);
    server.start().await;

    let (status, _) = with_timeout(http_post(&server.url("/plugins/p/explode")))
        .await
        .unwrap();

    assert_status(404, status);

    server.stop().await;
}

// ========== Extension Endpoint Tests ==========

#[tokio::test]
async fn test_stopped_plugin_extensions_are_not_listed() {
    let host = test_host();
    host.install(
        PluginBuilder::new("csv")
            .extension_point(ExtensionPointDescriptor::multiple("export.format", "Export formats"))
            .extension("export.format", 1, ExtensionInstance::from_value("csv"))
            .build(),
    )
    .await
    .unwrap();
    host.registry().stop("csv").await.unwrap();
    let mut server = TestServer::with_host(host);
    server.start().await;

    let (status, body) = with_timeout(http_get(&server.url("/extensions/export.format")))
        .await
        .unwrap();

    assert_status(200, status);
    let response: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert!(response["extensions"].as_array().unwrap().is_empty());
    assert_eq!(response["registered"], 1);

    server.stop().await;
}

// ========== Metrics Endpoint Tests ==========

#[tokio::test]
async fn test_metrics_endpoint_returns_200() {
    let mut server = TestServer::new();
    server.start().await;

    let (status, _) = with_timeout(http_get(&server.url("/metrics")))
        .await
        .unwrap();

    assert_status(200, status);

    server.stop().await;
}
