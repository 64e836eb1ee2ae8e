//! Common test utilities for plugin host integration tests.
//!
//! This module provides shared fixtures, helpers, and recording
//! implementations for integration testing across the crate.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use plugin_host::{
    ApiConfig, ApiServer, Event, EventHandler, HookError, HookResult, HostConfig, LifecyclePhase,
    MetricsService, Plugin, PluginContext, PluginHost, PluginMetadata,
};
use tokio::sync::oneshot;

// ========== Test Configuration ==========

/// Default test timeout duration.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Get a unique port for testing (to avoid conflicts).
static PORT_COUNTER: AtomicU64 = AtomicU64::new(18480);

pub fn get_test_port() -> u16 {
    PORT_COUNTER.fetch_add(1, Ordering::SeqCst) as u16
}

/// Get a test socket address.
pub fn get_test_addr() -> String {
    format!("127.0.0.1:{}", get_test_port())
}

/// A host with metrics disabled.
pub fn test_host() -> Arc<PluginHost> {
    test_host_with(HostConfig::default())
}

/// A host with the given configuration and metrics disabled.
pub fn test_host_with(config: HostConfig) -> Arc<PluginHost> {
    Arc::new(PluginHost::with_metrics(
        config,
        Arc::new(MetricsService::disabled()),
    ))
}

// ========== Test Fixtures ==========

/// Test fixture for the API server on a real socket.
pub struct TestServer {
    pub addr: String,
    pub host: Arc<PluginHost>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl TestServer {
    /// Create a new test server (not started).
    pub fn new() -> Self {
        Self::with_host(test_host())
    }

    /// Create a test server for an existing host.
    pub fn with_host(host: Arc<PluginHost>) -> Self {
        Self {
            addr: get_test_addr(),
            host,
            shutdown_tx: None,
        }
    }

    /// Get the full URL for an endpoint.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Start the server in a background task.
    pub async fn start(&mut self) {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        self.shutdown_tx = Some(shutdown_tx);

        let api_config = ApiConfig {
            listen_address: self.addr.clone(),
            cors_enabled: true,
            cors_origins: vec!["*".to_string()],
        };

        let server = ApiServer::new(api_config, self.host.clone());
        let addr = self.addr.clone();

        tokio::spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = server.run_until(&addr, shutdown).await {
                eprintln!("Test server error: {}", e);
            }
        });

        // Wait for server to be ready
        wait_for_server(&self.addr).await;
    }

    /// Stop the server.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Default for TestServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared, ordered log of hook invocations ("plugin:phase").
#[derive(Clone, Default)]
pub struct HookLog(Arc<Mutex<Vec<String>>>);

impl HookLog {
    pub fn record(&self, plugin_id: &str, phase: LifecyclePhase) {
        self.0
            .lock()
            .unwrap()
            .push(format!("{}:{}", plugin_id, phase));
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Entries for one phase, plugin ids only.
    pub fn plugins_for(&self, phase: LifecyclePhase) -> Vec<String> {
        let suffix = format!(":{}", phase);
        self.entries()
            .into_iter()
            .filter_map(|entry| entry.strip_suffix(&suffix).map(str::to_string))
            .collect()
    }
}

/// Plugin that records every hook call and can be told to fail one phase.
pub struct RecordingPlugin {
    metadata: PluginMetadata,
    log: HookLog,
    fail_on: Option<LifecyclePhase>,
    hook_delay: Option<Duration>,
}

impl RecordingPlugin {
    pub fn new(id: &str, log: &HookLog) -> Self {
        Self {
            metadata: PluginMetadata::new(id, format!("Recording {}", id), "1.0.0"),
            log: log.clone(),
            fail_on: None,
            hook_delay: None,
        }
    }

    pub fn depends_on(mut self, dependency: &str) -> Self {
        self.metadata = self.metadata.with_dependency(dependency);
        self
    }

    pub fn failing_on(mut self, phase: LifecyclePhase) -> Self {
        self.fail_on = Some(phase);
        self
    }

    /// Sleep this long inside every hook.
    pub fn slow(mut self, delay: Duration) -> Self {
        self.hook_delay = Some(delay);
        self
    }

    pub fn build(self) -> Arc<dyn Plugin> {
        Arc::new(self)
    }

    async fn run(&self, ctx: &PluginContext, phase: LifecyclePhase) -> HookResult {
        if let Some(delay) = self.hook_delay {
            tokio::time::sleep(delay).await;
        }
        self.log.record(ctx.plugin_id(), phase);
        if self.fail_on == Some(phase) {
            return Err(HookError::failed(format!("{} refused", phase)));
        }
        Ok(())
    }
}

#[async_trait]
impl Plugin for RecordingPlugin {
    fn metadata(&self) -> PluginMetadata {
        self.metadata.clone()
    }

    async fn initialize(&self, ctx: &PluginContext) -> HookResult {
        self.run(ctx, LifecyclePhase::Initialize).await
    }

    async fn start(&self, ctx: &PluginContext) -> HookResult {
        self.run(ctx, LifecyclePhase::Start).await
    }

    async fn stop(&self, ctx: &PluginContext) -> HookResult {
        self.run(ctx, LifecyclePhase::Stop).await
    }

    async fn uninstall(&self, ctx: &PluginContext) -> HookResult {
        self.run(ctx, LifecyclePhase::Uninstall).await
    }
}

/// Handler that keeps every event it receives.
#[derive(Default)]
pub struct CollectingHandler {
    events: Mutex<Vec<Arc<Event>>>,
}

impl CollectingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Arc<Event>> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

#[async_trait]
impl EventHandler for CollectingHandler {
    async fn handle(&self, event: Arc<Event>) -> plugin_host::bus::HandlerResult {
        self.events.lock().unwrap().push(event);
        Ok(())
    }

    fn name(&self) -> &str {
        "collecting"
    }
}

// ========== HTTP Client Helpers ==========

/// Send a bodiless HTTP request and return (status, body).
pub async fn http_request(method: &str, url: &str) -> Result<(u16, String), String> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    let url = url.trim_start_matches("http://");
    let (host_port, path) = url
        .split_once('/')
        .map(|(h, p)| (h, format!("/{}", p)))
        .unwrap_or((url, "/".to_string()));

    let mut stream = TcpStream::connect(host_port)
        .await
        .map_err(|e| format!("Connection failed: {}", e))?;

    let request = format!(
        "{} {} HTTP/1.1\r\nHost: {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        method, path, host_port
    );

    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| format!("Write failed: {}", e))?;

    let mut response = Vec::new();
    stream
        .read_to_end(&mut response)
        .await
        .map_err(|e| format!("Read failed: {}", e))?;

    let response_str = String::from_utf8_lossy(&response);

    // Parse status code
    let status_line = response_str
        .lines()
        .next()
        .ok_or_else(|| "Empty response".to_string())?;

    let status_code: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| "Invalid status code".to_string())?;

    // Parse body
    let body = response_str
        .split("\r\n\r\n")
        .nth(1)
        .unwrap_or("")
        .to_string();

    Ok((status_code, body))
}

pub async fn http_get(url: &str) -> Result<(u16, String), String> {
    http_request("GET", url).await
}

pub async fn http_post(url: &str) -> Result<(u16, String), String> {
    http_request("POST", url).await
}

pub async fn http_delete(url: &str) -> Result<(u16, String), String> {
    http_request("DELETE", url).await
}

// ========== Wait Helpers ==========

/// Wait for a server to be ready (up to 5 seconds).
pub async fn wait_for_server(addr: &str) {
    use tokio::net::TcpStream;

    for _ in 0..50 {
        if TcpStream::connect(addr).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    panic!("Server at {} failed to start within 5 seconds", addr);
}

/// Wait with timeout helper.
pub async fn with_timeout<F, T>(future: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(TEST_TIMEOUT, future)
        .await
        .expect("Test timed out")
}

/// Poll `condition` until it holds or the test timeout elapses.
pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    with_timeout(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}

// ========== Assertion Helpers ==========

/// Assert that a JSON response contains expected fields.
pub fn assert_json_contains(json: &str, field: &str) {
    assert!(
        json.contains(field),
        "JSON response should contain '{}', got: {}",
        field,
        json
    );
}

/// Assert HTTP status code.
pub fn assert_status(expected: u16, actual: u16) {
    assert_eq!(
        expected, actual,
        "Expected HTTP status {}, got {}",
        expected, actual
    );
}
