//! HTTP management API for the plugin host.
//!
//! This module provides:
//! - Health check and Prometheus metrics endpoints
//! - Paged plugin listing and plugin lookup
//! - Lifecycle actions (initialize, start, stop, restart, uninstall)
//! - Extension resolution and event bus statistics

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::bridge::BridgeStatsSnapshot;
use crate::bus::BusStatsSnapshot;
use crate::config::ApiConfig;
use crate::error::Result;
use crate::extension::{ExtensionInfo, ExtensionPointDescriptor};
use crate::host::PluginHost;
use crate::metrics::{metrics_middleware, MetricsService};
use crate::page::{Page, PageRequest, SortDirection, SortKey};
use crate::plugin::{PluginDescriptor, PluginError, PluginState};

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" when a plugin failed or the bridge is unhealthy.
    pub status: String,

    /// Host version.
    pub version: String,

    /// Number of registered plugins.
    pub plugins: usize,

    /// Number of STARTED plugins.
    pub started: usize,

    /// Number of FAILED plugins.
    pub failed: usize,

    /// Host uptime in seconds.
    pub uptime: u64,

    /// Bridge health, when a bridge is attached.
    pub bridge: Option<crate::bridge::BridgeHealth>,
}

/// Shared application state for API handlers.
#[derive(Clone)]
pub struct AppState {
    /// The host being managed.
    pub host: Arc<PluginHost>,
    /// Metrics service for observability.
    pub metrics: Arc<MetricsService>,
}

impl AppState {
    /// State for a host, sharing its metrics service.
    pub fn new(host: Arc<PluginHost>) -> Self {
        let metrics = host.metrics().clone();
        Self { host, metrics }
    }
}

/// API server.
pub struct ApiServer {
    /// API configuration.
    config: ApiConfig,
    /// Shared application state.
    state: AppState,
}

/// Query parameters for the plugin listing.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Zero-based page index.
    pub page: Option<usize>,
    /// Page size.
    pub size: Option<usize>,
    /// Sort key (id, name, version, install_time, state).
    pub sort: Option<String>,
    /// Sort direction (asc, desc).
    pub direction: Option<String>,
}

impl ListQuery {
    fn to_request(&self) -> std::result::Result<PageRequest, String> {
        let defaults = PageRequest::default();
        let sort_key = match &self.sort {
            Some(sort) => sort.parse::<SortKey>()?,
            None => defaults.sort_key,
        };
        let direction = match &self.direction {
            Some(direction) => direction.parse::<SortDirection>()?,
            None => defaults.direction,
        };

        Ok(PageRequest::new(
            self.page.unwrap_or(defaults.page_index),
            self.size.unwrap_or(defaults.page_size),
        )
        .sorted_by(sort_key, direction))
    }
}

/// Live implementations of one extension point.
#[derive(Debug, Serialize, Deserialize)]
pub struct ExtensionPointResponse {
    pub point: ExtensionPointDescriptor,
    /// Resolvable registrations, in resolution order.
    pub extensions: Vec<ExtensionInfo>,
    /// All registrations, including those of plugins that are not started.
    pub registered: usize,
}

/// Subscriber count of one topic.
#[derive(Debug, Serialize, Deserialize)]
pub struct TopicInfo {
    pub topic: String,
    pub subscribers: usize,
}

/// Event bus and bridge statistics.
#[derive(Debug, Serialize, Deserialize)]
pub struct BusStatsResponse {
    pub bus: BusStatsSnapshot,
    pub topics: Vec<TopicInfo>,
    pub bridge: Option<BridgeStatsSnapshot>,
}

/// API error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    /// Error message.
    pub error: String,
}

type ApiResult<T> = std::result::Result<Json<T>, (StatusCode, Json<ApiError>)>;

fn api_error(status: StatusCode, error: impl ToString) -> (StatusCode, Json<ApiError>) {
    (
        status,
        Json(ApiError {
            error: error.to_string(),
        }),
    )
}

fn plugin_error(e: PluginError) -> (StatusCode, Json<ApiError>) {
    let status = match &e {
        PluginError::NotFound(_) | PluginError::UnknownExtensionPoint(_) => StatusCode::NOT_FOUND,
        PluginError::InvalidPageRequest(_) | PluginError::InvalidMetadata(_) => {
            StatusCode::BAD_REQUEST
        }
        PluginError::LifecycleHook { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        PluginError::DuplicateId(_)
        | PluginError::Retired(_)
        | PluginError::InvalidStateTransition { .. }
        | PluginError::DependencyNotSatisfied { .. }
        | PluginError::ExtensionPointConflict { .. }
        | PluginError::SingleImplementationViolation { .. } => StatusCode::CONFLICT,
    };
    api_error(status, e)
}

impl ApiServer {
    /// Create a new API server for a host.
    pub fn new(config: ApiConfig, host: Arc<PluginHost>) -> Self {
        Self::with_state(config, AppState::new(host))
    }

    /// Create a new API server with custom state.
    pub fn with_state(config: ApiConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Build the router with all routes.
    pub fn router(&self) -> Router {
        let plugin_routes = Router::new()
            .route("/plugins", get(list_plugins_handler))
            .route(
                "/plugins/{id}",
                get(get_plugin_handler).delete(uninstall_plugin_handler),
            )
            .route("/plugins/{id}/{action}", post(plugin_action_handler));

        let introspection_routes = Router::new()
            .route("/extensions", get(list_extension_points_handler))
            .route("/extensions/{point}", get(resolve_extensions_handler))
            .route("/bus/stats", get(bus_stats_handler));

        let unrestricted_routes = Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler));

        let mut router = Router::new()
            .merge(unrestricted_routes)
            .merge(plugin_routes)
            .merge(introspection_routes)
            .layer(middleware::from_fn_with_state(
                self.state.metrics.clone(),
                metrics_middleware,
            ))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone());

        if let Some(cors_layer) = build_cors_layer(&self.config) {
            router = router.layer(cors_layer);
        }

        router
    }

    /// Start the API server.
    pub async fn run(&self, listen_addr: &str) -> Result<()> {
        self.run_until(listen_addr, std::future::pending()).await
    }

    /// Start the API server and stop once `shutdown` completes.
    pub async fn run_until<F>(&self, listen_addr: &str, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let router = self.router();

        let listener = tokio::net::TcpListener::bind(listen_addr)
            .await
            .map_err(|e| crate::error::Error::Api(e.to_string()))?;

        tracing::info!("API server listening on {}", listen_addr);

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| crate::error::Error::Api(e.to_string()))?;

        Ok(())
    }
}

fn build_cors_layer(config: &ApiConfig) -> Option<CorsLayer> {
    if !config.cors_enabled {
        return None;
    }

    let mut cors = CorsLayer::new();
    if config.cors_origins.iter().any(|origin| origin == "*") {
        cors = cors.allow_origin(Any);
    } else if !config.cors_origins.is_empty() {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse::<HeaderValue>().ok())
            .collect();
        if !origins.is_empty() {
            cors = cors.allow_origin(AllowOrigin::list(origins));
        }
    }

    cors = cors.allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS]);
    cors = cors.allow_headers([header::CONTENT_TYPE]);

    Some(cors)
}

/// Health check handler.
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.host.registry();
    let counts = registry.count_by_state();
    let count = |s: PluginState| counts.get(&s).copied().unwrap_or(0);
    let bridge = state.host.bridge().map(|link| link.health());

    let degraded = count(PluginState::Failed) > 0
        || bridge.is_some_and(|health| health != crate::bridge::BridgeHealth::Healthy);

    Json(HealthResponse {
        status: if degraded { "degraded" } else { "ok" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        plugins: registry.plugin_count(),
        started: count(PluginState::Started),
        failed: count(PluginState::Failed),
        uptime: state.host.uptime_secs(),
        bridge,
    })
}

/// Prometheus metrics handler.
///
/// Returns metrics in Prometheus exposition format for scraping.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = state.metrics.render();

    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Paged plugin listing handler.
async fn list_plugins_handler(
    State(state): State<AppState>,
    Query(params): Query<ListQuery>,
) -> ApiResult<Page<PluginDescriptor>> {
    let request = params
        .to_request()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;

    state
        .host
        .registry()
        .list_page(&request)
        .map(Json)
        .map_err(plugin_error)
}

/// Get plugin by id handler.
async fn get_plugin_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<PluginDescriptor> {
    state
        .host
        .registry()
        .get_descriptor(&id)
        .map(Json)
        .ok_or_else(|| plugin_error(PluginError::NotFound(id)))
}

/// Lifecycle action handler.
async fn plugin_action_handler(
    State(state): State<AppState>,
    Path((id, action)): Path<(String, String)>,
) -> ApiResult<PluginDescriptor> {
    let registry = state.host.registry();
    let result = match action.as_str() {
        "initialize" => registry.initialize(&id).await,
        "start" => registry.start(&id).await,
        "stop" => registry.stop(&id).await,
        "restart" => registry.restart(&id).await,
        other => {
            return Err(api_error(
                StatusCode::NOT_FOUND,
                format!("Unknown lifecycle action: {}", other),
            ))
        }
    };

    result.map(Json).map_err(plugin_error)
}

/// Uninstall plugin handler.
async fn uninstall_plugin_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<PluginDescriptor> {
    state
        .host
        .registry()
        .uninstall(&id)
        .await
        .map(Json)
        .map_err(plugin_error)
}

/// Declared extension points handler.
async fn list_extension_points_handler(
    State(state): State<AppState>,
) -> Json<Vec<ExtensionPointDescriptor>> {
    Json(state.host.extensions().extension_points())
}

/// Resolve extension point handler.
async fn resolve_extensions_handler(
    State(state): State<AppState>,
    Path(point): Path<String>,
) -> ApiResult<ExtensionPointResponse> {
    let extensions = state.host.extensions();
    let descriptor = extensions
        .extension_point(&point)
        .ok_or_else(|| plugin_error(PluginError::UnknownExtensionPoint(point.clone())))?;

    Ok(Json(ExtensionPointResponse {
        point: descriptor,
        extensions: extensions
            .resolve(&point)
            .iter()
            .map(|registration| registration.info())
            .collect(),
        registered: extensions.registration_count(&point),
    }))
}

/// Event bus statistics handler.
async fn bus_stats_handler(State(state): State<AppState>) -> Json<BusStatsResponse> {
    let bus = state.host.bus();
    let topics = bus
        .topics()
        .into_iter()
        .map(|topic| TopicInfo {
            subscribers: bus.subscriber_count(&topic),
            topic,
        })
        .collect();

    Json(BusStatsResponse {
        bus: bus.stats().snapshot(),
        topics,
        bridge: state.host.bridge().map(|link| link.stats().snapshot()),
    })
}
