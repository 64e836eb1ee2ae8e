//! Plugin host - wires the registries, the bus and the bridge together.

use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{info, warn};

use crate::bridge::{Bridge, BridgeLink, BridgeSettings};
use crate::bus::EventBus;
use crate::config::HostConfig;
use crate::error::{Error, Result};
use crate::extension::ExtensionRegistry;
use crate::metrics::MetricsService;
use crate::plugin::{Plugin, PluginDescriptor, PluginRegistry};

/// A running plugin host.
///
/// Owns one [`PluginRegistry`], the [`ExtensionRegistry`] it populates and
/// the [`EventBus`] plugins talk over. A broker bridge can be attached once
/// the host is running inside a Tokio runtime.
pub struct PluginHost {
    config: HostConfig,
    metrics: Arc<MetricsService>,
    extensions: Arc<ExtensionRegistry>,
    bus: Arc<EventBus>,
    registry: Arc<PluginRegistry>,
    bridge: RwLock<Option<Arc<BridgeLink>>>,
    started_at: Instant,
}

impl PluginHost {
    /// Create a host, installing the Prometheus recorder if metrics are enabled.
    pub fn new(config: HostConfig) -> Self {
        let metrics = Arc::new(MetricsService::new(config.metrics.clone()));
        Self::with_metrics(config, metrics)
    }

    /// Create a host that records into an existing metrics service.
    pub fn with_metrics(config: HostConfig, metrics: Arc<MetricsService>) -> Self {
        let extensions = Arc::new(ExtensionRegistry::with_metrics(metrics.clone()));
        let bus = Arc::new(EventBus::with_metrics(config.bus.clone(), metrics.clone()));
        let registry = Arc::new(PluginRegistry::with_metrics(
            extensions.clone(),
            bus.clone(),
            &config.registry,
            metrics.clone(),
        ));

        Self {
            config,
            metrics,
            extensions,
            bus,
            registry,
            bridge: RwLock::new(None),
            started_at: Instant::now(),
        }
    }

    /// Attach a broker bridge using the configured bridge settings.
    ///
    /// Fails if a bridge is already attached. Must be called within a Tokio
    /// runtime.
    pub fn connect_bridge(&self, bridge: Arc<dyn Bridge>) -> Result<Arc<BridgeLink>> {
        let mut current = self.bridge.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = current.as_ref() {
            return Err(Error::Internal(format!(
                "bridge '{}' is already connected",
                existing.bridge_name()
            )));
        }

        let link = BridgeLink::start(
            self.bus.clone(),
            bridge,
            BridgeSettings::from_config(&self.config.bridge),
            self.metrics.clone(),
        );
        *current = Some(link.clone());
        Ok(link)
    }

    /// Detach and stop the bridge, if one is attached.
    pub async fn disconnect_bridge(&self) -> bool {
        let link = self
            .bridge
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match link {
            Some(link) => {
                link.stop().await;
                true
            }
            None => false,
        }
    }

    /// Register, initialize and start a plugin.
    ///
    /// A plugin whose initialize or start hook fails stays registered in
    /// FAILED so its error can be inspected.
    pub async fn install(&self, plugin: Arc<dyn Plugin>) -> Result<PluginDescriptor> {
        let id = self.registry.register(plugin).await?.metadata.id;
        self.registry.initialize(&id).await?;
        Ok(self.registry.start(&id).await?)
    }

    /// Stop every plugin, detach the bridge and drain the bus.
    ///
    /// Returns the number of plugins stopped.
    pub async fn shutdown(&self) -> usize {
        info!("Shutting down plugin host");

        let stopped = self.registry.stop_all().await;
        if self.disconnect_bridge().await {
            info!("Bridge detached");
        }
        self.bus.shutdown().await;

        let leftover = self.registry.count_by_state();
        let failed = leftover
            .get(&crate::plugin::PluginState::Failed)
            .copied()
            .unwrap_or(0);
        if failed > 0 {
            warn!("{} plugin(s) remain failed at shutdown", failed);
        }

        info!("Plugin host stopped ({} plugins stopped)", stopped);
        stopped
    }

    /// Host configuration.
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn extensions(&self) -> &Arc<ExtensionRegistry> {
        &self.extensions
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn metrics(&self) -> &Arc<MetricsService> {
        &self.metrics
    }

    /// The attached bridge link.
    pub fn bridge(&self) -> Option<Arc<BridgeLink>> {
        self.bridge
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Seconds since the host was created.
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
