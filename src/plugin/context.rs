//! Handle passed to lifecycle hooks.

use std::sync::{Arc, RwLock};

use super::error::{PluginError, PluginResult};
use crate::bus::{BusError, Event, EventBus, EventHandler, Payload, Subscription};
use crate::extension::{ExtensionDeclaration, ExtensionRegistration, ExtensionRegistry};

/// Liveness shared by every context handed to one registered plugin.
///
/// Registrations hold the read side while they run, so once `retire`
/// returns no registration through these contexts is in flight.
#[derive(Debug, Clone)]
pub(crate) struct ContextLease(Arc<RwLock<bool>>);

impl ContextLease {
    pub(crate) fn new() -> Self {
        Self(Arc::new(RwLock::new(true)))
    }

    pub(crate) fn retire(&self) {
        *self.0.write().unwrap_or_else(|e| e.into_inner()) = false;
    }

    fn is_live(&self) -> bool {
        *self.0.read().unwrap_or_else(|e| e.into_inner())
    }
}

/// Context a plugin receives in its lifecycle hooks.
///
/// Carries the plugin's identity and the shared bus and extension registry,
/// so hooks can publish, subscribe and register additional extensions.
///
/// Contexts handed out by the plugin registry stop accepting extension
/// registrations once their plugin fails or is uninstalled, even if the
/// plugin kept a clone.
#[derive(Clone)]
pub struct PluginContext {
    plugin_id: String,
    bus: Arc<EventBus>,
    extensions: Arc<ExtensionRegistry>,
    lease: ContextLease,
}

impl PluginContext {
    /// Create a standalone context for the given plugin.
    pub fn new(
        plugin_id: impl Into<String>,
        bus: Arc<EventBus>,
        extensions: Arc<ExtensionRegistry>,
    ) -> Self {
        Self::leased(plugin_id, bus, extensions, ContextLease::new())
    }

    pub(crate) fn leased(
        plugin_id: impl Into<String>,
        bus: Arc<EventBus>,
        extensions: Arc<ExtensionRegistry>,
        lease: ContextLease,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            bus,
            extensions,
            lease,
        }
    }

    /// Whether the owning plugin can still register extensions.
    pub fn is_live(&self) -> bool {
        self.lease.is_live()
    }

    /// Id of the plugin this context belongs to.
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// The shared event bus.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// The shared extension registry.
    pub fn extensions(&self) -> &Arc<ExtensionRegistry> {
        &self.extensions
    }

    /// Publish an event with this plugin as the source.
    pub async fn publish(
        &self,
        topic: &str,
        payload: Payload,
    ) -> std::result::Result<Arc<Event>, BusError> {
        self.bus
            .publish(topic, payload, Some(self.plugin_id.clone()))
            .await
    }

    /// Subscribe a handler to a topic.
    pub fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn EventHandler>,
    ) -> std::result::Result<Subscription, BusError> {
        self.bus.subscribe(topic, handler)
    }

    /// Register an extension owned by this plugin.
    ///
    /// A rejection is returned to the caller so the plugin can decide whether
    /// to continue in a degraded mode. Fails with [`PluginError::Retired`]
    /// after the plugin failed or was uninstalled.
    pub fn register_extension(&self, declaration: ExtensionDeclaration) -> PluginResult<u64> {
        let live = self.lease.0.read().unwrap_or_else(|e| e.into_inner());
        if !*live {
            return Err(PluginError::Retired(self.plugin_id.clone()));
        }
        self.extensions.register_extension(
            &declaration.point_id,
            &self.plugin_id,
            declaration.instance,
            declaration.priority,
            declaration.description,
        )
    }

    /// Resolve the live implementations of an extension point.
    pub fn resolve(&self, point_id: &str) -> Vec<ExtensionRegistration> {
        self.extensions.resolve(point_id)
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin_id", &self.plugin_id)
            .field("live", &self.is_live())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusConfig;
    use crate::extension::{ExtensionInstance, ExtensionPointDescriptor};

    #[test]
    fn test_retired_context_rejects_registrations() {
        let extensions = Arc::new(ExtensionRegistry::new());
        extensions
            .declare_extension_point(ExtensionPointDescriptor::single("storage", "Storage"))
            .unwrap();
        let lease = ContextLease::new();
        let ctx = PluginContext::leased(
            "old",
            Arc::new(EventBus::new(BusConfig::default())),
            extensions.clone(),
            lease.clone(),
        );
        let kept = ctx.clone();

        lease.retire();

        let err = kept
            .register_extension(ExtensionDeclaration::new(
                "storage",
                0,
                ExtensionInstance::from_value(1u32),
            ))
            .unwrap_err();
        assert!(matches!(err, PluginError::Retired(ref id) if id == "old"));
        assert!(!ctx.is_live());
        assert_eq!(extensions.registration_count("storage"), 0);
    }
}
