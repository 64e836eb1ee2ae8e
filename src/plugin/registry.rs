//! Plugin Registry - manages plugin lifecycle

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::context::{ContextLease, PluginContext};
use super::error::{HookError, HookResult, PluginError, PluginResult};
use super::types::{LifecyclePhase, Plugin, PluginDescriptor, PluginMetadata, PluginState};
use crate::bus::{EventBus, Payload, LIFECYCLE_TOPIC};
use crate::config::RegistryConfig;
use crate::extension::ExtensionRegistry;
use crate::metrics::MetricsService;
use crate::page::{Page, PageRequest};

/// Payload published on [`LIFECYCLE_TOPIC`] for every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub plugin_id: String,
    /// `None` when the plugin was just registered.
    pub from: Option<PluginState>,
    pub to: PluginState,
    /// Hook error that caused or accompanied the transition.
    pub error: Option<String>,
}

struct SlotState {
    state: PluginState,
    last_error: Option<String>,
    state_changed_at: u64,
    extension_errors: Vec<String>,
}

/// Registered plugin with its lifecycle state
struct PluginSlot {
    plugin: Arc<dyn Plugin>,
    /// Metadata read once at registration
    metadata: PluginMetadata,
    /// Registration order
    seq: u64,
    /// Held for the whole of a transition on this plugin
    transition: Mutex<()>,
    state: RwLock<SlotState>,
    /// Shared by every context handed to the plugin
    lease: ContextLease,
}

impl PluginSlot {
    fn id(&self) -> &str {
        &self.metadata.id
    }

    fn state(&self) -> PluginState {
        self.state.read().unwrap_or_else(|e| e.into_inner()).state
    }

    fn set_state(&self, state: PluginState, last_error: Option<String>) {
        let mut guard = self.state.write().unwrap_or_else(|e| e.into_inner());
        guard.state = state;
        guard.last_error = last_error;
        guard.state_changed_at = crate::unix_millis();
    }

    fn descriptor(&self) -> PluginDescriptor {
        let guard = self.state.read().unwrap_or_else(|e| e.into_inner());
        PluginDescriptor {
            metadata: self.metadata.clone(),
            state: guard.state,
            last_error: guard.last_error.clone(),
            extension_errors: guard.extension_errors.clone(),
            registration_seq: self.seq,
            state_changed_at: guard.state_changed_at,
        }
    }
}

/// The Plugin Registry
///
/// Owns the plugin id to descriptor map and enforces the lifecycle state
/// machine:
/// - Registration with metadata validation and extension declaration
/// - Dependency checks before start
/// - Hook execution with timeout and panic containment
/// - Extension activation while STARTED
///
/// Transitions on one plugin are serialized; transitions on different
/// plugins run concurrently. Snapshot reads never wait for a transition.
///
/// # Example
///
/// ```rust,ignore
/// use plugin_host::{PluginBuilder, PluginRegistry};
///
/// let registry = PluginRegistry::new(extensions, bus, &RegistryConfig::default());
/// registry.register(PluginBuilder::new("storage").build()).await?;
/// registry.initialize("storage").await?;
/// registry.start("storage").await?;
/// ```
pub struct PluginRegistry {
    /// Registered plugins by id
    plugins: RwLock<HashMap<String, Arc<PluginSlot>>>,
    /// Registration sequence counter
    sequence: AtomicU64,
    extensions: Arc<ExtensionRegistry>,
    bus: Arc<EventBus>,
    hook_timeout: Option<Duration>,
    metrics: Arc<MetricsService>,
}

impl PluginRegistry {
    /// Create a new plugin registry
    pub fn new(
        extensions: Arc<ExtensionRegistry>,
        bus: Arc<EventBus>,
        config: &RegistryConfig,
    ) -> Self {
        Self::with_metrics(extensions, bus, config, Arc::new(MetricsService::disabled()))
    }

    /// Create a plugin registry that records metrics
    pub fn with_metrics(
        extensions: Arc<ExtensionRegistry>,
        bus: Arc<EventBus>,
        config: &RegistryConfig,
        metrics: Arc<MetricsService>,
    ) -> Self {
        Self {
            plugins: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
            extensions,
            bus,
            hook_timeout: config.hook_timeout(),
            metrics,
        }
    }

    /// Register a plugin
    ///
    /// This will:
    /// 1. Validate the metadata and reject a live duplicate id
    /// 2. Store the plugin in REGISTERED
    /// 3. Declare its extension points and register its extensions
    ///
    /// Rejected extension declarations do not fail registration; they are
    /// logged and kept in the descriptor's `extension_errors`.
    pub async fn register(&self, plugin: Arc<dyn Plugin>) -> PluginResult<PluginDescriptor> {
        let metadata = plugin.metadata();
        metadata.validate()?;
        let plugin_id = metadata.id.clone();

        let slot = Arc::new(PluginSlot {
            plugin: plugin.clone(),
            metadata,
            seq: self.sequence.fetch_add(1, Ordering::SeqCst),
            transition: Mutex::new(()),
            state: RwLock::new(SlotState {
                state: PluginState::Registered,
                last_error: None,
                state_changed_at: crate::unix_millis(),
                extension_errors: Vec::new(),
            }),
            lease: ContextLease::new(),
        });
        let _transition = slot.transition.lock().await;

        {
            let mut plugins = self.plugins.write().unwrap_or_else(|e| e.into_inner());
            if plugins.contains_key(&plugin_id) {
                return Err(PluginError::DuplicateId(plugin_id));
            }
            plugins.insert(plugin_id.clone(), slot.clone());
        }

        let mut rejected = Vec::new();
        for point in plugin.extension_points() {
            let point_id = point.id.clone();
            if let Err(e) = self.extensions.declare_extension_point(point) {
                warn!(
                    "Plugin '{}' could not declare extension point '{}': {}",
                    plugin_id, point_id, e
                );
                rejected.push(e.to_string());
            }
        }

        let mut registered = 0;
        for declaration in plugin.extensions() {
            match self.extensions.register_extension(
                &declaration.point_id,
                &plugin_id,
                declaration.instance,
                declaration.priority,
                declaration.description,
            ) {
                Ok(_) => registered += 1,
                Err(e) => {
                    warn!(
                        "Plugin '{}' extension for '{}' rejected: {}",
                        plugin_id, declaration.point_id, e
                    );
                    rejected.push(e.to_string());
                }
            }
        }

        slot.state
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .extension_errors = rejected;

        info!(
            "Registered plugin '{}' v{} with {} extensions",
            plugin_id, slot.metadata.version, registered
        );
        self.record_transition(&slot, None, PluginState::Registered, None);

        Ok(slot.descriptor())
    }

    /// Run the initialize hook: REGISTERED to INITIALIZED.
    pub async fn initialize(&self, id: &str) -> PluginResult<PluginDescriptor> {
        self.transition(id, LifecyclePhase::Initialize, self.hook_timeout)
            .await
    }

    /// Run the start hook: INITIALIZED or STOPPED to STARTED.
    ///
    /// Every dependency must be STARTED.
    pub async fn start(&self, id: &str) -> PluginResult<PluginDescriptor> {
        self.transition(id, LifecyclePhase::Start, self.hook_timeout)
            .await
    }

    /// Run the stop hook: STARTED to STOPPED.
    ///
    /// A failing stop hook is logged and the plugin still stops.
    pub async fn stop(&self, id: &str) -> PluginResult<PluginDescriptor> {
        self.transition(id, LifecyclePhase::Stop, self.hook_timeout)
            .await
    }

    /// Remove a plugin from any state.
    ///
    /// A STARTED plugin is stopped first. Hook failures are logged. The
    /// returned descriptor is the final snapshot in UNINSTALLED.
    pub async fn uninstall(&self, id: &str) -> PluginResult<PluginDescriptor> {
        self.transition(id, LifecyclePhase::Uninstall, self.hook_timeout)
            .await
    }

    /// Stop then start a STARTED plugin.
    pub async fn restart(&self, id: &str) -> PluginResult<PluginDescriptor> {
        self.stop(id).await?;
        self.start(id).await
    }

    /// Run a lifecycle phase with an explicit hook timeout (`None` = unbounded).
    pub async fn transition(
        &self,
        id: &str,
        phase: LifecyclePhase,
        timeout: Option<Duration>,
    ) -> PluginResult<PluginDescriptor> {
        let slot = self.slot(id)?;
        let _transition = slot.transition.lock().await;
        self.ensure_current(&slot)?;

        match phase {
            LifecyclePhase::Initialize => self.run_initialize(&slot, timeout).await,
            LifecyclePhase::Start => self.run_start(&slot, timeout).await,
            LifecyclePhase::Stop => self.run_stop(&slot, timeout).await,
            LifecyclePhase::Uninstall => self.run_uninstall(&slot, timeout).await,
        }
    }

    /// Stop every STARTED plugin, dependents before their dependencies.
    ///
    /// Returns the number of plugins stopped.
    pub async fn stop_all(&self) -> usize {
        let mut stopped = 0;

        loop {
            let started: Vec<PluginDescriptor> = self
                .list()
                .into_iter()
                .filter(|d| d.state == PluginState::Started)
                .collect();
            if started.is_empty() {
                break;
            }

            let mut round: Vec<&PluginDescriptor> = started
                .iter()
                .filter(|d| {
                    !started
                        .iter()
                        .any(|other| other.metadata.dependencies.contains(d.id()))
                })
                .collect();
            if round.is_empty() {
                warn!("Dependency cycle among started plugins, stopping in reverse registration order");
                round = started.iter().rev().collect();
            }

            let mut progressed = false;
            for descriptor in round {
                match self.stop(descriptor.id()).await {
                    Ok(_) => {
                        stopped += 1;
                        progressed = true;
                    }
                    Err(e) => warn!("Could not stop plugin '{}': {}", descriptor.id(), e),
                }
            }
            if !progressed {
                break;
            }
        }

        stopped
    }

    // ========== Snapshots ==========

    /// Snapshot of one plugin.
    pub fn get_descriptor(&self, id: &str) -> Option<PluginDescriptor> {
        let plugins = self.plugins.read().unwrap_or_else(|e| e.into_inner());
        plugins.get(id).map(|slot| slot.descriptor())
    }

    /// Snapshot of every plugin, in registration order.
    pub fn list(&self) -> Vec<PluginDescriptor> {
        let mut slots = self.slots();
        slots.sort_by_key(|slot| slot.seq);
        slots.iter().map(|slot| slot.descriptor()).collect()
    }

    /// One sorted page of descriptors.
    pub fn list_page(&self, request: &PageRequest) -> PluginResult<Page<PluginDescriptor>> {
        request.validate()?;
        let mut descriptors = self.list();
        request.sort(&mut descriptors);
        Ok(Page::slice(descriptors, request))
    }

    /// Ids of plugins that declare a dependency on `id`.
    pub fn dependents_of(&self, id: &str) -> Vec<String> {
        self.list()
            .into_iter()
            .filter(|d| d.metadata.dependencies.contains(id))
            .map(|d| d.metadata.id)
            .collect()
    }

    /// Number of plugins in each state.
    pub fn count_by_state(&self) -> BTreeMap<PluginState, usize> {
        let mut counts: BTreeMap<PluginState, usize> =
            PluginState::ALL.iter().map(|state| (*state, 0)).collect();
        for slot in self.slots() {
            *counts.entry(slot.state()).or_default() += 1;
        }
        counts
    }

    /// Number of registered plugins.
    pub fn plugin_count(&self) -> usize {
        self.plugins.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether a plugin with this id is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.plugins
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(id)
    }

    /// Context handed to a registered plugin's hooks.
    pub fn context_for(&self, id: &str) -> Option<PluginContext> {
        let plugins = self.plugins.read().unwrap_or_else(|e| e.into_inner());
        plugins.get(id).map(|slot| self.context(slot))
    }

    /// The extension registry populated by this registry.
    pub fn extensions(&self) -> &Arc<ExtensionRegistry> {
        &self.extensions
    }

    /// The bus lifecycle events are published on.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    // ========== Transitions ==========

    async fn run_initialize(
        &self,
        slot: &Arc<PluginSlot>,
        timeout: Option<Duration>,
    ) -> PluginResult<PluginDescriptor> {
        let from = slot.state();
        if from != PluginState::Registered {
            return Err(self.invalid(slot, from, PluginState::Initialized));
        }

        match self.run_hook(slot, LifecyclePhase::Initialize, timeout).await {
            Ok(()) => {
                slot.set_state(PluginState::Initialized, None);
                info!("Plugin '{}' initialized", slot.id());
                self.record_transition(slot, Some(from), PluginState::Initialized, None);
                Ok(slot.descriptor())
            }
            Err(e) => Err(self.fail(slot, from, LifecyclePhase::Initialize, e)),
        }
    }

    async fn run_start(
        &self,
        slot: &Arc<PluginSlot>,
        timeout: Option<Duration>,
    ) -> PluginResult<PluginDescriptor> {
        let from = slot.state();
        if !matches!(from, PluginState::Initialized | PluginState::Stopped) {
            return Err(self.invalid(slot, from, PluginState::Started));
        }

        for dependency in &slot.metadata.dependencies {
            let state = self.state_of(dependency);
            if state != Some(PluginState::Started) {
                debug!(
                    "Plugin '{}' cannot start: dependency '{}' is {:?}",
                    slot.id(),
                    dependency,
                    state
                );
                return Err(PluginError::DependencyNotSatisfied {
                    plugin: slot.id().to_string(),
                    dependency: dependency.clone(),
                    state,
                });
            }
        }

        match self.run_hook(slot, LifecyclePhase::Start, timeout).await {
            Ok(()) => {
                slot.set_state(PluginState::Started, None);
                self.extensions.activate(slot.id());
                info!("Plugin '{}' started", slot.id());
                self.record_transition(slot, Some(from), PluginState::Started, None);
                Ok(slot.descriptor())
            }
            Err(e) => Err(self.fail(slot, from, LifecyclePhase::Start, e)),
        }
    }

    async fn run_stop(
        &self,
        slot: &Arc<PluginSlot>,
        timeout: Option<Duration>,
    ) -> PluginResult<PluginDescriptor> {
        let from = slot.state();
        if from != PluginState::Started {
            return Err(self.invalid(slot, from, PluginState::Stopped));
        }

        self.extensions.deactivate(slot.id());

        let running_dependents: Vec<String> = self
            .dependents_of(slot.id())
            .into_iter()
            .filter(|id| self.state_of(id) == Some(PluginState::Started))
            .collect();
        if !running_dependents.is_empty() {
            warn!(
                "Stopping plugin '{}' while dependents are started: {}",
                slot.id(),
                running_dependents.join(", ")
            );
        }

        let error = self
            .run_tolerated_hook(slot, LifecyclePhase::Stop, timeout)
            .await;
        slot.set_state(PluginState::Stopped, error.clone());
        info!("Plugin '{}' stopped", slot.id());
        self.record_transition(slot, Some(from), PluginState::Stopped, error);
        Ok(slot.descriptor())
    }

    async fn run_uninstall(
        &self,
        slot: &Arc<PluginSlot>,
        timeout: Option<Duration>,
    ) -> PluginResult<PluginDescriptor> {
        let from = slot.state();
        let mut errors = Vec::new();

        if from == PluginState::Started {
            self.extensions.deactivate(slot.id());
            errors.extend(
                self.run_tolerated_hook(slot, LifecyclePhase::Stop, timeout)
                    .await,
            );
        }
        errors.extend(
            self.run_tolerated_hook(slot, LifecyclePhase::Uninstall, timeout)
                .await,
        );

        slot.lease.retire();
        self.extensions.unregister_all_for(slot.id());
        {
            let mut plugins = self.plugins.write().unwrap_or_else(|e| e.into_inner());
            if plugins
                .get(slot.id())
                .is_some_and(|current| Arc::ptr_eq(current, slot))
            {
                plugins.remove(slot.id());
            }
        }

        let error = (!errors.is_empty()).then(|| errors.join("; "));
        slot.set_state(PluginState::Uninstalled, error.clone());
        info!("Plugin '{}' uninstalled", slot.id());
        self.record_transition(slot, Some(from), PluginState::Uninstalled, error);
        Ok(slot.descriptor())
    }

    /// Move to FAILED, retire the plugin's contexts, drop its registrations
    /// and build the error.
    fn fail(
        &self,
        slot: &Arc<PluginSlot>,
        from: PluginState,
        phase: LifecyclePhase,
        source: HookError,
    ) -> PluginError {
        let message = source.to_string();
        slot.set_state(PluginState::Failed, Some(message.clone()));
        slot.lease.retire();
        self.extensions.unregister_all_for(slot.id());
        self.metrics.hook_failure(phase.as_str());

        error!(
            "Plugin '{}' {} hook failed, plugin is now failed: {}",
            slot.id(),
            phase,
            message
        );
        self.record_transition(slot, Some(from), PluginState::Failed, Some(message));

        PluginError::LifecycleHook {
            plugin: slot.id().to_string(),
            phase,
            source,
        }
    }

    /// Run a hook whose failure is logged but does not fail the transition.
    async fn run_tolerated_hook(
        &self,
        slot: &Arc<PluginSlot>,
        phase: LifecyclePhase,
        timeout: Option<Duration>,
    ) -> Option<String> {
        match self.run_hook(slot, phase, timeout).await {
            Ok(()) => None,
            Err(e) => {
                self.metrics.hook_failure(phase.as_str());
                warn!(
                    "Plugin '{}' {} hook failed, continuing: {}",
                    slot.id(),
                    phase,
                    e
                );
                Some(e.to_string())
            }
        }
    }

    /// Invoke one hook, converting timeouts and panics into hook errors.
    ///
    /// On timeout the hook future is dropped, which cancels it at its next
    /// suspension point.
    async fn run_hook(
        &self,
        slot: &Arc<PluginSlot>,
        phase: LifecyclePhase,
        timeout: Option<Duration>,
    ) -> HookResult {
        let ctx = self.context(slot);
        let plugin = slot.plugin.clone();

        let hook = AssertUnwindSafe(async move {
            match phase {
                LifecyclePhase::Initialize => plugin.initialize(&ctx).await,
                LifecyclePhase::Start => plugin.start(&ctx).await,
                LifecyclePhase::Stop => plugin.stop(&ctx).await,
                LifecyclePhase::Uninstall => plugin.uninstall(&ctx).await,
            }
        })
        .catch_unwind();

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, hook).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(HookError::TimedOut(limit)),
            },
            None => hook.await,
        };

        match outcome {
            Ok(result) => result,
            Err(panic) => Err(HookError::Panicked(crate::panic_message(panic.as_ref()))),
        }
    }

    fn context(&self, slot: &PluginSlot) -> PluginContext {
        PluginContext::leased(
            slot.id(),
            self.bus.clone(),
            self.extensions.clone(),
            slot.lease.clone(),
        )
    }

    fn invalid(&self, slot: &PluginSlot, from: PluginState, to: PluginState) -> PluginError {
        debug!(
            "Rejected transition of plugin '{}' from {} to {}",
            slot.id(),
            from,
            to
        );
        PluginError::InvalidStateTransition {
            plugin: slot.id().to_string(),
            from,
            to,
        }
    }

    /// Update the state gauges and announce the transition.
    ///
    /// Runs under the plugin's transition lock, so the notice is offered
    /// without waiting: a full subscriber queue drops it rather than stalling
    /// lifecycle operations.
    fn record_transition(
        &self,
        slot: &PluginSlot,
        from: Option<PluginState>,
        to: PluginState,
        error: Option<String>,
    ) {
        self.metrics.plugin_transition(to.as_str());
        for (state, count) in self.count_by_state() {
            self.metrics.plugins_in_state(state.as_str(), count);
        }

        let notice = LifecycleEvent {
            plugin_id: slot.id().to_string(),
            from,
            to,
            error,
        };
        let payload = match Payload::json(&notice) {
            Ok(payload) => payload,
            Err(e) => {
                debug!("Could not encode lifecycle event: {}", e);
                return;
            }
        };
        if let Err(e) = self.bus.try_publish(LIFECYCLE_TOPIC, payload, None) {
            debug!("Lifecycle event for '{}' not published: {}", slot.id(), e);
        }
    }

    // ========== Lookup ==========

    fn slot(&self, id: &str) -> PluginResult<Arc<PluginSlot>> {
        let plugins = self.plugins.read().unwrap_or_else(|e| e.into_inner());
        plugins
            .get(id)
            .cloned()
            .ok_or_else(|| PluginError::NotFound(id.to_string()))
    }

    /// Fail if the slot was uninstalled while we waited for its lock.
    fn ensure_current(&self, slot: &Arc<PluginSlot>) -> PluginResult<()> {
        let plugins = self.plugins.read().unwrap_or_else(|e| e.into_inner());
        match plugins.get(slot.id()) {
            Some(current) if Arc::ptr_eq(current, slot) => Ok(()),
            _ => Err(PluginError::NotFound(slot.id().to_string())),
        }
    }

    fn state_of(&self, id: &str) -> Option<PluginState> {
        let plugins = self.plugins.read().unwrap_or_else(|e| e.into_inner());
        plugins.get(id).map(|slot| slot.state())
    }

    fn slots(&self) -> Vec<Arc<PluginSlot>> {
        let plugins = self.plugins.read().unwrap_or_else(|e| e.into_inner());
        plugins.values().cloned().collect()
    }
}
