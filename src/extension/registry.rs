//! Extension Registry - resolves live, priority-ordered implementations

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use super::types::{
    ExtensionInfo, ExtensionInstance, ExtensionPointDescriptor, ExtensionRegistration,
};
use crate::metrics::MetricsService;
use crate::plugin::{PluginError, PluginResult};

/// One declared extension point and its registrations.
///
/// `registrations` is kept sorted in resolution order.
struct PointSlot {
    descriptor: ExtensionPointDescriptor,
    registrations: RwLock<Vec<ExtensionRegistration>>,
}

/// The Extension Registry
///
/// Owns extension point declarations and the registrations made against them.
/// Writers lock a single point; `resolve` only returns registrations whose
/// owning plugin is currently active (STARTED).
pub struct ExtensionRegistry {
    /// Declared points by id.
    points: RwLock<HashMap<String, Arc<PointSlot>>>,
    /// Plugins whose registrations are resolvable.
    active: RwLock<HashSet<String>>,
    /// Registration sequence counter.
    sequence: AtomicU64,
    metrics: Arc<MetricsService>,
}

impl ExtensionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::with_metrics(Arc::new(MetricsService::disabled()))
    }

    /// Create an empty registry that records metrics.
    pub fn with_metrics(metrics: Arc<MetricsService>) -> Self {
        Self {
            points: RwLock::new(HashMap::new()),
            active: RwLock::new(HashSet::new()),
            sequence: AtomicU64::new(0),
            metrics,
        }
    }

    /// Declare an extension point.
    ///
    /// Returns `true` when newly declared, `false` when an identical
    /// declaration already exists.
    pub fn declare_extension_point(&self, descriptor: ExtensionPointDescriptor) -> PluginResult<bool> {
        if descriptor.id.trim().is_empty() {
            return Err(PluginError::InvalidMetadata(
                "extension point id must not be empty".to_string(),
            ));
        }

        let mut points = self.points.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = points.get(&descriptor.id) {
            if existing.descriptor.allow_multiple != descriptor.allow_multiple {
                return Err(PluginError::ExtensionPointConflict {
                    point: descriptor.id,
                    declared: existing.descriptor.allow_multiple,
                });
            }
            return Ok(false);
        }

        info!(
            "Declared extension point '{}' (allow_multiple={})",
            descriptor.id, descriptor.allow_multiple
        );
        points.insert(
            descriptor.id.clone(),
            Arc::new(PointSlot {
                descriptor,
                registrations: RwLock::new(Vec::new()),
            }),
        );
        Ok(true)
    }

    /// Register an implementation owned by `plugin_id`.
    ///
    /// Returns the registration sequence number.
    pub fn register_extension(
        &self,
        point_id: &str,
        plugin_id: &str,
        instance: ExtensionInstance,
        priority: i32,
        description: impl Into<String>,
    ) -> PluginResult<u64> {
        let slot = self
            .slot(point_id)
            .ok_or_else(|| PluginError::UnknownExtensionPoint(point_id.to_string()))?;

        let mut registrations = slot
            .registrations
            .write()
            .unwrap_or_else(|e| e.into_inner());

        if !slot.descriptor.allow_multiple {
            if let Some(existing) = registrations.first() {
                return Err(PluginError::SingleImplementationViolation {
                    point: point_id.to_string(),
                    existing_plugin: existing.plugin_id.clone(),
                });
            }
        }

        let registration = ExtensionRegistration {
            point_id: point_id.to_string(),
            plugin_id: plugin_id.to_string(),
            priority,
            description: description.into(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            instance,
        };
        let sequence = registration.sequence;

        let key = registration.resolution_key();
        let position = registrations.partition_point(|r| r.resolution_key() <= key);
        registrations.insert(position, registration);

        debug!(
            "Registered extension #{} for '{}' from plugin '{}' (priority {})",
            sequence, point_id, plugin_id, priority
        );
        Ok(sequence)
    }

    /// Live implementations of a point, highest priority first.
    ///
    /// Unknown points resolve to an empty list. The result is a snapshot and
    /// never changes after it is returned.
    pub fn resolve(&self, point_id: &str) -> Vec<ExtensionRegistration> {
        self.metrics.extension_resolve(point_id);

        let Some(slot) = self.slot(point_id) else {
            return Vec::new();
        };

        let active = self.active.read().unwrap_or_else(|e| e.into_inner());
        let registrations = slot.registrations.read().unwrap_or_else(|e| e.into_inner());
        registrations
            .iter()
            .filter(|r| active.contains(&r.plugin_id))
            .cloned()
            .collect()
    }

    /// Live implementations of a point, downcast to `T`.
    ///
    /// Registrations whose instance is not an `Arc<T>` are skipped.
    pub fn resolve_as<T>(&self, point_id: &str) -> Vec<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.resolve(point_id)
            .iter()
            .filter_map(|r| r.instance.downcast::<T>())
            .collect()
    }

    /// The highest-priority live implementation of a point.
    pub fn resolve_first<T>(&self, point_id: &str) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.resolve_as::<T>(point_id).into_iter().next()
    }

    /// Remove every registration owned by `plugin_id`.
    ///
    /// Each point is updated under its own write lock, so a concurrent
    /// `resolve` sees either all or none of the plugin's registrations for
    /// that point. Returns the number of registrations removed.
    pub fn unregister_all_for(&self, plugin_id: &str) -> usize {
        self.deactivate(plugin_id);

        let mut removed = 0;
        for slot in self.slots() {
            let mut registrations = slot
                .registrations
                .write()
                .unwrap_or_else(|e| e.into_inner());
            let before = registrations.len();
            registrations.retain(|r| r.plugin_id != plugin_id);
            removed += before - registrations.len();
        }

        if removed > 0 {
            info!(
                "Removed {} extension registrations owned by '{}'",
                removed, plugin_id
            );
        }
        removed
    }

    /// Make a plugin's registrations resolvable.
    ///
    /// The plugin registry calls this when a plugin reaches STARTED.
    pub fn activate(&self, plugin_id: &str) {
        let mut active = self.active.write().unwrap_or_else(|e| e.into_inner());
        active.insert(plugin_id.to_string());
    }

    /// Hide a plugin's registrations from resolution without removing them.
    pub fn deactivate(&self, plugin_id: &str) {
        let mut active = self.active.write().unwrap_or_else(|e| e.into_inner());
        active.remove(plugin_id);
    }

    /// Whether a plugin's registrations are currently resolvable.
    pub fn is_active(&self, plugin_id: &str) -> bool {
        let active = self.active.read().unwrap_or_else(|e| e.into_inner());
        active.contains(plugin_id)
    }

    /// Descriptor of a declared point.
    pub fn extension_point(&self, point_id: &str) -> Option<ExtensionPointDescriptor> {
        self.slot(point_id).map(|slot| slot.descriptor.clone())
    }

    /// All declared points, sorted by id.
    pub fn extension_points(&self) -> Vec<ExtensionPointDescriptor> {
        let mut points: Vec<_> = self
            .slots()
            .into_iter()
            .map(|slot| slot.descriptor.clone())
            .collect();
        points.sort_by(|a, b| a.id.cmp(&b.id));
        points
    }

    /// Registrations owned by a plugin, regardless of whether it is active.
    pub fn registrations_for(&self, plugin_id: &str) -> Vec<ExtensionInfo> {
        let mut infos: Vec<ExtensionInfo> = self
            .slots()
            .iter()
            .flat_map(|slot| {
                let registrations = slot.registrations.read().unwrap_or_else(|e| e.into_inner());
                registrations
                    .iter()
                    .filter(|r| r.plugin_id == plugin_id)
                    .map(|r| r.info())
                    .collect::<Vec<_>>()
            })
            .collect();
        infos.sort_by_key(|info| info.sequence);
        infos
    }

    /// Number of registrations (live or not) for a point.
    pub fn registration_count(&self, point_id: &str) -> usize {
        self.slot(point_id)
            .map(|slot| {
                slot.registrations
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .len()
            })
            .unwrap_or(0)
    }

    fn slot(&self, point_id: &str) -> Option<Arc<PointSlot>> {
        let points = self.points.read().unwrap_or_else(|e| e.into_inner());
        points.get(point_id).cloned()
    }

    fn slots(&self) -> Vec<Arc<PointSlot>> {
        let points = self.points.read().unwrap_or_else(|e| e.into_inner());
        points.values().cloned().collect()
    }
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
