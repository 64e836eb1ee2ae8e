//! Plugin metadata, lifecycle state and the plugin capability trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use super::context::PluginContext;
use super::error::{HookResult, PluginError, PluginResult};
use crate::extension::{ExtensionDeclaration, ExtensionPointDescriptor};

/// Immutable description of a plugin. Identity is the `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Unique, stable plugin id.
    pub id: String,
    /// Human readable name.
    pub name: String,
    /// Plugin version.
    pub version: String,
    /// Short description.
    #[serde(default)]
    pub description: String,
    /// Plugin author.
    #[serde(default)]
    pub author: String,
    /// Ids of plugins that must be STARTED before this one may start.
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    /// Install time (Unix milliseconds).
    pub install_time: u64,
}

impl PluginMetadata {
    /// Create metadata with the given id, name and version.
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            description: String::new(),
            author: String::new(),
            dependencies: BTreeSet::new(),
            install_time: crate::unix_millis(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the author.
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    /// Add a dependency on another plugin id.
    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.insert(dependency.into());
        self
    }

    /// Check the metadata is well formed.
    pub fn validate(&self) -> PluginResult<()> {
        if self.id.trim().is_empty() {
            return Err(PluginError::InvalidMetadata(
                "plugin id must not be empty".to_string(),
            ));
        }
        if self.id.chars().any(char::is_whitespace) {
            return Err(PluginError::InvalidMetadata(format!(
                "plugin id '{}' must not contain whitespace",
                self.id
            )));
        }
        if self.name.trim().is_empty() {
            return Err(PluginError::InvalidMetadata(format!(
                "plugin '{}' has an empty name",
                self.id
            )));
        }
        if self.version.trim().is_empty() {
            return Err(PluginError::InvalidMetadata(format!(
                "plugin '{}' has an empty version",
                self.id
            )));
        }
        if let Some(dep) = self.dependencies.iter().find(|d| d.trim().is_empty()) {
            return Err(PluginError::InvalidMetadata(format!(
                "plugin '{}' declares an empty dependency id '{}'",
                self.id, dep
            )));
        }
        if self.dependencies.contains(&self.id) {
            return Err(PluginError::InvalidMetadata(format!(
                "plugin '{}' depends on itself",
                self.id
            )));
        }
        Ok(())
    }
}

impl PartialEq for PluginMetadata {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PluginMetadata {}

impl Hash for PluginMetadata {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Lifecycle state of a registered plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    Registered,
    Initialized,
    Started,
    Stopped,
    Uninstalled,
    Failed,
}

impl PluginState {
    /// All states, in lifecycle order.
    pub const ALL: [PluginState; 6] = [
        PluginState::Registered,
        PluginState::Initialized,
        PluginState::Started,
        PluginState::Stopped,
        PluginState::Uninstalled,
        PluginState::Failed,
    ];

    /// Lowercase label, also used as a metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginState::Registered => "registered",
            PluginState::Initialized => "initialized",
            PluginState::Started => "started",
            PluginState::Stopped => "stopped",
            PluginState::Uninstalled => "uninstalled",
            PluginState::Failed => "failed",
        }
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle hook phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Initialize,
    Start,
    Stop,
    Uninstall,
}

impl LifecyclePhase {
    /// Lowercase label.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecyclePhase::Initialize => "initialize",
            LifecyclePhase::Start => "start",
            LifecyclePhase::Stop => "stop",
            LifecyclePhase::Uninstall => "uninstall",
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time snapshot of a registered plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Plugin metadata.
    pub metadata: PluginMetadata,
    /// Current lifecycle state.
    pub state: PluginState,
    /// Error that caused the most recent failed or tolerated hook, if any.
    pub last_error: Option<String>,
    /// Extension declarations rejected at registration time.
    #[serde(default)]
    pub extension_errors: Vec<String>,
    /// Monotonic registration order.
    pub registration_seq: u64,
    /// When the state last changed (Unix milliseconds).
    pub state_changed_at: u64,
}

impl PluginDescriptor {
    /// Plugin id.
    pub fn id(&self) -> &str {
        &self.metadata.id
    }
}

/// Capability interface implemented by every plugin.
///
/// All four lifecycle hooks default to a no-op, so a plugin only implements
/// the ones it needs.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Plugin metadata. Read once, at registration.
    fn metadata(&self) -> PluginMetadata;

    /// Extension points (contracts) this plugin introduces.
    fn extension_points(&self) -> Vec<ExtensionPointDescriptor> {
        Vec::new()
    }

    /// Extension implementations this plugin provides.
    fn extensions(&self) -> Vec<ExtensionDeclaration> {
        Vec::new()
    }

    /// Called once, moving REGISTERED to INITIALIZED.
    async fn initialize(&self, _ctx: &PluginContext) -> HookResult {
        Ok(())
    }

    /// Called on every start (including restarts).
    async fn start(&self, _ctx: &PluginContext) -> HookResult {
        Ok(())
    }

    /// Called on stop. Failures are logged, the plugin still stops.
    async fn stop(&self, _ctx: &PluginContext) -> HookResult {
        Ok(())
    }

    /// Called before the plugin is removed. Failures are logged.
    async fn uninstall(&self, _ctx: &PluginContext) -> HookResult {
        Ok(())
    }
}
