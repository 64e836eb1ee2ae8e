//! Plugin and extension registry errors.

use std::time::Duration;
use thiserror::Error;

use super::types::{LifecyclePhase, PluginState};

/// Result alias for registry operations.
pub type PluginResult<T> = std::result::Result<T, PluginError>;

/// Result returned by a plugin lifecycle hook.
pub type HookResult = std::result::Result<(), HookError>;

/// Typed failure reported by (or on behalf of) a lifecycle hook.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HookError {
    /// The hook returned an error.
    #[error("{0}")]
    Failed(String),

    /// The hook did not complete within the allotted time.
    #[error("hook timed out after {0:?}")]
    TimedOut(Duration),

    /// The hook panicked.
    #[error("hook panicked: {0}")]
    Panicked(String),
}

impl HookError {
    /// Convenience constructor for a plain failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl From<String> for HookError {
    fn from(message: String) -> Self {
        Self::Failed(message)
    }
}

impl From<&str> for HookError {
    fn from(message: &str) -> Self {
        Self::Failed(message.to_string())
    }
}

/// Errors raised by the plugin registry and the extension registry.
#[derive(Error, Debug)]
pub enum PluginError {
    /// A live plugin with this id is already registered.
    #[error("Plugin '{0}' is already registered")]
    DuplicateId(String),

    /// Plugin metadata failed validation.
    #[error("Invalid plugin metadata: {0}")]
    InvalidMetadata(String),

    /// The requested lifecycle transition is not allowed from the current state.
    #[error("Plugin '{plugin}' cannot move from {from} to {to}")]
    InvalidStateTransition {
        plugin: String,
        from: PluginState,
        to: PluginState,
    },

    /// A declared dependency is not started.
    #[error("Plugin '{plugin}' depends on '{dependency}' which is {}", describe_dependency(.state))]
    DependencyNotSatisfied {
        plugin: String,
        dependency: String,
        state: Option<PluginState>,
    },

    /// A lifecycle hook failed; the plugin moved to FAILED unless the phase tolerates failure.
    #[error("Plugin '{plugin}' {phase} hook failed: {source}")]
    LifecycleHook {
        plugin: String,
        phase: LifecyclePhase,
        #[source]
        source: HookError,
    },

    /// No plugin with this id is registered.
    #[error("Plugin '{0}' not found")]
    NotFound(String),

    /// The plugin failed or was uninstalled; its contexts can no longer
    /// register extensions.
    #[error("Plugin '{0}' has failed or been uninstalled")]
    Retired(String),

    /// The extension point has not been declared.
    #[error("Unknown extension point '{0}'")]
    UnknownExtensionPoint(String),

    /// The extension point was re-declared with a different multiplicity.
    #[error("Extension point '{point}' already declared with allow_multiple={declared}")]
    ExtensionPointConflict { point: String, declared: bool },

    /// A single-implementation point already has a registration.
    #[error("Extension point '{point}' allows a single implementation, already provided by '{existing_plugin}'")]
    SingleImplementationViolation {
        point: String,
        existing_plugin: String,
    },

    /// A listing page request was malformed.
    #[error("Invalid page request: {0}")]
    InvalidPageRequest(String),
}

fn describe_dependency(state: &Option<PluginState>) -> String {
    match state {
        Some(state) => state.to_string(),
        None => "not registered".to_string(),
    }
}

impl PluginError {
    /// Whether the error means the referenced plugin does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
