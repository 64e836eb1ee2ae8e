//! Extension point and registration value types.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;

/// A contract other components program against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionPointDescriptor {
    /// Stable contract name.
    pub id: String,
    /// Human description.
    #[serde(default)]
    pub description: String,
    /// Whether more than one live implementation may be registered.
    pub allow_multiple: bool,
}

impl ExtensionPointDescriptor {
    /// Create a descriptor.
    pub fn new(id: impl Into<String>, description: impl Into<String>, allow_multiple: bool) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            allow_multiple,
        }
    }

    /// A point that accepts exactly one implementation.
    pub fn single(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(id, description, false)
    }

    /// A point that accepts many implementations.
    pub fn multiple(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(id, description, true)
    }
}

/// Type-erased extension implementation.
///
/// Wraps an `Arc<T>` (where `T` is usually a trait object) so registries can
/// hold implementations of unrelated contracts side by side.
#[derive(Clone)]
pub struct ExtensionInstance(Arc<dyn Any + Send + Sync>);

impl ExtensionInstance {
    /// Wrap a shared implementation, e.g. `Arc<dyn Formatter>`.
    pub fn new<T>(value: Arc<T>) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        Self(Arc::new(value))
    }

    /// Wrap an owned value.
    pub fn from_value<T>(value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        Self::new(Arc::new(value))
    }

    /// Recover the implementation as `Arc<T>`, if that is what was wrapped.
    pub fn downcast<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.0.downcast_ref::<Arc<T>>().cloned()
    }

    /// Whether two handles refer to the same wrapped implementation.
    pub fn ptr_eq(&self, other: &ExtensionInstance) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for ExtensionInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ExtensionInstance(..)")
    }
}

/// An implementation a plugin offers for an extension point.
#[derive(Debug, Clone)]
pub struct ExtensionDeclaration {
    /// Target extension point.
    pub point_id: String,
    /// Higher priorities resolve first.
    pub priority: i32,
    /// Human description.
    pub description: String,
    /// The implementation.
    pub instance: ExtensionInstance,
}

impl ExtensionDeclaration {
    /// Declare an implementation for `point_id`.
    pub fn new(point_id: impl Into<String>, priority: i32, instance: ExtensionInstance) -> Self {
        Self {
            point_id: point_id.into(),
            priority,
            description: String::new(),
            instance,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// A live binding of a plugin's implementation to an extension point.
#[derive(Debug, Clone)]
pub struct ExtensionRegistration {
    /// Extension point id.
    pub point_id: String,
    /// Owning plugin id.
    pub plugin_id: String,
    /// Higher priorities resolve first.
    pub priority: i32,
    /// Human description.
    pub description: String,
    /// Registration sequence number, the priority tie-break.
    pub sequence: u64,
    /// The implementation.
    pub instance: ExtensionInstance,
}

impl ExtensionRegistration {
    /// Serializable view without the instance.
    pub fn info(&self) -> ExtensionInfo {
        ExtensionInfo {
            point_id: self.point_id.clone(),
            plugin_id: self.plugin_id.clone(),
            priority: self.priority,
            description: self.description.clone(),
            sequence: self.sequence,
        }
    }

    /// Resolution order: descending priority, then ascending sequence.
    pub(crate) fn resolution_key(&self) -> (std::cmp::Reverse<i32>, u64) {
        (std::cmp::Reverse(self.priority), self.sequence)
    }
}

/// Registration details for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionInfo {
    pub point_id: String,
    pub plugin_id: String,
    pub priority: i32,
    pub description: String,
    pub sequence: u64,
}
