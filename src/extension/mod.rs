//! Extension points.
//!
//! An extension point is a named contract (for example `"export.format"`)
//! that plugins implement and other code resolves at runtime:
//!
//! ```rust,ignore
//! use plugin_host::{ExtensionInstance, ExtensionPointDescriptor, ExtensionRegistry};
//!
//! let registry = ExtensionRegistry::new();
//! registry.declare_extension_point(ExtensionPointDescriptor::multiple("export.format", "Export formats"))?;
//! registry.register_extension("export.format", "csv-plugin", ExtensionInstance::new(csv), 10, "CSV")?;
//!
//! // Only implementations owned by STARTED plugins are returned.
//! let formats = registry.resolve_as::<dyn ExportFormat>("export.format");
//! ```

mod registry;
mod types;

pub use registry::ExtensionRegistry;
pub use types::{
    ExtensionDeclaration, ExtensionInfo, ExtensionInstance, ExtensionPointDescriptor,
    ExtensionRegistration,
};
