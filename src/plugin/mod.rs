//! Plugin System
//!
//! Lifecycle management for runtime plugins.
//!
//! A plugin moves through a fixed state machine:
//! - **REGISTERED** after [`PluginRegistry::register`]
//! - **INITIALIZED** once its initialize hook succeeds
//! - **STARTED** / **STOPPED** on start and stop, any number of times
//! - **FAILED** when initialize or start fails (terminal until uninstalled)
//!
//! Only STARTED plugins have resolvable extensions.
//!
//! # Example
//!
//! ```rust,ignore
//! use plugin_host::plugin::{PluginBuilder, PluginRegistry};
//!
//! let plugin = PluginBuilder::new("csv-export")
//!     .description("CSV export format")
//!     .dependency("storage")
//!     .extension("export.format", 10, ExtensionInstance::new(csv))
//!     .on_start(|ctx| async move {
//!         ctx.publish("export.ready", Payload::text("csv")).await.ok();
//!         Ok(())
//!     })
//!     .build();
//!
//! registry.register(plugin).await?;
//! registry.initialize("csv-export").await?;
//! registry.start("csv-export").await?;
//! ```

mod builder;
mod context;
mod error;
mod registry;
mod types;

pub use builder::PluginBuilder;
pub use context::PluginContext;
pub use error::{HookError, HookResult, PluginError, PluginResult};
pub use registry::{LifecycleEvent, PluginRegistry};
pub use types::{LifecyclePhase, Plugin, PluginDescriptor, PluginMetadata, PluginState};
