//! Builder for closure-backed plugins.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

use super::context::PluginContext;
use super::error::HookResult;
use super::types::{Plugin, PluginMetadata};
use crate::extension::{ExtensionDeclaration, ExtensionInstance, ExtensionPointDescriptor};

type HookFn = Arc<dyn Fn(PluginContext) -> BoxFuture<'static, HookResult> + Send + Sync>;

#[derive(Default, Clone)]
struct Hooks {
    initialize: Option<HookFn>,
    start: Option<HookFn>,
    stop: Option<HookFn>,
    uninstall: Option<HookFn>,
}

fn hook<F, Fut>(f: F) -> HookFn
where
    F: Fn(PluginContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HookResult> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Builds a plugin from metadata, declarations and optional hook closures.
///
/// Omitted hooks are no-ops.
///
/// ```rust,ignore
/// let plugin = PluginBuilder::new("audit")
///     .name("Audit log")
///     .version("1.2.0")
///     .dependency("storage")
///     .extension("export.format", 10, ExtensionInstance::new(csv))
///     .on_start(|ctx| async move {
///         ctx.publish("audit.ready", Payload::empty()).await.ok();
///         Ok(())
///     })
///     .build();
/// ```
pub struct PluginBuilder {
    metadata: PluginMetadata,
    extension_points: Vec<ExtensionPointDescriptor>,
    extensions: Vec<ExtensionDeclaration>,
    hooks: Hooks,
}

impl PluginBuilder {
    /// Start a plugin with the given id. Name defaults to the id.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            metadata: PluginMetadata::new(id.clone(), id, "0.1.0"),
            extension_points: Vec::new(),
            extensions: Vec::new(),
            hooks: Hooks::default(),
        }
    }

    /// Set the display name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = name.into();
        self
    }

    /// Set the version.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.metadata.version = version.into();
        self
    }

    /// Set the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = description.into();
        self
    }

    /// Set the author.
    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.metadata.author = author.into();
        self
    }

    /// Require another plugin to be STARTED first.
    pub fn dependency(mut self, plugin_id: impl Into<String>) -> Self {
        self.metadata.dependencies.insert(plugin_id.into());
        self
    }

    /// Introduce an extension point.
    pub fn extension_point(mut self, descriptor: ExtensionPointDescriptor) -> Self {
        self.extension_points.push(descriptor);
        self
    }

    /// Provide an implementation for an extension point.
    pub fn extension(
        mut self,
        point_id: impl Into<String>,
        priority: i32,
        instance: ExtensionInstance,
    ) -> Self {
        self.extensions
            .push(ExtensionDeclaration::new(point_id, priority, instance));
        self
    }

    /// Provide a fully described extension declaration.
    pub fn extension_declaration(mut self, declaration: ExtensionDeclaration) -> Self {
        self.extensions.push(declaration);
        self
    }

    /// Run `f` on initialize.
    pub fn on_initialize<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(PluginContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        self.hooks.initialize = Some(hook(f));
        self
    }

    /// Run `f` on every start.
    pub fn on_start<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(PluginContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        self.hooks.start = Some(hook(f));
        self
    }

    /// Run `f` on every stop.
    pub fn on_stop<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(PluginContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        self.hooks.stop = Some(hook(f));
        self
    }

    /// Run `f` on uninstall.
    pub fn on_uninstall<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(PluginContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        self.hooks.uninstall = Some(hook(f));
        self
    }

    /// Build the plugin.
    pub fn build(self) -> Arc<dyn Plugin> {
        Arc::new(BuiltPlugin {
            metadata: self.metadata,
            extension_points: self.extension_points,
            extensions: self.extensions,
            hooks: self.hooks,
        })
    }
}

struct BuiltPlugin {
    metadata: PluginMetadata,
    extension_points: Vec<ExtensionPointDescriptor>,
    extensions: Vec<ExtensionDeclaration>,
    hooks: Hooks,
}

impl BuiltPlugin {
    async fn run(hook: &Option<HookFn>, ctx: &PluginContext) -> HookResult {
        match hook {
            Some(f) => f(ctx.clone()).await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Plugin for BuiltPlugin {
    fn metadata(&self) -> PluginMetadata {
        self.metadata.clone()
    }

    fn extension_points(&self) -> Vec<ExtensionPointDescriptor> {
        self.extension_points.clone()
    }

    fn extensions(&self) -> Vec<ExtensionDeclaration> {
        self.extensions.clone()
    }

    async fn initialize(&self, ctx: &PluginContext) -> HookResult {
        Self::run(&self.hooks.initialize, ctx).await
    }

    async fn start(&self, ctx: &PluginContext) -> HookResult {
        Self::run(&self.hooks.start, ctx).await
    }

    async fn stop(&self, ctx: &PluginContext) -> HookResult {
        Self::run(&self.hooks.stop, ctx).await
    }

    async fn uninstall(&self, ctx: &PluginContext) -> HookResult {
        Self::run(&self.hooks.uninstall, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::config::BusConfig;
    use crate::extension::ExtensionRegistry;
    use crate::plugin::HookError;

    fn context(id: &str) -> PluginContext {
        PluginContext::new(
            id,
            Arc::new(EventBus::new(BusConfig::default())),
            Arc::new(ExtensionRegistry::new()),
        )
    }

    #[test]
    fn test_builder_sets_metadata() {
        let plugin = PluginBuilder::new("audit")
            .name("Audit")
            .version("2.0.0")
            .author("Ops")
            .dependency("storage")
            .build();

        let metadata = plugin.metadata();
        assert_eq!(metadata.id, "audit");
        assert_eq!(metadata.name, "Audit");
        assert_eq!(metadata.version, "2.0.0");
        assert!(metadata.dependencies.contains("storage"));
    }

    #[test]
    fn test_builder_collects_declarations() {
        let plugin = PluginBuilder::new("fmt")
            .extension_point(ExtensionPointDescriptor::multiple("format", ""))
            .extension("format", 5, ExtensionInstance::from_value("csv"))
            .build();

        assert_eq!(plugin.extension_points().len(), 1);
        assert_eq!(plugin.extensions()[0].priority, 5);
    }

    #[tokio::test]
    async fn test_omitted_hooks_are_noops() {
        let plugin = PluginBuilder::new("quiet").build();
        let ctx = context("quiet");

        assert!(plugin.initialize(&ctx).await.is_ok());
        assert!(plugin.start(&ctx).await.is_ok());
        assert!(plugin.stop(&ctx).await.is_ok());
        assert!(plugin.uninstall(&ctx).await.is_ok());
    }

    #[tokio::test]
    async fn test_hook_closure_receives_context() {
        let plugin = PluginBuilder::new("loud")
            .on_start(|ctx| async move {
                if ctx.plugin_id() == "loud" {
                    Err(HookError::failed("refusing to start"))
                } else {
                    Ok(())
                }
            })
            .build();

        let result = plugin.start(&context("loud")).await;
        assert_eq!(result, Err(HookError::failed("refusing to start")));
    }
}
