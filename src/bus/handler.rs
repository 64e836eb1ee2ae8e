//! Subscriber handler trait.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

use super::event::Event;

/// Boxed error returned by handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result returned by handlers.
pub type HandlerResult = std::result::Result<(), BoxError>;

/// Receives events for a subscribed topic.
///
/// Errors and panics are contained by the bus; they are logged and counted
/// but never reach the publisher or other subscribers.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event.
    async fn handle(&self, event: Arc<Event>) -> HandlerResult;

    /// Name used in logs.
    fn name(&self) -> &str {
        "anonymous"
    }
}

/// Handler backed by an async closure.
pub struct FnHandler<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn handle(&self, event: Arc<Event>) -> HandlerResult {
        (self.f)(event).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Wrap an async closure as a handler.
///
/// ```rust,ignore
/// let handler = handler_fn(|event| async move {
///     println!("{}", event.topic);
///     Ok(())
/// });
/// bus.subscribe("orders", handler)?;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<FnHandler<F>>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    named_handler_fn("fn", f)
}

/// Wrap an async closure as a handler with a name for logs.
pub fn named_handler_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<FnHandler<F>>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        f,
    })
}
