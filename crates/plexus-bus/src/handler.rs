//! Subscriber callbacks.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;

use plexus_core::events::Event;

/// Handles events delivered on a topic.
///
/// Delivery is at-least-once: the same event may arrive more than once, so
/// handlers must be idempotent or deduplicate on `event_id`. Returning an
/// error leaves the event unacknowledged in the durable log.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Handle one event.
    async fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

type BoxedHandlerFn =
    dyn Fn(Event) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send + Sync;

/// A closure-based event handler.
pub struct ClosureEventHandler {
    handler: Arc<BoxedHandlerFn>,
}

impl std::fmt::Debug for ClosureEventHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClosureEventHandler")
            .field("handler", &"<closure>")
            .finish()
    }
}

impl ClosureEventHandler {
    /// Creates a new closure-based handler.
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            handler: Arc::new(
                move |event| -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> {
                    Box::pin(handler(event))
                },
            ),
        }
    }
}

#[async_trait]
impl EventHandler for ClosureEventHandler {
    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        (self.handler)(event.clone()).await
    }
}

/// Invoke `handler`, turning a panic into an error.
pub(crate) async fn invoke(handler: &dyn EventHandler, event: &Event) -> anyhow::Result<()> {
    match AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(anyhow::anyhow!(
            "event handler panicked: {}",
            panic_message(panic.as_ref())
        )),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Wrap a closure as a shareable [`EventHandler`].
pub fn handler_fn<F, Fut>(handler: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(ClosureEventHandler::new(handler))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invoke_contains_panics() {
        let handler = handler_fn(|event: Event| async move {
            if event.payload["boom"].as_bool() == Some(true) {
                panic!("handler blew up");
            }
            Ok(())
        });

        let calm = Event::new("ns.test.happened", serde_json::json!({}), None);
        assert!(invoke(handler.as_ref(), &calm).await.is_ok());

        let boom = Event::new("ns.test.happened", serde_json::json!({"boom": true}), None);
        let err = invoke(handler.as_ref(), &boom).await.unwrap_err();
        assert!(err.to_string().contains("handler blew up"));
    }
}
