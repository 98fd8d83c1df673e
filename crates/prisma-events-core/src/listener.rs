//! Listener callbacks and their registration options

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::filter::{self, FieldFilter};
use crate::{EventSource, MutationEvent};

/// Callback side of a registered listener
#[async_trait]
pub trait MutationListener: Send + Sync {
    /// Handle one mutation event. Errors are logged by the dispatcher and
    /// never reach the write that produced the event.
    async fn on_event(&self, event: &MutationEvent) -> anyhow::Result<()>;

    /// Name used in logs
    fn name(&self) -> &str {
        "listener"
    }
}

type BoxedHandler = dyn Fn(MutationEvent) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

/// Adapter turning an async closure into a [`MutationListener`]
pub struct FnListener {
    handler: Box<BoxedHandler>,
}

impl FnListener {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(MutationEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            handler: Box::new(move |event| Box::pin(f(event))),
        }
    }
}

#[async_trait]
impl MutationListener for FnListener {
    async fn on_event(&self, event: &MutationEvent) -> anyhow::Result<()> {
        (self.handler)(event.clone()).await
    }
}

/// Options for one listener registration
#[derive(Clone)]
pub struct ListenerConfig {
    /// Conditions on `args.where`
    pub where_filter: Option<FieldFilter>,

    /// Conditions on `args.data`
    pub data_filter: Option<FieldFilter>,

    /// Also receive events delivered through the broker
    pub allow_remote: bool,

    /// Only receive events delivered through the broker
    pub remote_only: bool,

    pub callback: Arc<dyn MutationListener>,
}

impl ListenerConfig {
    pub fn new(callback: Arc<dyn MutationListener>) -> Self {
        Self {
            where_filter: None,
            data_filter: None,
            allow_remote: false,
            remote_only: false,
            callback,
        }
    }

    /// Build a config around an async closure.
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(MutationEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::new(Arc::new(FnListener::new(f)))
    }

    pub fn with_where(mut self, filter: FieldFilter) -> Self {
        self.where_filter = Some(filter);
        self
    }

    pub fn with_data(mut self, filter: FieldFilter) -> Self {
        self.data_filter = Some(filter);
        self
    }

    pub fn allow_remote(mut self) -> Self {
        self.allow_remote = true;
        self
    }

    /// Restrict to broker-delivered events. Implies [`allow_remote`](Self::allow_remote).
    pub fn remote_only(mut self) -> Self {
        self.allow_remote = true;
        self.remote_only = true;
        self
    }

    /// Whether the listener wants events from `source` at all, before filters.
    pub fn accepts(&self, source: EventSource) -> bool {
        match source {
            EventSource::Local => !self.remote_only,
            EventSource::Remote => self.allow_remote,
        }
    }

    /// Filter check against the operation arguments.
    pub fn matches(&self, args: &serde_json::Value) -> bool {
        filter::matches(self.where_filter.as_ref(), self.data_filter.as_ref(), args)
    }
}

impl fmt::Debug for ListenerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerConfig")
            .field("where_filter", &self.where_filter)
            .field("data_filter", &self.data_filter)
            .field("allow_remote", &self.allow_remote)
            .field("remote_only", &self.remote_only)
            .field("callback", &self.callback.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Condition;
    use crate::Operation;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_source_acceptance() {
        let local = ListenerConfig::from_fn(|_| async { Ok(()) });
        assert!(local.accepts(EventSource::Local));
        assert!(!local.accepts(EventSource::Remote));

        let both = ListenerConfig::from_fn(|_| async { Ok(()) }).allow_remote();
        assert!(both.accepts(EventSource::Local));
        assert!(both.accepts(EventSource::Remote));

        let remote = ListenerConfig::from_fn(|_| async { Ok(()) }).remote_only();
        assert!(!remote.accepts(EventSource::Local));
        assert!(remote.accepts(EventSource::Remote));
    }

    #[test]
    fn test_config_matches_args() {
        let config = ListenerConfig::from_fn(|_| async { Ok(()) })
            .with_where(FieldFilter::new().field("id", Condition::equals(5)));

        assert!(config.matches(&json!({"where": {"id": 5}})));
        assert!(!config.matches(&json!({"where": {"id": 6}})));
    }

    #[tokio::test]
    async fn test_fn_listener_invokes_closure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let listener = FnListener::new(move |event| {
            let counter = counter.clone();
            async move {
                assert_eq!(event.entity_type, "user");
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let event =
            MutationEvent::new("user", Operation::Create, json!({}), json!({}), EventSource::Local);
        listener.on_event(&event).await.unwrap();
        listener.on_event(&event).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
