//! Local dispatch of mutation events to registered listeners

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, instrument};

use crate::{ListenerRegistry, MutationEvent, RegisteredListener};

/// Outcome of one dispatch pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Listeners whose callback ran (including failed ones)
    pub invoked: usize,
    /// Listeners rejected by source rules or filters
    pub skipped: usize,
    /// Callbacks that returned an error or panicked
    pub failed: usize,
}

impl DispatchReport {
    pub fn succeeded(&self) -> usize {
        self.invoked - self.failed
    }
}

/// Runs matching listeners for an event, one after another.
#[derive(Clone)]
pub struct LocalDispatcher {
    registry: Arc<ListenerRegistry>,
}

impl LocalDispatcher {
    pub fn new(registry: Arc<ListenerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }

    /// Dispatch to every listener registered for the event's entity type.
    pub async fn dispatch(&self, event: &MutationEvent) -> DispatchReport {
        let listeners = self.registry.listeners_for(&event.entity_type);
        if listeners.is_empty() {
            return DispatchReport::default();
        }
        dispatch_to(&listeners, event).await
    }
}

/// Dispatch to an explicit listener snapshot.
///
/// Callback errors and panics are logged and counted; they never stop the
/// remaining listeners and never propagate to the caller.
#[instrument(
    skip(listeners, event),
    fields(entity_type = %event.entity_type, operation = %event.operation, source = %event.source)
)]
pub async fn dispatch_to(
    listeners: &[Arc<RegisteredListener>],
    event: &MutationEvent,
) -> DispatchReport {
    let mut report = DispatchReport::default();

    for listener in listeners {
        let config = &listener.config;
        if !config.accepts(event.source) || !config.matches(&event.args) {
            report.skipped += 1;
            continue;
        }

        report.invoked += 1;
        let outcome = AssertUnwindSafe(config.callback.on_event(event))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {
                debug!(listener_id = %listener.id, "Listener completed");
            }
            Ok(Err(e)) => {
                report.failed += 1;
                error!(
                    listener_id = %listener.id,
                    listener = %config.callback.name(),
                    error = %e,
                    "Listener failed"
                );
            }
            Err(panic) => {
                report.failed += 1;
                error!(
                    listener_id = %listener.id,
                    listener = %config.callback.name(),
                    panic = %panic_message(panic.as_ref()),
                    "Listener panicked"
                );
            }
        }
    }

    report
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Condition, FieldFilter};
    use crate::{EventSource, ListenerConfig, Operation};
    use serde_json::json;
    use std::sync::Mutex;

    fn recorder(log: Arc<Mutex<Vec<String>>>, tag: &'static str) -> ListenerConfig {
        ListenerConfig::from_fn(move |event| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(format!("{}:{}", tag, event.source));
                Ok(())
            }
        })
    }

    struct Panicking;

    #[async_trait::async_trait]
    impl crate::MutationListener for Panicking {
        async fn on_event(&self, _event: &MutationEvent) -> anyhow::Result<()> {
            panic!("listener blew up")
        }

        fn name(&self) -> &str {
            "panicking"
        }
    }

    fn event(args: serde_json::Value, source: EventSource) -> MutationEvent {
        MutationEvent::new("user", Operation::Update, args, json!({"id": 1}), source)
    }

    #[tokio::test]
    async fn test_no_listeners_is_noop() {
        let dispatcher = LocalDispatcher::new(Arc::new(ListenerRegistry::new()));
        let report = dispatcher.dispatch(&event(json!({}), EventSource::Local)).await;
        assert_eq!(report, DispatchReport::default());
    }

    #[tokio::test]
    async fn test_data_filter_scenario() {
        let registry = Arc::new(ListenerRegistry::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.add(
            "user",
            recorder(log.clone(), "a").with_data(
                FieldFilter::new().field("status", Condition::one_of(["ACTIVE", "BLOCKED"])),
            ),
        );
        let dispatcher = LocalDispatcher::new(registry);

        let report = dispatcher
            .dispatch(&event(json!({"data": {"status": "ACTIVE"}}), EventSource::Local))
            .await;
        assert_eq!(report.invoked, 1);

        let report = dispatcher
            .dispatch(&event(json!({"data": {"status": "PENDING"}}), EventSource::Local))
            .await;
        assert_eq!(report.invoked, 0);
        assert_eq!(report.skipped, 1);

        assert_eq!(*log.lock().unwrap(), vec!["a:local".to_string()]);
    }

    #[tokio::test]
    async fn test_remote_only_never_fires_locally() {
        let registry = Arc::new(ListenerRegistry::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.add("user", recorder(log.clone(), "remote").remote_only());
        registry.add("user", recorder(log.clone(), "local"));
        let dispatcher = LocalDispatcher::new(registry);

        dispatcher.dispatch(&event(json!({}), EventSource::Local)).await;
        dispatcher.dispatch(&event(json!({}), EventSource::Remote)).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["local:local".to_string(), "remote:remote".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let registry = Arc::new(ListenerRegistry::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        registry.add("user", ListenerConfig::new(Arc::new(Panicking)));
        registry.add(
            "user",
            ListenerConfig::from_fn(|_| async { Err(anyhow::anyhow!("listener refused")) }),
        );
        registry.add("user", recorder(log.clone(), "survivor"));
        let dispatcher = LocalDispatcher::new(registry);

        let report = dispatcher.dispatch(&event(json!({}), EventSource::Local)).await;

        assert_eq!(report.invoked, 3);
        assert_eq!(report.failed, 2);
        assert_eq!(report.succeeded(), 1);
        assert_eq!(*log.lock().unwrap(), vec!["survivor:local".to_string()]);
    }

    #[tokio::test]
    async fn test_listeners_run_sequentially_in_order() {
        let registry = Arc::new(ListenerRegistry::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let slow_log = log.clone();
        registry.add(
            "user",
            ListenerConfig::from_fn(move |_| {
                let log = slow_log.clone();
                async move {
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    log.lock().unwrap().push("slow".to_string());
                    Ok(())
                }
            }),
        );
        registry.add("user", recorder(log.clone(), "fast"));
        let dispatcher = LocalDispatcher::new(registry);

        dispatcher.dispatch(&event(json!({}), EventSource::Local)).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["slow".to_string(), "fast:local".to_string()]
        );
    }
}
