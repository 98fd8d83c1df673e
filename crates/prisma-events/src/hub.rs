//! The event hub: registration, emission and broker lifecycle

use prisma_events_core::{
    DispatchReport, EventSource, ListenerConfig, ListenerId, ListenerRegistry, LocalDispatcher,
    MutationEvent, Operation, RegisteredListener,
};
use prisma_events_mqtt::{BrokerBridge, BrokerConnector, MqttConnector, PublishResult};
use prisma_events_shared::{EventMetrics, EventsConfig, HealthAggregator, HealthStatus};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::interceptor::{split_emit_flag, EmitFlags};

/// What happened to one emitted mutation
#[derive(Debug, Clone, Default)]
pub struct EmitReport {
    /// `None` when local emission was off
    pub dispatch: Option<DispatchReport>,
    /// `None` when remote emission was off or no broker is configured
    pub publish: Option<PublishResult>,
}

struct HubInner {
    registry: Arc<ListenerRegistry>,
    dispatcher: LocalDispatcher,
    bridge: Option<BrokerBridge>,
    emit_defaults: EmitFlags,
    closed: AtomicBool,
}

/// One event distribution service.
///
/// Holds the listener registry and, when a broker is configured and enabled,
/// the publisher/subscriber pair. Cloning shares the same hub.
#[derive(Clone)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

impl EventHub {
    /// Hub without a broker: every event stays in this process.
    pub fn local() -> Self {
        Self::build(None, EmitFlags::all())
    }

    /// Hub using the MQTT transport when `config.broker` is present and enabled.
    ///
    /// An unusable broker URL is logged and leaves the hub local-only.
    pub async fn connect(config: EventsConfig) -> Self {
        let connector = match config.broker.as_ref().filter(|broker| broker.enabled) {
            Some(broker) => match MqttConnector::new(broker.clone()) {
                Ok(connector) => Some(Arc::new(connector) as Arc<dyn BrokerConnector>),
                Err(e) => {
                    warn!(error = %e, "Invalid broker configuration, events stay local");
                    None
                }
            },
            None => None,
        };

        match connector {
            Some(connector) => Self::with_connector(config, connector).await,
            None => Self::build(None, EmitFlags::from(&config.emit)),
        }
    }

    /// Hub using an explicit transport, e.g. a shared `MemoryBroker`.
    pub async fn with_connector(config: EventsConfig, connector: Arc<dyn BrokerConnector>) -> Self {
        let emit_defaults = EmitFlags::from(&config.emit);

        let bridge = match config.broker.as_ref() {
            Some(broker) if broker.enabled => Some(BrokerBridge::connect(broker, connector).await),
            Some(_) => {
                info!("Broker disabled, events stay local");
                None
            }
            None => None,
        };

        Self::build(bridge, emit_defaults)
    }

    fn build(bridge: Option<BrokerBridge>, emit_defaults: EmitFlags) -> Self {
        let registry = Arc::new(ListenerRegistry::new());
        Self {
            inner: Arc::new(HubInner {
                dispatcher: LocalDispatcher::new(registry.clone()),
                registry,
                bridge,
                emit_defaults,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Registered listeners
    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.inner.registry
    }

    /// Broker bridge, absent when the hub is local-only
    pub fn bridge(&self) -> Option<&BrokerBridge> {
        self.inner.bridge.as_ref()
    }

    /// Flags applied by [`intercept`](Self::intercept) when args carry none
    pub fn emit_defaults(&self) -> EmitFlags {
        self.inner.emit_defaults
    }

    /// Register a listener for `entity_type`.
    ///
    /// Remote-eligible listeners also claim the entity type's broker
    /// subscription. Without a broker, or after [`disconnect`](Self::disconnect),
    /// they only ever see local events.
    #[instrument(skip(self, config), fields(entity_type = %entity_type))]
    pub async fn register(&self, entity_type: &str, config: ListenerConfig) -> ListenerHandle {
        let listener = self.inner.registry.add(entity_type, config);

        if listener.config.allow_remote {
            match &self.inner.bridge {
                Some(_) if self.inner.closed.load(Ordering::SeqCst) => {
                    warn!(
                        listener_id = %listener.id,
                        "Remote events requested after disconnect; listener is local-only"
                    );
                }
                Some(bridge) => {
                    bridge.subscriber().request_subscription(listener.clone()).await;
                }
                None => {
                    warn!(
                        listener_id = %listener.id,
                        "Remote events requested without a broker; listener is local-only"
                    );
                }
            }
        }

        ListenerHandle {
            hub: self.clone(),
            listener,
        }
    }

    /// Run local listeners, then publish.
    ///
    /// Never fails; listener and broker problems are logged and reported.
    #[instrument(
        skip(self, args, result),
        fields(entity_type = %entity_type, operation = %operation)
    )]
    pub async fn emit(
        &self,
        entity_type: &str,
        operation: Operation,
        args: Value,
        result: Value,
        flags: EmitFlags,
    ) -> EmitReport {
        let event = MutationEvent::new(entity_type, operation, args, result, EventSource::Local);
        let mut report = EmitReport::default();

        if flags.local {
            let dispatch = self.inner.dispatcher.dispatch(&event).await;
            EventMetrics::dispatched(
                entity_type,
                EventSource::Local.as_str(),
                dispatch.invoked,
                dispatch.failed,
            );
            report.dispatch = Some(dispatch);
        }

        if flags.remote {
            if let Some(bridge) = &self.inner.bridge {
                report.publish = Some(bridge.publisher().publish(&event).await);
            }
        }

        report
    }

    /// Wrap one mutation: strip the emit flag, run `executor` with the
    /// cleaned args and emit on success.
    ///
    /// An executor error is returned untouched and nothing is emitted.
    pub async fn intercept<F, Fut, E>(
        &self,
        entity_type: &str,
        operation: Operation,
        args: Value,
        executor: F,
    ) -> Result<Value, E>
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        let (args, flags) = split_emit_flag(args, self.inner.emit_defaults);
        let result = executor(args.clone()).await?;
        self.emit(entity_type, operation, args, result.clone(), flags).await;
        Ok(result)
    }

    /// Close broker connections. Returns at once when none were opened;
    /// calling it again is a no-op.
    ///
    /// The hub stays usable for local events but never reconnects.
    pub async fn disconnect(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            debug!("Event hub already disconnected");
            return;
        }
        if let Some(bridge) = &self.inner.bridge {
            bridge.disconnect().await;
            info!(client_id = %bridge.client_id(), "Event hub disconnected");
        }
    }

    /// Broker connection health; always healthy without a broker
    pub async fn health(&self) -> HealthStatus {
        match &self.inner.bridge {
            Some(bridge) => bridge.health().await.overall_status(),
            None => HealthAggregator::new().overall_status(),
        }
    }

    async fn unregister(&self, listener: &RegisteredListener) -> bool {
        let removed = self
            .inner
            .registry
            .remove(&listener.entity_type, listener.id)
            .is_some();

        if removed && listener.config.allow_remote {
            if let Some(bridge) = &self.inner.bridge {
                bridge
                    .subscriber()
                    .release_subscription(&listener.entity_type, listener.id)
                    .await;
            }
        }
        removed
    }
}

/// Returned by [`EventHub::register`]; unregisters exactly that registration.
pub struct ListenerHandle {
    hub: EventHub,
    listener: Arc<RegisteredListener>,
}

impl ListenerHandle {
    /// Identity of the registration
    pub fn id(&self) -> ListenerId {
        self.listener.id
    }

    /// Entity type the listener is registered for
    pub fn entity_type(&self) -> &str {
        &self.listener.entity_type
    }

    /// Returns false when the listener was already gone.
    pub async fn unregister(self) -> bool {
        self.hub.unregister(&self.listener).await
    }
}
