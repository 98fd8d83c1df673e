//! Broker subscriber with one broker subscription per entity type

use prisma_events_core::{
    dispatch_to, DedupCache, DispatchReport, EventEnvelope, EventSource, ListenerId,
    RegisteredListener,
};
use prisma_events_shared::EventMetrics;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, instrument, warn};

use crate::client::{BrokerClient, BrokerConnector, InboundMessage};
use crate::topic::{entity_type_from_topic, subscribe_topic};

/// Listeners interested in one subscribe topic
#[derive(Default)]
struct TopicEntry {
    listeners: Vec<Arc<RegisteredListener>>,
    /// Whether the broker subscription is in place
    active: bool,
}

#[derive(Default)]
struct SubscriberState {
    client: Option<Arc<dyn BrokerClient>>,
    pump: Option<JoinHandle<()>>,
    topics: HashMap<String, TopicEntry>,
    /// Set by `disconnect`; no connection is opened afterwards
    closed: bool,
}

struct Shared {
    client_id: String,
    topic_prefix: String,
    connector: Arc<dyn BrokerConnector>,
    dedup: Arc<DedupCache>,
    state: Mutex<SubscriberState>,
}

/// Receives remote events and dispatches them to `allow_remote` listeners.
///
/// The broker connection is opened on first interest. Each entity type maps
/// to one `{prefix}/{entity_type}/#` subscription, shared by all of its
/// remote-eligible listeners and dropped with the last of them.
pub struct BrokerSubscriber {
    shared: Arc<Shared>,
}

impl BrokerSubscriber {
    /// `client_id` is the publisher identity; the subscriber connects as
    /// `{client_id}-subscriber`.
    pub fn new(
        client_id: &str,
        topic_prefix: impl Into<String>,
        connector: Arc<dyn BrokerConnector>,
        dedup: Arc<DedupCache>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                client_id: format!("{}-subscriber", client_id),
                topic_prefix: topic_prefix.into(),
                connector,
                dedup,
                state: Mutex::new(SubscriberState::default()),
            }),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.shared.client_id
    }

    pub async fn is_connected(&self) -> bool {
        self.shared
            .state
            .lock()
            .await
            .client
            .as_ref()
            .map(|client| client.is_connected())
            .unwrap_or(false)
    }

    /// Topics with an active broker subscription
    pub async fn active_topics(&self) -> Vec<String> {
        let state = self.shared.state.lock().await;
        let mut topics: Vec<String> = state
            .topics
            .iter()
            .filter(|(_, entry)| entry.active)
            .map(|(topic, _)| topic.clone())
            .collect();
        topics.sort();
        topics
    }

    /// Add `listener` to its entity type's topic, subscribing on first interest.
    ///
    /// Returns whether the broker subscription is in place afterwards. A
    /// failed connect or subscribe is logged and retried on the next request
    /// for the same topic. After [`disconnect`](Self::disconnect) requests
    /// are refused.
    #[instrument(
        skip(self, listener),
        fields(entity_type = %listener.entity_type, listener_id = %listener.id)
    )]
    pub async fn request_subscription(&self, listener: Arc<RegisteredListener>) -> bool {
        let topic = subscribe_topic(&self.shared.topic_prefix, &listener.entity_type);
        let mut state = self.shared.state.lock().await;

        if state.closed {
            warn!(topic = %topic, "Subscriber disconnected, not subscribing");
            return false;
        }

        let entry = state.topics.entry(topic.clone()).or_default();
        entry.listeners.push(listener);
        if entry.active {
            return true;
        }

        let client = match self.ensure_connected(&mut state).await {
            Some(client) => client,
            None => return false,
        };

        let active = match client.subscribe(&topic).await {
            Ok(()) => {
                info!(topic = %topic, "Subscribed to remote events");
                true
            }
            Err(e) => {
                warn!(topic = %topic, error = %e, "Failed to subscribe to remote events");
                false
            }
        };

        if let Some(entry) = state.topics.get_mut(&topic) {
            entry.active = active;
        }
        EventMetrics::active_subscriptions(state.topics.values().filter(|e| e.active).count());
        active
    }

    /// Remove a listener; the topic is unsubscribed once no listener is left.
    #[instrument(skip(self))]
    pub async fn release_subscription(&self, entity_type: &str, listener_id: ListenerId) {
        let topic = subscribe_topic(&self.shared.topic_prefix, entity_type);
        let mut state = self.shared.state.lock().await;

        let Some(entry) = state.topics.get_mut(&topic) else {
            return;
        };
        entry.listeners.retain(|l| l.id != listener_id);
        if !entry.listeners.is_empty() {
            return;
        }

        let was_active = entry.active;
        state.topics.remove(&topic);

        if was_active {
            if let Some(client) = state.client.clone() {
                match client.unsubscribe(&topic).await {
                    Ok(()) => info!(topic = %topic, "Unsubscribed from remote events"),
                    Err(e) => warn!(topic = %topic, error = %e, "Failed to unsubscribe"),
                }
            }
        }
        EventMetrics::active_subscriptions(state.topics.values().filter(|e| e.active).count());
    }

    async fn ensure_connected(
        &self,
        state: &mut SubscriberState,
    ) -> Option<Arc<dyn BrokerClient>> {
        if let Some(client) = &state.client {
            return Some(client.clone());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        match self.shared.connector.connect(&self.shared.client_id, Some(tx)).await {
            Ok(client) => {
                info!(client_id = %self.shared.client_id, "Subscriber connection opened");
                state.pump = Some(tokio::spawn(pump(Arc::downgrade(&self.shared), rx)));
                state.client = Some(client.clone());
                Some(client)
            }
            Err(e) => {
                warn!(
                    client_id = %self.shared.client_id,
                    error = %e,
                    "Failed to open subscriber connection"
                );
                None
            }
        }
    }

    /// Handle one inbound broker message.
    ///
    /// Returns `None` when the message was dropped before dispatch.
    pub async fn handle_message(&self, message: InboundMessage) -> Option<DispatchReport> {
        handle_message(&self.shared, message).await
    }

    /// Close the subscriber connection and forget every topic.
    ///
    /// Final: later subscription requests are refused, so nothing can
    /// reopen the connection.
    pub async fn disconnect(&self) -> prisma_events_core::Result<()> {
        let (client, pump) = {
            let mut state = self.shared.state.lock().await;
            state.closed = true;
            state.topics.clear();
            (state.client.take(), state.pump.take())
        };

        let result = match client {
            Some(client) => client.disconnect().await,
            None => Ok(()),
        };
        if let Some(pump) = pump {
            pump.abort();
        }
        EventMetrics::active_subscriptions(0);
        result
    }
}

async fn pump(shared: Weak<Shared>, rx: mpsc::UnboundedReceiver<InboundMessage>) {
    let mut messages = UnboundedReceiverStream::new(rx);
    while let Some(message) = messages.next().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        handle_message(&shared, message).await;
    }
    debug!("Subscriber message pump stopped");
}

async fn handle_message(shared: &Shared, message: InboundMessage) -> Option<DispatchReport> {
    let Some(entity_type) = entity_type_from_topic(&shared.topic_prefix, &message.topic) else {
        debug!(topic = %message.topic, "Ignoring message outside the topic namespace");
        return None;
    };
    EventMetrics::remote_received(entity_type);

    let envelope = match EventEnvelope::from_slice(&message.payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(topic = %message.topic, error = %e, "Dropping malformed event");
            EventMetrics::malformed_dropped();
            return None;
        }
    };

    if envelope.entity_type != entity_type {
        warn!(
            topic = %message.topic,
            entity_type = %envelope.entity_type,
            "Dropping event whose entity type does not match its topic"
        );
        EventMetrics::malformed_dropped();
        return None;
    }

    if shared.dedup.was_recent(&envelope.event_id) {
        debug!(
            topic = %message.topic,
            event_id = %envelope.event_id,
            "Dropping loop-back of a local event"
        );
        EventMetrics::loopback_dropped(entity_type);
        return None;
    }

    let listeners = {
        let state = shared.state.lock().await;
        state
            .topics
            .get(&subscribe_topic(&shared.topic_prefix, entity_type))
            .map(|entry| entry.listeners.clone())
            .unwrap_or_default()
    };
    if listeners.is_empty() {
        return Some(DispatchReport::default());
    }

    let event = envelope.into_event(EventSource::Remote);
    let report = dispatch_to(&listeners, &event).await;
    EventMetrics::dispatched(
        entity_type,
        EventSource::Remote.as_str(),
        report.invoked,
        report.failed,
    );
    Some(report)
}
