//! Broker publisher

use prisma_events_core::{DedupCache, EventEnvelope, MutationEvent};
use prisma_events_shared::{EventMetrics, PerfTimer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::client::BrokerClient;
use crate::topic::publish_topic;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStatus {
    Published,
    /// Broker disabled, absent or not connected
    Skipped,
    Failed,
}

impl PublishStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishStatus::Published => "published",
            PublishStatus::Skipped => "skipped",
            PublishStatus::Failed => "failed",
        }
    }
}

/// Result of publishing an event
#[derive(Debug, Clone)]
pub struct PublishResult {
    pub status: PublishStatus,
    pub topic: String,
    pub event_id: Option<String>,
    pub error: Option<String>,
}

impl PublishResult {
    pub fn success(event_id: String, topic: String) -> Self {
        Self {
            status: PublishStatus::Published,
            topic,
            event_id: Some(event_id),
            error: None,
        }
    }

    pub fn skipped(topic: String) -> Self {
        Self {
            status: PublishStatus::Skipped,
            topic,
            event_id: None,
            error: None,
        }
    }

    pub fn failure(event_id: String, topic: String, error: String) -> Self {
        Self {
            status: PublishStatus::Failed,
            topic,
            event_id: Some(event_id),
            error: Some(error),
        }
    }

    pub fn is_published(&self) -> bool {
        self.status == PublishStatus::Published
    }
}

/// Publishes locally originated events to the broker.
///
/// Never fails: problems are logged and reported through [`PublishResult`].
pub struct BrokerPublisher {
    client: RwLock<Option<Arc<dyn BrokerClient>>>,
    topic_prefix: String,
    dedup: Arc<DedupCache>,
    timeout: Duration,
}

impl BrokerPublisher {
    pub fn new(
        client: Option<Arc<dyn BrokerClient>>,
        topic_prefix: impl Into<String>,
        dedup: Arc<DedupCache>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: RwLock::new(client),
            topic_prefix: topic_prefix.into(),
            dedup,
            timeout,
        }
    }

    pub fn topic_prefix(&self) -> &str {
        &self.topic_prefix
    }

    pub async fn is_connected(&self) -> bool {
        self.client
            .read()
            .await
            .as_ref()
            .map(|client| client.is_connected())
            .unwrap_or(false)
    }

    /// Publish `event` to `{prefix}/{entity_type}/{operation}`.
    ///
    /// The event id is recorded in the dedup cache before the send so the
    /// copy our own subscription receives is recognised as loop-back.
    #[instrument(
        skip(self, event),
        fields(entity_type = %event.entity_type, operation = %event.operation)
    )]
    pub async fn publish(&self, event: &MutationEvent) -> PublishResult {
        let topic = publish_topic(&self.topic_prefix, &event.entity_type, event.operation);

        let client = match self.client.read().await.as_ref() {
            Some(client) if client.is_connected() => client.clone(),
            _ => {
                debug!(topic = %topic, "Broker not connected, skipping publish");
                EventMetrics::publish(&event.entity_type, PublishStatus::Skipped.as_str());
                return PublishResult::skipped(topic);
            }
        };

        let _timer = PerfTimer::new("prisma_events_publish_duration_seconds")
            .with_label("entity_type", event.entity_type.clone());

        let envelope = EventEnvelope::new(
            event.entity_type.clone(),
            event.operation,
            event.args.clone(),
            event.result.clone(),
        );
        let event_id = envelope.event_id.clone();

        let payload = match envelope.to_vec() {
            Ok(payload) => payload,
            Err(e) => {
                return self.failed(&event.entity_type, event_id, topic, e.to_string());
            }
        };

        self.dedup.record(event_id.clone());

        match tokio::time::timeout(self.timeout, client.publish(&topic, payload)).await {
            Ok(Ok(())) => {
                debug!(topic = %topic, event_id = %event_id, "Event published");
                EventMetrics::publish(&event.entity_type, PublishStatus::Published.as_str());
                PublishResult::success(event_id, topic)
            }
            Ok(Err(e)) => self.failed(&event.entity_type, event_id, topic, e.to_string()),
            Err(_) => self.failed(
                &event.entity_type,
                event_id,
                topic,
                format!("publish timed out after {:?}", self.timeout),
            ),
        }
    }

    fn failed(
        &self,
        entity_type: &str,
        event_id: String,
        topic: String,
        error: String,
    ) -> PublishResult {
        warn!(topic = %topic, event_id = %event_id, error = %error, "Failed to publish event");
        EventMetrics::publish(entity_type, PublishStatus::Failed.as_str());
        PublishResult::failure(event_id, topic, error)
    }

    /// Close the publisher connection; later publishes are skipped.
    pub async fn disconnect(&self) -> prisma_events_core::Result<()> {
        let client = self.client.write().await.take();
        match client {
            Some(client) => client.disconnect().await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockBrokerClient;
    use async_trait::async_trait;
    use prisma_events_core::{EventSource, EventsError, Operation};
    use serde_json::json;

    /// Connected client whose publishes never complete
    struct StalledClient;

    #[async_trait]
    impl BrokerClient for StalledClient {
        fn is_connected(&self) -> bool {
            true
        }

        async fn publish(&self, _topic: &str, _payload: Vec<u8>) -> prisma_events_core::Result<()> {
            std::future::pending().await
        }

        async fn subscribe(&self, _filter: &str) -> prisma_events_core::Result<()> {
            Ok(())
        }

        async fn unsubscribe(&self, _filter: &str) -> prisma_events_core::Result<()> {
            Ok(())
        }

        async fn disconnect(&self) -> prisma_events_core::Result<()> {
            Ok(())
        }
    }

    fn event() -> MutationEvent {
        MutationEvent::new(
            "user",
            Operation::Create,
            json!({"data": {"email": "a@b.c"}}),
            json!({"id": 1, "email": "a@b.c"}),
            EventSource::Local,
        )
    }

    fn publisher(client: Option<MockBrokerClient>, dedup: Arc<DedupCache>) -> BrokerPublisher {
        BrokerPublisher::new(
            client.map(|c| Arc::new(c) as Arc<dyn BrokerClient>),
            "prisma/events",
            dedup,
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_publish_records_id_and_uses_operation_topic() {
        let mut client = MockBrokerClient::new();
        client.expect_is_connected().return_const(true);
        client
            .expect_publish()
            .withf(|topic, payload| {
                topic == "prisma/events/user/create"
                    && EventEnvelope::from_slice(payload).is_ok()
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let dedup = Arc::new(DedupCache::default());
        let result = publisher(Some(client), dedup.clone()).publish(&event()).await;

        assert!(result.is_published());
        let event_id = result.event_id.unwrap();
        assert!(dedup.was_recent(&event_id));
    }

    #[tokio::test]
    async fn test_publish_failure_is_reported_not_raised() {
        let mut client = MockBrokerClient::new();
        client.expect_is_connected().return_const(true);
        client
            .expect_publish()
            .returning(|_, _| Err(EventsError::BrokerError("rejected".to_string())));

        let result = publisher(Some(client), Arc::new(DedupCache::default()))
            .publish(&event())
            .await;

        assert_eq!(result.status, PublishStatus::Failed);
        assert!(result.error.unwrap().contains("rejected"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_publish_times_out() {
        let dedup = Arc::new(DedupCache::default());
        let publisher = BrokerPublisher::new(
            Some(Arc::new(StalledClient) as Arc<dyn BrokerClient>),
            "prisma/events",
            dedup.clone(),
            Duration::from_secs(2),
        );

        let result = publisher.publish(&event()).await;

        assert_eq!(result.status, PublishStatus::Failed);
        assert!(result.error.unwrap().contains("timed out"));
        assert!(dedup.was_recent(&result.event_id.unwrap()));
    }

    #[tokio::test]
    async fn test_skips_when_disconnected_or_absent() {
        let mut client = MockBrokerClient::new();
        client.expect_is_connected().return_const(false);
        client.expect_publish().never();

        let dedup = Arc::new(DedupCache::default());
        let result = publisher(Some(client), dedup.clone()).publish(&event()).await;
        assert_eq!(result.status, PublishStatus::Skipped);
        assert!(dedup.is_empty());

        let result = publisher(None, dedup.clone()).publish(&event()).await;
        assert_eq!(result.status, PublishStatus::Skipped);
        assert_eq!(result.topic, "prisma/events/user/create");
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let mut client = MockBrokerClient::new();
        client.expect_disconnect().times(1).returning(|| Ok(()));

        let publisher = publisher(Some(client), Arc::new(DedupCache::default()));
        publisher.disconnect().await.unwrap();
        publisher.disconnect().await.unwrap();
        assert!(!publisher.is_connected().await);
    }
}
