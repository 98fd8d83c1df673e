//! MQTT publish/subscribe bridge for prisma-events

use prisma_events_core::DedupCache;
use prisma_events_shared::{BrokerConfig, ConnectionHealthCheck, HealthAggregator};
use std::sync::Arc;
use tracing::{info, warn};

pub mod client;
pub mod memory;
pub mod mqtt;
pub mod publisher;
pub mod subscriber;
pub mod topic;
pub mod url;

pub use client::*;
pub use memory::*;
pub use mqtt::*;
pub use publisher::*;
pub use subscriber::*;
pub use topic::*;
pub use url::*;

/// Publisher and subscriber sharing one dedup cache.
///
/// The publisher connects immediately under the configured client id; the
/// subscriber connects on first remote interest as `{client_id}-subscriber`.
pub struct BrokerBridge {
    client_id: String,
    publisher: BrokerPublisher,
    subscriber: BrokerSubscriber,
    dedup: Arc<DedupCache>,
}

impl BrokerBridge {
    /// Open the publisher connection. A failed connect is logged and leaves
    /// publishing disabled; local dispatch is unaffected.
    pub async fn connect(config: &BrokerConfig, connector: Arc<dyn BrokerConnector>) -> Self {
        let client_id = config
            .options
            .client_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("prisma-events-{}", uuid::Uuid::new_v4().simple()));
        let dedup = Arc::new(DedupCache::new(config.dedup_ttl()));

        let client = match connector.connect(&client_id, None).await {
            Ok(client) => {
                info!(
                    client_id = %client_id,
                    broker = %config.broker_url,
                    "Publisher connection opened"
                );
                Some(client)
            }
            Err(e) => {
                warn!(client_id = %client_id, error = %e, "Failed to open publisher connection");
                None
            }
        };

        let publisher = BrokerPublisher::new(
            client,
            config.topic_prefix(),
            dedup.clone(),
            config.connect_timeout(),
        );
        let subscriber =
            BrokerSubscriber::new(&client_id, config.topic_prefix(), connector, dedup.clone());

        Self {
            client_id,
            publisher,
            subscriber,
            dedup,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn publisher(&self) -> &BrokerPublisher {
        &self.publisher
    }

    pub fn subscriber(&self) -> &BrokerSubscriber {
        &self.subscriber
    }

    pub fn dedup(&self) -> &Arc<DedupCache> {
        &self.dedup
    }

    /// Close both connections concurrently.
    pub async fn disconnect(&self) {
        let (published, subscribed) =
            tokio::join!(self.publisher.disconnect(), self.subscriber.disconnect());

        if let Err(e) = published {
            warn!(error = %e, "Error closing publisher connection");
        }
        if let Err(e) = subscribed {
            warn!(error = %e, "Error closing subscriber connection");
        }
    }

    /// Connection health as of now
    pub async fn health(&self) -> HealthAggregator {
        let publisher = self.publisher.is_connected().await;
        let subscriber = self.subscriber.is_connected().await;

        HealthAggregator::new()
            .add_check(Box::new(ConnectionHealthCheck::new("publisher", move || publisher)))
            .add_check(Box::new(ConnectionHealthCheck::new("subscriber", move || subscriber)))
    }
}
