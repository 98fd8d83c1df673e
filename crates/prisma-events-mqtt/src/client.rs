//! Transport seam between the bridge and a concrete broker client

use async_trait::async_trait;
use bytes::Bytes;
use prisma_events_core::Result;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A message delivered by the broker for one of our subscriptions
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

pub type InboundSender = mpsc::UnboundedSender<InboundMessage>;

/// One live broker connection.
///
/// Publishes and subscriptions use at-least-once delivery.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Whether the connection is currently established
    fn is_connected(&self) -> bool;

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    async fn subscribe(&self, filter: &str) -> Result<()>;

    async fn unsubscribe(&self, filter: &str) -> Result<()>;

    /// Close the connection. Calling it twice is harmless.
    async fn disconnect(&self) -> Result<()>;
}

/// Opens broker connections under a given client identity.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Open a connection. Messages for its subscriptions are forwarded to
    /// `inbound` when one is given.
    async fn connect(
        &self,
        client_id: &str,
        inbound: Option<InboundSender>,
    ) -> Result<Arc<dyn BrokerClient>>;
}
