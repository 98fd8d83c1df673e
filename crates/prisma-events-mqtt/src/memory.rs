//! Process-local broker for tests and single-host development

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use prisma_events_core::{EventsError, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::client::{BrokerClient, BrokerConnector, InboundMessage, InboundSender};
use crate::topic::topic_matches;

/// In-memory broker shared by any number of connections.
///
/// Cloning yields another handle to the same broker, so several hubs in one
/// process behave like separate processes talking through a real broker.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<BrokerState>,
}

struct BrokerState {
    sessions: DashMap<String, Session>,
    online: AtomicBool,
    next_session: AtomicU64,
    published: AtomicUsize,
}

struct Session {
    id: u64,
    inbound: Option<InboundSender>,
    filters: Vec<String>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BrokerState {
                sessions: DashMap::new(),
                online: AtomicBool::new(true),
                next_session: AtomicU64::new(0),
                published: AtomicUsize::new(0),
            }),
        }
    }

    /// Taking the broker offline fails new connects and every client operation.
    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Connected client identities
    pub fn client_ids(&self) -> Vec<String> {
        self.inner
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Topic filters held by `client_id`
    pub fn subscriptions(&self, client_id: &str) -> Vec<String> {
        self.inner
            .sessions
            .get(client_id)
            .map(|session| session.filters.clone())
            .unwrap_or_default()
    }

    /// Messages accepted since the broker was created
    pub fn published_count(&self) -> usize {
        self.inner.published.load(Ordering::SeqCst)
    }

    fn ensure_online(&self) -> Result<()> {
        if self.is_online() {
            Ok(())
        } else {
            Err(EventsError::BrokerError("broker unavailable".to_string()))
        }
    }

    fn deliver(&self, topic: &str, payload: Bytes) {
        for session in self.inner.sessions.iter() {
            let Some(inbound) = &session.inbound else {
                continue;
            };
            if session.filters.iter().any(|filter| topic_matches(filter, topic)) {
                trace!(client_id = %session.key(), topic = %topic, "Delivering message");
                let _ = inbound.send(InboundMessage {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                });
            }
        }
    }
}

#[async_trait]
impl BrokerConnector for MemoryBroker {
    async fn connect(
        &self,
        client_id: &str,
        inbound: Option<InboundSender>,
    ) -> Result<Arc<dyn BrokerClient>> {
        self.ensure_online()?;

        let id = self.inner.next_session.fetch_add(1, Ordering::Relaxed);
        // a reused identity takes over the previous session
        self.inner.sessions.insert(
            client_id.to_string(),
            Session {
                id,
                inbound,
                filters: Vec::new(),
            },
        );
        debug!(client_id = %client_id, "Memory broker client connected");

        Ok(Arc::new(MemoryClient {
            broker: self.clone(),
            client_id: client_id.to_string(),
            session: id,
        }))
    }
}

/// A connection to a [`MemoryBroker`]
pub struct MemoryClient {
    broker: MemoryBroker,
    client_id: String,
    session: u64,
}

impl MemoryClient {
    fn with_session<T>(&self, f: impl FnOnce(&mut Session) -> T) -> Result<T> {
        self.broker.ensure_online()?;
        match self.broker.inner.sessions.get_mut(&self.client_id) {
            Some(mut session) if session.id == self.session => Ok(f(session.value_mut())),
            _ => Err(EventsError::BrokerError(format!(
                "client '{}' is not connected",
                self.client_id
            ))),
        }
    }
}

#[async_trait]
impl BrokerClient for MemoryClient {
    fn is_connected(&self) -> bool {
        self.broker.is_online()
            && self
                .broker
                .inner
                .sessions
                .get(&self.client_id)
                .map(|session| session.id == self.session)
                .unwrap_or(false)
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.with_session(|_| ())?;
        self.broker.inner.published.fetch_add(1, Ordering::SeqCst);
        self.broker.deliver(topic, Bytes::from(payload));
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<()> {
        self.with_session(|session| {
            if !session.filters.iter().any(|f| f == filter) {
                session.filters.push(filter.to_string());
            }
        })
    }

    async fn unsubscribe(&self, filter: &str) -> Result<()> {
        self.with_session(|session| session.filters.retain(|f| f != filter))
    }

    async fn disconnect(&self) -> Result<()> {
        self.broker
            .inner
            .sessions
            .remove_if(&self.client_id, |_, session| session.id == self.session);
        debug!(client_id = %self.client_id, "Memory broker client disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_wildcard_delivery_per_client() {
        let broker = MemoryBroker::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();

        let a = broker.connect("a", Some(tx_a)).await.unwrap();
        let b = broker.connect("b", Some(tx_b)).await.unwrap();
        let publisher = broker.connect("p", None).await.unwrap();

        assert_ok!(a.subscribe("prisma/events/user/#").await);
        assert_ok!(b.subscribe("prisma/events/order/#").await);

        assert_ok!(publisher.publish("prisma/events/user/create", b"{}".to_vec()).await);

        let message = rx_a.recv().await.unwrap();
        assert_eq!(message.topic, "prisma/events/user/create");
        assert!(rx_b.try_recv().is_err());
        assert_eq!(broker.published_count(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_and_disconnect() {
        let broker = MemoryBroker::new();
        let client = broker.connect("c", None).await.unwrap();

        client.subscribe("x/#").await.unwrap();
        client.subscribe("x/#").await.unwrap();
        assert_eq!(broker.subscriptions("c"), vec!["x/#".to_string()]);

        client.unsubscribe("x/#").await.unwrap();
        assert!(broker.subscriptions("c").is_empty());

        client.disconnect().await.unwrap();
        assert!(!client.is_connected());
        assert_err!(client.publish("x/y", Vec::new()).await);
        assert_ok!(client.disconnect().await);
    }

    #[tokio::test]
    async fn test_offline_broker_fails_operations() {
        let broker = MemoryBroker::new();
        let client = broker.connect("c", None).await.unwrap();

        broker.set_online(false);
        assert!(!client.is_connected());
        assert_err!(client.publish("x", Vec::new()).await);
        assert!(broker.connect("d", None).await.is_err());

        broker.set_online(true);
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_reused_identity_takes_over_session() {
        let broker = MemoryBroker::new();
        let first = broker.connect("dup", None).await.unwrap();
        let second = broker.connect("dup", None).await.unwrap();

        assert!(!first.is_connected());
        assert!(second.is_connected());
    }
}
