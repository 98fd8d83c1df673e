//! MQTT transport over rumqttc

use async_trait::async_trait;
use prisma_events_core::{EventsError, Result};
use prisma_events_shared::{BrokerConfig, EventMetrics};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::{BrokerClient, BrokerConnector, InboundMessage, InboundSender};
use crate::url::{BrokerUrl, Transport};

/// Opens rumqttc connections from a [`BrokerConfig`]
pub struct MqttConnector {
    config: BrokerConfig,
    url: BrokerUrl,
}

impl MqttConnector {
    pub fn new(config: BrokerConfig) -> Result<Self> {
        let url = config.broker_url.parse::<BrokerUrl>()?;
        Ok(Self { config, url })
    }

    fn options(&self, client_id: &str) -> Result<MqttOptions> {
        let mut options = if self.url.transport.is_websocket() {
            // the websocket transport takes the full URL as host
            MqttOptions::new(client_id, self.url.websocket_url(), self.url.port)
        } else {
            MqttOptions::new(client_id, self.url.host.clone(), self.url.port)
        };

        options
            .set_keep_alive(Duration::from_secs(self.config.options.keep_alive_secs.max(1)))
            .set_clean_session(self.config.options.clean_session);

        let username = self
            .config
            .options
            .username
            .clone()
            .or_else(|| self.url.username.clone());
        let password = self
            .config
            .options
            .password
            .clone()
            .or_else(|| self.url.password.clone());
        if let Some(username) = username {
            options.set_credentials(username, password.unwrap_or_default());
        }

        match self.url.transport {
            Transport::Tcp => {}
            Transport::Tls => {
                options.set_transport(rumqttc::Transport::tls_with_default_config());
            }
            Transport::Ws => {
                options.set_transport(rumqttc::Transport::Ws);
            }
            Transport::Wss => {
                options.set_transport(rumqttc::Transport::wss_with_default_config());
            }
        }

        Ok(options)
    }
}

#[async_trait]
impl BrokerConnector for MqttConnector {
    async fn connect(
        &self,
        client_id: &str,
        inbound: Option<InboundSender>,
    ) -> Result<Arc<dyn BrokerClient>> {
        let options = self.options(client_id)?;
        let capacity = self.config.options.channel_capacity.max(1);
        let (client, eventloop) = AsyncClient::new(options, capacity);

        let state = Arc::new(ConnectionState {
            client_id: client_id.to_string(),
            connected: AtomicBool::new(false),
            closing: AtomicBool::new(false),
        });

        let driver = tokio::spawn(drive(
            eventloop,
            state.clone(),
            inbound,
            self.config.reconnect_period(),
        ));

        info!(client_id = %client_id, broker = %self.url, "MQTT client started");

        Ok(Arc::new(MqttBrokerClient {
            client,
            state,
            driver: Mutex::new(Some(driver)),
            shutdown_timeout: self.config.connect_timeout(),
        }))
    }
}

struct ConnectionState {
    client_id: String,
    connected: AtomicBool,
    closing: AtomicBool,
}

impl ConnectionState {
    fn set_connected(&self, connected: bool) {
        let was = self.connected.swap(connected, Ordering::SeqCst);
        if was != connected {
            EventMetrics::connection(&self.client_id, connected);
        }
    }
}

/// Polls the event loop until the client disconnects.
///
/// rumqttc reconnects on the next poll after an error; the pause between
/// attempts is the configured reconnect period.
async fn drive(
    mut eventloop: EventLoop,
    state: Arc<ConnectionState>,
    inbound: Option<InboundSender>,
    reconnect_period: Duration,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                state.set_connected(true);
                info!(client_id = %state.client_id, code = ?ack.code, "Connected to MQTT broker");
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if let Some(inbound) = &inbound {
                    let message = InboundMessage {
                        topic: publish.topic,
                        payload: publish.payload,
                    };
                    if inbound.send(message).is_err() {
                        debug!(client_id = %state.client_id, "Inbound receiver dropped");
                    }
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                state.set_connected(false);
                warn!(client_id = %state.client_id, "Broker closed the connection");
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                state.set_connected(false);
                info!(client_id = %state.client_id, "Disconnected from MQTT broker");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                state.set_connected(false);
                if state.closing.load(Ordering::SeqCst) {
                    break;
                }
                warn!(
                    client_id = %state.client_id,
                    error = %e,
                    retry_in_ms = reconnect_period.as_millis() as u64,
                    "MQTT connection error"
                );
                tokio::time::sleep(reconnect_period).await;
            }
        }
    }
}

/// A rumqttc client plus the task driving its event loop
pub struct MqttBrokerClient {
    client: AsyncClient,
    state: Arc<ConnectionState>,
    driver: Mutex<Option<JoinHandle<()>>>,
    shutdown_timeout: Duration,
}

fn broker_error(action: &str, e: impl std::fmt::Display) -> EventsError {
    EventsError::BrokerError(format!("{} failed: {}", action, e))
}

#[async_trait]
impl BrokerClient for MqttBrokerClient {
    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| broker_error("publish", e))
    }

    async fn subscribe(&self, filter: &str) -> Result<()> {
        self.client
            .subscribe(filter, QoS::AtLeastOnce)
            .await
            .map_err(|e| broker_error("subscribe", e))
    }

    async fn unsubscribe(&self, filter: &str) -> Result<()> {
        self.client
            .unsubscribe(filter)
            .await
            .map_err(|e| broker_error("unsubscribe", e))
    }

    async fn disconnect(&self) -> Result<()> {
        let Some(mut driver) = self.driver.lock().await.take() else {
            return Ok(());
        };
        self.state.closing.store(true, Ordering::SeqCst);

        if self.is_connected() {
            if let Err(e) = self.client.try_disconnect() {
                debug!(
                    client_id = %self.state.client_id,
                    error = %e,
                    "Disconnect request not queued"
                );
            }
        }

        if tokio::time::timeout(self.shutdown_timeout, &mut driver).await.is_err() {
            warn!(client_id = %self.state.client_id, "MQTT event loop did not stop in time");
            driver.abort();
        }
        self.state.set_connected(false);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_rejects_bad_url() {
        assert!(MqttConnector::new(BrokerConfig::new("http://localhost")).is_err());
    }

    #[test]
    fn test_options_from_config() {
        let mut config = BrokerConfig::new("mqtt://svc:pw@localhost:1884");
        config.options.keep_alive_secs = 10;
        let connector = MqttConnector::new(config).unwrap();

        let options = connector.options("api-1").unwrap();
        assert_eq!(options.client_id(), "api-1");
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1884));
        assert_eq!(options.keep_alive(), Duration::from_secs(10));
        assert_eq!(
            options.credentials(),
            Some(("svc".to_string(), "pw".to_string()))
        );
    }

    #[tokio::test]
    async fn test_disconnect_without_broker_is_idempotent() {
        let mut config = BrokerConfig::new("mqtt://127.0.0.1:1");
        config.options.connect_timeout_ms = 100;
        config.options.reconnect_period_ms = 10;
        let connector = MqttConnector::new(config).unwrap();

        let client = connector.connect("offline", None).await.unwrap();
        assert!(!client.is_connected());

        client.disconnect().await.unwrap();
        client.disconnect().await.unwrap();
    }
}
