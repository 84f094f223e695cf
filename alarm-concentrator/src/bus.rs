/**
 * BUS PUBLISHER - Publication MQTT d'un document par connexion
 *
 * RÔLE :
 * Ouvre une connexion au broker, publie un message en QoS 0, puis ferme
 * proprement la connexion avec un court délai de vidage.
 *
 * FONCTIONNEMENT :
 * - Attend le CONNACK (borné par `connect_timeout`)
 * - Publie (at most once, non retenu) et attend l'écriture sur le réseau
 * - Envoie DISCONNECT et laisse `linger` pour vider le tampon
 *
 * Une connexion par message : aucun client partagé entre les requêtes.
 */

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ClientError, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions,
    Outgoing, Packet, QoS,
};
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Immutable broker settings, built once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub linger: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "alarm-concentrator".into(),
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            linger: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("broker connection failed: {0}")]
    Connect(#[source] ConnectionError),

    #[error("broker refused connection: {0:?}")]
    Refused(ConnectReturnCode),

    #[error("no CONNACK from broker within {0:?}")]
    ConnectTimeout(Duration),

    #[error("publish request rejected by client: {0}")]
    Request(#[from] ClientError),

    #[error("publish could not be flushed: {0}")]
    Flush(#[source] ConnectionError),

    #[error("publish not flushed within {0:?}")]
    FlushTimeout(Duration),
}

/// Delivers one payload to the subscribers of a topic
#[async_trait]
pub trait Publisher: Send + Sync + 'static {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError>;
}

/// rumqttc publisher, one broker connection per message
#[derive(Debug, Clone)]
pub struct MqttPublisher {
    config: BusConfig,
}

impl MqttPublisher {
    pub fn new(config: BusConfig) -> Self {
        Self { config }
    }

    fn options(&self) -> MqttOptions {
        let mut opts = MqttOptions::new(
            self.config.client_id.clone(),
            self.config.host.clone(),
            self.config.port,
        );
        opts.set_keep_alive(self.config.keep_alive);
        opts.set_clean_session(true);
        opts
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        let (client, mut eventloop) = AsyncClient::new(self.options(), 10);
        let wait = self.config.connect_timeout;

        timeout(wait, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| PublishError::ConnectTimeout(wait))??;
        debug!(broker = %self.config.host, port = self.config.port, "connected to broker");

        client
            .publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .await?;

        timeout(wait, wait_for_outgoing(&mut eventloop, |o| matches!(o, Outgoing::Publish(_))))
            .await
            .map_err(|_| PublishError::FlushTimeout(wait))?
            .map_err(PublishError::Flush)?;
        debug!(topic, bytes = payload.len(), "message published");

        // the message is already on the wire, a failed disconnect is only noise
        if let Err(e) = client.disconnect().await {
            warn!(error = %e, "broker disconnect request failed");
            return Ok(());
        }
        let linger = self.config.linger;
        match timeout(linger, wait_for_outgoing(&mut eventloop, |o| matches!(o, Outgoing::Disconnect))).await {
            Ok(Ok(())) => debug!("disconnected from broker"),
            Ok(Err(e)) => debug!(error = %e, "broker connection closed during disconnect"),
            Err(_) => debug!(?linger, "disconnect not flushed before linger elapsed"),
        }
        Ok(())
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), PublishError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(PublishError::Refused(code)),
                };
            }
            Ok(_) => {}
            Err(ConnectionError::ConnectionRefused(code)) => return Err(PublishError::Refused(code)),
            Err(e) => return Err(PublishError::Connect(e)),
        }
    }
}

async fn wait_for_outgoing<F>(eventloop: &mut EventLoop, wanted: F) -> Result<(), ConnectionError>
where
    F: Fn(&Outgoing) -> bool,
{
    loop {
        if let Event::Outgoing(outgoing) = eventloop.poll().await? {
            if wanted(&outgoing) {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concentrator_devkit::{unused_local_addr, BrokerStub};
    use tokio::net::TcpListener;

    fn config_for(host: &str, port: u16) -> BusConfig {
        BusConfig {
            host: host.into(),
            port,
            client_id: "bus-test".into(),
            connect_timeout: Duration::from_secs(2),
            ..BusConfig::default()
        }
    }

    #[tokio::test]
    async fn test_publishes_at_most_once_and_disconnects() {
        let broker = BrokerStub::start().await.unwrap();
        let publisher = MqttPublisher::new(config_for(&broker.host(), broker.port()));

        publisher.publish("topic/alarmConcentrator", r#"{"a":1}"#).await.unwrap();

        let messages = broker
            .wait_for_messages("topic/alarmConcentrator", 1, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(messages[0].payload, br#"{"a":1}"#);
        assert_eq!(messages[0].qos, 0);
        assert!(!messages[0].retain);
        assert_eq!(broker.client_ids(), vec!["bus-test".to_string()]);
        assert!(broker.wait_for_disconnects(1, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_each_publish_opens_its_own_connection() {
        let broker = BrokerStub::start().await.unwrap();
        let publisher = MqttPublisher::new(config_for(&broker.host(), broker.port()));

        publisher.publish("t", "one").await.unwrap();
        publisher.publish("t", "two").await.unwrap();

        let messages = broker.wait_for_messages("t", 2, Duration::from_secs(2)).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(broker.connection_count(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_broker_is_a_connect_error() {
        let addr = unused_local_addr().unwrap();
        let publisher = MqttPublisher::new(config_for(&addr.ip().to_string(), addr.port()));

        let err = publisher.publish("t", "lost").await.unwrap_err();
        assert!(matches!(err, PublishError::Connect(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_refused_connack_is_reported() {
        let broker = BrokerStub::start_refusing().await.unwrap();
        let publisher = MqttPublisher::new(config_for(&broker.host(), broker.port()));

        let err = publisher.publish("t", "denied").await.unwrap_err();
        assert!(matches!(err, PublishError::Refused(_)), "{err:?}");
        assert!(broker.published_messages().is_empty());
    }

    #[tokio::test]
    async fn test_silent_broker_times_out() {
        // accepts TCP but never answers CONNECT
        let silent = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = silent.local_addr().unwrap();
        let _hold = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = silent.accept().await {
                held.push(stream);
            }
        });

        let mut config = config_for("127.0.0.1", addr.port());
        config.connect_timeout = Duration::from_millis(200);
        let err = MqttPublisher::new(config).publish("t", "x").await.unwrap_err();
        assert!(matches!(err, PublishError::ConnectTimeout(_)), "{err:?}");
    }
}
