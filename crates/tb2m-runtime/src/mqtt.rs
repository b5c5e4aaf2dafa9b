//! MQTT session of one device
//!
//! Every device connects with its own client id and last will. The rumqttc
//! event loop runs in its own task. Inbound messages are handed to the device
//! with backpressure: while the device queue is full the event loop waits,
//! which holds back further deliveries without losing any.

use crate::fetch::STATUS_OFFLINE;
use crate::inbound::InboundSender;
use crate::publisher::{BrokerError, Publisher};
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS, SubscribeFilter,
};
use std::time::Duration;
use tb2m_core::DiscoveryRecord;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info};

/// Capacity of the client request channel
const REQUEST_CAPACITY: usize = 32;

/// Delay before polling the event loop again after a connection error
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// How long `close` waits for the disconnect to go out
const CLOSE_TIMEOUT: Duration = Duration::from_millis(250);

/// Broker connection settings shared by every device session
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub qos: QoS,
    pub keep_alive: Duration,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            qos: QoS::AtMostOnce,
            keep_alive: Duration::from_secs(30),
        }
    }
}

/// Map a numeric QoS level (0-2)
pub fn qos_from_level(level: u8) -> Option<QoS> {
    match level {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}

/// Request the subscriptions without holding up the event loop.
///
/// The request channel is shared with publishes and may be full right after
/// a reconnect; the request waits for room while the event loop drains it.
fn subscribe(
    client: AsyncClient,
    filters: Vec<SubscribeFilter>,
    client_id: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let count = filters.len();
        match client.subscribe_many(filters).await {
            Ok(()) => debug!(client_id = %client_id, topics = count, "Subscriptions requested"),
            Err(e) => error!(client_id = %client_id, error = %e, "Failed to subscribe"),
        }
    })
}

/// Drive the rumqttc event loop until a disconnect has been sent
async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    filters: Vec<SubscribeFilter>,
    inbound: InboundSender,
    client_id: String,
) {
    let mut subscribing: Option<JoinHandle<()>> = None;
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!(client_id = %client_id, "Connected to MQTT");
                let task = subscribe(client.clone(), filters.clone(), client_id.clone());
                if let Some(previous) = subscribing.replace(task) {
                    previous.abort();
                }
                inbound.connected();
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let payload = String::from_utf8_lossy(&publish.payload).into_owned();
                if inbound.message(publish.topic, payload).await.is_err() {
                    debug!(client_id = %client_id, "Device gone, dropping message");
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!(client_id = %client_id, "Disconnect sent");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!(client_id = %client_id, error = %e, "Connection lost to MQTT");
                sleep(RECONNECT_DELAY).await;
            }
        }
    }
    if let Some(task) = subscribing {
        task.abort();
    }
}

/// Connection of one device to the broker
pub struct MqttSession {
    client: AsyncClient,
    qos: QoS,
    client_id: String,
    eventloop_task: JoinHandle<()>,
}

impl MqttSession {
    /// Start connecting; `Inbound::Connected` is delivered on every
    /// successful (re)connect, after the subscriptions were requested
    pub fn connect(
        broker: &BrokerSettings,
        record: &DiscoveryRecord,
        subscriptions: Vec<String>,
        inbound: InboundSender,
    ) -> Self {
        let mut options = MqttOptions::new(record.client_id.clone(), broker.host.clone(), broker.port);
        options.set_keep_alive(broker.keep_alive);
        if let Some(username) = &broker.username {
            options.set_credentials(username.clone(), broker.password.clone().unwrap_or_default());
        }
        options.set_last_will(LastWill::new(
            record.will_topic.clone(),
            STATUS_OFFLINE,
            broker.qos,
            true,
        ));

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let filters = subscriptions
            .into_iter()
            .map(|topic| SubscribeFilter::new(topic, broker.qos))
            .collect();

        let eventloop_task = tokio::spawn(drive(
            eventloop,
            client.clone(),
            filters,
            inbound,
            record.client_id.clone(),
        ));

        debug!(client_id = %record.client_id, host = %broker.host, port = broker.port, "MQTT session started");
        Self {
            client,
            qos: broker.qos,
            client_id: record.client_id.clone(),
            eventloop_task,
        }
    }

    pub fn publisher(&self) -> MqttPublisher {
        MqttPublisher {
            client: self.client.clone(),
            qos: self.qos,
        }
    }

    /// Disconnect and stop the session tasks
    pub async fn close(self) {
        match timeout(CLOSE_TIMEOUT, self.client.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(client_id = %self.client_id, error = %e, "Disconnect request failed"),
            Err(_) => debug!(client_id = %self.client_id, "Disconnect request timed out"),
        }
        let abort = self.eventloop_task.abort_handle();
        if timeout(CLOSE_TIMEOUT, self.eventloop_task).await.is_err() {
            debug!(client_id = %self.client_id, "Event loop did not stop, aborting");
            abort.abort();
        }
        info!(client_id = %self.client_id, "MQTT session closed");
    }
}

/// [`Publisher`] backed by a session's client
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    qos: QoS,
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<(), BrokerError> {
        self.client.publish(topic, self.qos, retain, payload).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::Request;

    #[test]
    fn test_qos_levels() {
        assert_eq!(qos_from_level(0), Some(QoS::AtMostOnce));
        assert_eq!(qos_from_level(1), Some(QoS::AtLeastOnce));
        assert_eq!(qos_from_level(2), Some(QoS::ExactlyOnce));
        assert_eq!(qos_from_level(3), None);
    }

    #[tokio::test]
    async fn test_subscribe_waits_for_full_request_channel() {
        let options = MqttOptions::new("tb2m_test", "localhost", 1883);
        let (client, mut eventloop) = AsyncClient::new(options, 2);
        client.try_publish("t/a", QoS::AtMostOnce, true, "1").unwrap();
        client.try_publish("t/b", QoS::AtMostOnce, true, "2").unwrap();

        let filters = vec![SubscribeFilter::new(
            "homeassistant/status".to_string(),
            QoS::AtMostOnce,
        )];
        assert!(client.try_subscribe_many(filters.clone()).is_err());

        let task = subscribe(client.clone(), filters, "tb2m_test".to_string());
        tokio::task::yield_now().await;
        assert!(!task.is_finished());

        // Drain the channel the way a reconnecting event loop would
        for _ in 0..10 {
            eventloop.clean();
            tokio::task::yield_now().await;
            if task.is_finished() {
                break;
            }
        }
        eventloop.clean();
        task.await.unwrap();

        assert!(eventloop
            .pending
            .iter()
            .any(|request| matches!(request, Request::Subscribe(_))));
        assert_eq!(eventloop.pending.len(), 3);
    }
}
