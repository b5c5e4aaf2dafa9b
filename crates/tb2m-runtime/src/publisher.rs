//! Outbound MQTT seam

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
}

/// Publishes payloads for one device
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<(), BrokerError>;
}
