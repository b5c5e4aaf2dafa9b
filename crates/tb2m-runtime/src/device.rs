//! Device runtime
//!
//! One runtime per discovery record. It owns two loops: the poll loop
//! (spawned) and the command dispatch loop (run inline), which consumes the
//! device's inbound MQTT messages.

use crate::command::resolve_command;
use crate::control::PollHandle;
use crate::error::{truncate_error, RuntimeError, CLEARED};
use crate::fetch::STATUS_OFFLINE;
use crate::inbound::{Inbound, InboundReceiver};
use crate::poll::PollLoop;
use crate::publisher::{BrokerError, Publisher};
use crate::settings::RuntimeSettings;
use std::sync::Arc;
use std::time::Duration;
use tb2m_core::DiscoveryRecord;
use tb2m_proxy::ProxyApi;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Bound on the final offline publish during shutdown
const SHUTDOWN_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

const BIRTH_ONLINE: &str = "online";

/// Topics a device's MQTT session subscribes to: every command topic plus
/// the Home Assistant birth topic
pub fn subscriptions(record: &DiscoveryRecord, settings: &RuntimeSettings) -> Vec<String> {
    let mut topics: Vec<String> = record.bindings.subscribe.keys().cloned().collect();
    let birth = settings.birth_topic();
    if !topics.contains(&birth) {
        topics.push(birth);
    }
    topics
}

/// State shared by the poll and dispatch loops of one device
pub(crate) struct DeviceContext {
    pub(crate) record: Arc<DiscoveryRecord>,
    pub(crate) settings: Arc<RuntimeSettings>,
    pub(crate) proxy: Arc<dyn ProxyApi>,
    pub(crate) publisher: Arc<dyn Publisher>,
    /// Process start, for the bridge uptime
    pub(crate) started: Instant,
}

impl DeviceContext {
    pub(crate) fn id(&self) -> &str {
        &self.record.client_id
    }

    /// Publish an error (or `null` to clear it) on the device error topic
    pub(crate) async fn publish_error(&self, err: Option<&RuntimeError>) {
        let topic = self.settings.error_topic(&self.record.vin);
        let payload = match err {
            Some(err) => truncate_error(&err.to_string()),
            None => CLEARED.to_string(),
        };
        if let Err(e) = self.publisher.publish(&topic, payload, true).await {
            error!(device = %self.id(), topic = %topic, error = %e, "Failed to publish error");
        }
    }

    /// Publish the discovery document, preceded by the reset document when
    /// configured
    async fn announce(&self) -> Result<(), BrokerError> {
        let record = &self.record;
        if self.settings.reset_discovery {
            match record.reset_payload() {
                Ok(reset) => {
                    let payload = reset.to_string();
                    debug!(topic = %record.discovery_topic, len = payload.len(), "Resetting discovery");
                    self.publisher
                        .publish(&record.discovery_topic, payload, true)
                        .await?;
                }
                Err(e) => error!(device = %self.id(), error = %e, "Failed to generate reset discovery"),
            }
        }

        let payload = record.payload.to_string();
        debug!(topic = %record.discovery_topic, len = payload.len(), "Publishing discovery");
        self.publisher
            .publish(&record.discovery_topic, payload, true)
            .await
    }
}

/// Poll and command runtime of one device
pub struct DeviceRuntime {
    ctx: Arc<DeviceContext>,
}

impl DeviceRuntime {
    pub fn new(
        record: Arc<DiscoveryRecord>,
        settings: Arc<RuntimeSettings>,
        proxy: Arc<dyn ProxyApi>,
        publisher: Arc<dyn Publisher>,
        started: Instant,
    ) -> Self {
        Self {
            ctx: Arc::new(DeviceContext {
                record,
                settings,
                proxy,
                publisher,
                started,
            }),
        }
    }

    /// Run until `cancel` fires, then mark the device offline
    pub async fn run(self, mut inbound: InboundReceiver, cancel: CancellationToken) {
        let ctx = self.ctx;
        let (poll, control_rx) = PollHandle::channel();
        let poll_cancel = cancel.child_token();
        let poll_task = tokio::spawn(PollLoop::new(ctx.clone(), control_rx).run(poll_cancel.clone()));

        info!(device = %ctx.id(), kind = %ctx.record.kind, "Device runtime started");
        let dispatcher = Dispatcher { ctx: ctx.clone(), poll };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                message = inbound.recv() => {
                    let Some(message) = message else {
                        warn!(device = %ctx.id(), "Inbound queue closed");
                        cancel.cancelled().await;
                        break;
                    };
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = dispatcher.handle(message) => {}
                    }
                }
            }
        }

        debug!(device = %ctx.id(), "Context done, shutting down");
        poll_cancel.cancel();
        if let Err(e) = poll_task.await {
            error!(device = %ctx.id(), error = %e, "Poll loop failed");
        }

        let will = ctx.record.will_topic.clone();
        match timeout(
            SHUTDOWN_PUBLISH_TIMEOUT,
            ctx.publisher.publish(&will, STATUS_OFFLINE.to_string(), true),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(device = %ctx.id(), error = %e, "Failed to publish offline status"),
            Err(_) => warn!(device = %ctx.id(), "Timed out publishing offline status"),
        }
        info!(device = %ctx.id(), "Device runtime stopped");
    }
}

struct Dispatcher {
    ctx: Arc<DeviceContext>,
    poll: PollHandle,
}

impl Dispatcher {
    async fn handle(&self, message: Inbound) {
        match message {
            Inbound::Connected => {
                info!(device = %self.ctx.id(), "Connected to MQTT");
                self.reannounce().await;
            }
            Inbound::Message { topic, payload } => {
                debug!(device = %self.ctx.id(), topic = %topic, message = %payload, "Received message");
                if topic == self.ctx.settings.birth_topic() {
                    if payload != BIRTH_ONLINE {
                        debug!(to = %payload, "HA status changed");
                        return;
                    }
                    info!(device = %self.ctx.id(), topic = %topic, "Resending discovery");
                    self.reannounce().await;
                } else if let Err(e) = self.command(&topic, &payload).await {
                    error!(device = %self.ctx.id(), topic = %topic, error = %e, "Failed to handle command");
                    self.ctx.publish_error(Some(&e)).await;
                }
            }
        }
    }

    async fn reannounce(&self) {
        if let Err(e) = self.ctx.announce().await {
            error!(device = %self.ctx.id(), error = %e, "Failed to publish discovery");
        }
        self.poll.clear_stale().await;
    }

    async fn command(&self, topic: &str, payload: &str) -> Result<(), RuntimeError> {
        let record = &self.ctx.record;
        let Some(commands) = record.bindings.subscribe.get(topic) else {
            warn!(device = %self.ctx.id(), topic = %topic, "No handler for message");
            return Ok(());
        };
        let command = resolve_command(commands, payload)?;
        info!(
            device = %self.ctx.id(),
            key = %command.key,
            action = %command.action,
            body = command.body.as_deref().unwrap_or(""),
            "Handling command"
        );

        let _paused = self.poll.pause().await?;

        if command.clears_error() {
            self.ctx.publish_error(None).await;
            return Ok(());
        }

        self.ctx
            .proxy
            .post(&command.endpoint(&record.vin), command.body.as_deref())
            .await
            .map_err(RuntimeError::Command)?;
        debug!(device = %self.ctx.id(), key = %command.key, action = %command.action, "Command handled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tb2m_core::{Bindings, CommandAction, DeviceKind};

    #[test]
    fn test_subscriptions_include_birth_topic() {
        let mut bindings = Bindings::default();
        bindings
            .bind_command(
                "tb2m/VIN/charging/set".to_string(),
                "ON".to_string(),
                CommandAction::parse("charge_start").unwrap(),
            )
            .unwrap();
        let record = DiscoveryRecord {
            discovery_topic: "homeassistant/device/tb2m_VIN/config".to_string(),
            kind: DeviceKind::PerVehicle,
            payload: serde_json::json!({}),
            vin: "VIN".to_string(),
            client_id: "tb2m_VIN".to_string(),
            will_topic: "tb2m/VIN/status".to_string(),
            bindings,
        };

        assert_eq!(
            subscriptions(&record, &RuntimeSettings::default()),
            vec!["tb2m/VIN/charging/set", "homeassistant/status"]
        );
    }
}
