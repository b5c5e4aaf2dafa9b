//! Device lifecycle
//!
//! Starts one runtime and MQTT session per discovery record and stops them
//! all on Ctrl+C or SIGTERM. A second signal during shutdown exits without
//! waiting for the devices.

use anyhow::{bail, Result};
use std::sync::Arc;
use tb2m_core::DiscoveryRecord;
use tb2m_proxy::ProxyApi;
use tb2m_runtime::{
    inbound_channel, subscriptions, BrokerSettings, DeviceRuntime, MqttSession, RuntimeSettings,
};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct Coordinator {
    records: Vec<Arc<DiscoveryRecord>>,
    settings: Arc<RuntimeSettings>,
    broker: BrokerSettings,
    proxy: Arc<dyn ProxyApi>,
    started: Instant,
}

impl Coordinator {
    pub fn new(
        records: Vec<DiscoveryRecord>,
        settings: RuntimeSettings,
        broker: BrokerSettings,
        proxy: Arc<dyn ProxyApi>,
    ) -> Self {
        Self {
            records: records.into_iter().map(Arc::new).collect(),
            settings: Arc::new(settings),
            broker,
            proxy,
            started: Instant::now(),
        }
    }

    /// Run every device until a shutdown signal arrives
    pub async fn run(self) -> Result<()> {
        let cancel = CancellationToken::new();
        let mut devices = JoinSet::new();

        for record in self.records {
            devices.spawn(run_device(
                record,
                self.settings.clone(),
                self.broker.clone(),
                self.proxy.clone(),
                self.started,
                cancel.clone(),
            ));
        }
        info!(devices = devices.len(), "Devices started");

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                joined = devices.join_next() => match joined {
                    Some(Ok(())) => warn!("Device stopped before shutdown"),
                    Some(Err(e)) => error!(error = %e, "Device task failed"),
                    None => bail!("no device left running"),
                },
            }
        }

        cancel.cancel();
        info!(devices = devices.len(), "Stopping devices");

        let drain = async {
            while let Some(joined) = devices.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Device task failed");
                }
            }
        };
        tokio::select! {
            _ = drain => info!("All devices stopped"),
            _ = shutdown_signal() => warn!("Second signal received, exiting without waiting for devices"),
        }
        Ok(())
    }
}

async fn run_device(
    record: Arc<DiscoveryRecord>,
    settings: Arc<RuntimeSettings>,
    broker: BrokerSettings,
    proxy: Arc<dyn ProxyApi>,
    started: Instant,
    cancel: CancellationToken,
) {
    let (inbound_tx, inbound_rx) = inbound_channel(settings.inbound_capacity);
    let topics = subscriptions(&record, &settings);
    debug!(device = %record.client_id, topics = ?topics, "Subscribing");

    let session = MqttSession::connect(&broker, &record, topics, inbound_tx);
    let runtime = DeviceRuntime::new(
        record,
        settings,
        proxy,
        Arc::new(session.publisher()),
        started,
    );
    runtime.run(inbound_rx, cancel).await;
    session.close().await;
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
