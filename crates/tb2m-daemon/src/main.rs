//! tb2m Daemon - Main entry point
//!
//! Loads the configuration and sensors document, assembles the discovery
//! documents and runs one device per record until shutdown.

mod cli;
mod config;
mod coordinator;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Args;
use config::Config;
use std::sync::Arc;
use tb2m_core::{assemble, DeviceTemplates};
use tb2m_proxy::ProxyClient;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    if args.version {
        println!("tb2m {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config_path = args.config.clone();
    let mut config = config::load_config(&config_path)?;
    args.apply(&mut config);

    init_logging(&config)?;
    info!("tb2m v{}", env!("CARGO_PKG_VERSION"));

    config.validate()?;
    info!(
        path = %config_path.display(),
        vins = ?config.vins,
        proxy = %config.proxy.host,
        broker = %format!("{}:{}", config.mqtt.host, config.mqtt.port),
        "Configuration loaded"
    );

    let templates = DeviceTemplates::load(config.discovery.sensors.as_deref())
        .context("failed to load sensors document")?;
    let records = assemble(&templates, &config.discovery_settings())
        .context("failed to assemble discovery documents")?;
    info!(devices = records.len(), "Discovery documents assembled");

    let proxy = ProxyClient::new(&config.proxy.host, config.proxy_timeout())
        .context("failed to create proxy client")?;

    coordinator::Coordinator::new(
        records,
        config.runtime_settings(),
        config.broker_settings()?,
        Arc::new(proxy),
    )
    .run()
    .await
}

/// Install the global subscriber; MQTT client logs only with `mqtt.debug`
fn init_logging(config: &Config) -> Result<()> {
    let level = config.level()?;
    let directives = if config.mqtt.debug { "" } else { "rumqttc=off" };
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .parse(directives)?;

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
