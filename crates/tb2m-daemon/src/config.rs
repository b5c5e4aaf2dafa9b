//! Configuration loading and validation

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tb2m_core::DiscoverySettings;
use tb2m_runtime::{qos_from_level, BrokerSettings, RuntimeSettings};
use tracing::Level;

/// Token in the reported configuration url replaced by the proxy host
pub const PROXY_HOST_TOKEN: &str = "{proxy-host}";

const VIN_LEN: usize = 17;
const MIN_CHARGING_AMPS: u8 = 5;
const MAX_CHARGING_AMPS: u8 = 48;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Vehicles to bridge
    #[serde(default)]
    pub vins: Vec<String>,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vins: Vec::new(),
            log_level: default_log_level(),
            proxy: ProxyConfig::default(),
            polling: PollingConfig::default(),
            mqtt: MqttConfig::default(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Base url of the BLE proxy
    #[serde(default = "default_proxy_host")]
    pub host: String,
    /// Request timeout in seconds
    #[serde(default = "default_proxy_timeout")]
    pub timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: default_proxy_host(),
            timeout_secs: default_proxy_timeout(),
        }
    }
}

fn default_proxy_host() -> String {
    "http://localhost:8080".to_string()
}

fn default_proxy_timeout() -> u64 {
    tb2m_proxy::DEFAULT_TIMEOUT_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// Interval while a vehicle is charging
    #[serde(default = "default_charging_interval")]
    pub charging_interval_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            charging_interval_secs: default_charging_interval(),
        }
    }
}

fn default_interval() -> u64 {
    tb2m_runtime::settings::DEFAULT_POLL_INTERVAL_SECS
}

fn default_charging_interval() -> u64 {
    tb2m_runtime::settings::DEFAULT_POLL_INTERVAL_CHARGING_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub qos: u8,
    /// Prefix of every state, command and status topic
    #[serde(default = "default_mqtt_prefix")]
    pub prefix: String,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Inbound messages queued per device before the MQTT client waits
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Enable rumqttc logs
    #[serde(default)]
    pub debug: bool,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            qos: 0,
            prefix: default_mqtt_prefix(),
            keep_alive_secs: default_keep_alive(),
            queue_capacity: default_queue_capacity(),
            debug: false,
        }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_prefix() -> String {
    "tb2m".to_string()
}

fn default_keep_alive() -> u64 {
    30
}

fn default_queue_capacity() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Home Assistant discovery prefix
    #[serde(default = "default_discovery_prefix")]
    pub prefix: String,
    /// Publish stripped discovery documents before the real ones
    #[serde(default)]
    pub reset: bool,
    /// Sensors document (TOML or JSON); the embedded one when unset
    #[serde(default)]
    pub sensors: Option<PathBuf>,
    #[serde(default = "default_max_charging_amps")]
    pub max_charging_amps: u8,
    /// Software version reported in the discovery documents
    #[serde(default = "default_reported_version")]
    pub reported_version: String,
    /// Configuration url reported in the discovery documents
    #[serde(default = "default_reported_config_url")]
    pub reported_config_url: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            prefix: default_discovery_prefix(),
            reset: false,
            sensors: None,
            max_charging_amps: default_max_charging_amps(),
            reported_version: default_reported_version(),
            reported_config_url: default_reported_config_url(),
        }
    }
}

fn default_discovery_prefix() -> String {
    "homeassistant".to_string()
}

fn default_max_charging_amps() -> u8 {
    16
}

fn default_reported_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_reported_config_url() -> String {
    format!("{}/dashboard", PROXY_HOST_TOKEN)
}

impl Config {
    /// Check every setting once, before anything starts
    pub fn validate(&self) -> Result<()> {
        if self.vins.is_empty() {
            bail!("at least one VIN is required");
        }
        let mut seen = HashSet::new();
        for vin in &self.vins {
            if vin.chars().count() != VIN_LEN {
                bail!("invalid VIN `{}`: expected {} characters", vin, VIN_LEN);
            }
            if !seen.insert(vin) {
                bail!("duplicate VIN `{}`", vin);
            }
        }

        validate_proxy_host(&self.proxy.host)?;

        if self.polling.interval_secs < 1 {
            bail!("poll interval must be at least 1 second");
        }
        if self.polling.charging_interval_secs < 1 {
            bail!("charging poll interval must be at least 1 second");
        }
        if !(MIN_CHARGING_AMPS..=MAX_CHARGING_AMPS).contains(&self.discovery.max_charging_amps) {
            bail!(
                "max charging amps must be between {} and {}, got {}",
                MIN_CHARGING_AMPS,
                MAX_CHARGING_AMPS,
                self.discovery.max_charging_amps
            );
        }
        if qos_from_level(self.mqtt.qos).is_none() {
            bail!("MQTT QoS must be 0, 1 or 2, got {}", self.mqtt.qos);
        }
        self.level()?;
        Ok(())
    }

    pub fn level(&self) -> Result<Level> {
        self.log_level
            .parse()
            .map_err(|_| anyhow!("invalid log level `{}`", self.log_level))
    }

    fn proxy_base(&self) -> &str {
        self.proxy.host.trim_end_matches('/')
    }

    pub fn configuration_url(&self) -> String {
        self.discovery
            .reported_config_url
            .replace(PROXY_HOST_TOKEN, self.proxy_base())
    }

    pub fn proxy_timeout(&self) -> Duration {
        Duration::from_secs(self.proxy.timeout_secs)
    }

    pub fn discovery_settings(&self) -> DiscoverySettings {
        DiscoverySettings {
            discovery_prefix: self.discovery.prefix.clone(),
            mqtt_prefix: self.mqtt.prefix.clone(),
            vins: self.vins.clone(),
            version: self.discovery.reported_version.clone(),
            configuration_url: self.configuration_url(),
            max_charging_amps: self.discovery.max_charging_amps,
        }
    }

    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            poll_interval: Duration::from_secs(self.polling.interval_secs),
            poll_interval_charging: Duration::from_secs(self.polling.charging_interval_secs),
            mqtt_prefix: self.mqtt.prefix.clone(),
            discovery_prefix: self.discovery.prefix.clone(),
            reset_discovery: self.discovery.reset,
            inbound_capacity: self.mqtt.queue_capacity.max(1),
            ..RuntimeSettings::default()
        }
    }

    pub fn broker_settings(&self) -> Result<BrokerSettings> {
        let qos = qos_from_level(self.mqtt.qos)
            .ok_or_else(|| anyhow!("MQTT QoS must be 0, 1 or 2, got {}", self.mqtt.qos))?;
        Ok(BrokerSettings {
            host: self.mqtt.host.clone(),
            port: self.mqtt.port,
            username: self.mqtt.username.clone(),
            password: self.mqtt.password.clone(),
            qos,
            keep_alive: Duration::from_secs(self.mqtt.keep_alive_secs),
        })
    }
}

fn validate_proxy_host(host: &str) -> Result<()> {
    let url = reqwest::Url::parse(host).with_context(|| format!("invalid proxy host `{}`", host))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("proxy host `{}` must use http or https", host);
    }
    if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
        bail!("proxy host `{}` must not have a path", host);
    }
    Ok(())
}

/// Load configuration from file, defaults when it does not exist
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VIN: &str = "5YJ3E1EA7KF000001";

    fn valid() -> Config {
        Config {
            vins: vec![VIN.to_string()],
            ..Config::default()
        }
    }

    fn rejected(config: Config) -> String {
        config.validate().unwrap_err().to_string()
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("tb2m.toml")).unwrap();
        assert!(config.vins.is_empty());
        assert_eq!(config.proxy.host, "http://localhost:8080");
        assert_eq!(config.polling.interval_secs, 90);
        assert_eq!(config.polling.charging_interval_secs, 20);
        assert_eq!(config.mqtt.prefix, "tb2m");
        assert_eq!(config.discovery.prefix, "homeassistant");
        assert_eq!(config.discovery.max_charging_amps, 16);
    }

    #[test]
    fn test_load_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
vins = ["5YJ3E1EA7KF000001", "5YJ3E1EA7KF000002"]
log_level = "debug"

[proxy]
host = "http://proxy.lan:8080"

[polling]
interval_secs = 60

[mqtt]
host = "broker.lan"
qos = 1
username = "bridge"

[discovery]
reset = true
max_charging_amps = 32
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.vins.len(), 2);
        assert_eq!(config.level().unwrap(), Level::DEBUG);
        assert_eq!(config.polling.interval_secs, 60);
        assert_eq!(config.polling.charging_interval_secs, 20);
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.username.as_deref(), Some("bridge"));
        assert!(config.discovery.reset);

        let broker = config.broker_settings().unwrap();
        assert_eq!(broker.host, "broker.lan");
        assert_eq!(broker.qos, tb2m_runtime::qos_from_level(1).unwrap());
    }

    #[test]
    fn test_malformed_file_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[polling]\ninterval_secs = \"soon\"\n").unwrap();
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_vin_validation() {
        assert!(rejected(Config::default()).contains("at least one VIN"));

        let mut config = valid();
        config.vins.push("SHORT".to_string());
        assert!(rejected(config).contains("expected 17 characters"));

        let mut config = valid();
        config.vins.push(VIN.to_string());
        assert!(rejected(config).contains("duplicate VIN"));
    }

    #[test]
    fn test_proxy_host_validation() {
        let mut config = valid();
        config.proxy.host = "https://proxy.lan/".to_string();
        config.validate().unwrap();

        config.proxy.host = "http://proxy.lan/api".to_string();
        assert!(rejected(config.clone()).contains("must not have a path"));

        config.proxy.host = "ftp://proxy.lan".to_string();
        assert!(rejected(config.clone()).contains("http or https"));

        config.proxy.host = "proxy.lan:8080".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_range_validation() {
        let mut config = valid();
        config.polling.interval_secs = 0;
        assert!(rejected(config).contains("poll interval"));

        let mut config = valid();
        config.discovery.max_charging_amps = 4;
        assert!(rejected(config).contains("between 5 and 48"));

        let mut config = valid();
        config.discovery.max_charging_amps = 48;
        config.validate().unwrap();

        let mut config = valid();
        config.mqtt.qos = 3;
        assert!(rejected(config).contains("QoS"));

        let mut config = valid();
        config.log_level = "loud".to_string();
        assert!(rejected(config).contains("invalid log level"));
    }

    #[test]
    fn test_configuration_url_expands_proxy_host() {
        let mut config = valid();
        config.proxy.host = "http://proxy.lan:8080/".to_string();
        assert_eq!(config.configuration_url(), "http://proxy.lan:8080/dashboard");

        let settings = config.discovery_settings();
        assert_eq!(settings.configuration_url, "http://proxy.lan:8080/dashboard");
        assert_eq!(settings.vins, vec![VIN]);
        assert_eq!(settings.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_runtime_settings() {
        let mut config = valid();
        config.polling.interval_secs = 120;
        config.mqtt.prefix = "tesla".to_string();
        config.discovery.reset = true;

        let settings = config.runtime_settings();
        assert_eq!(settings.poll_interval, Duration::from_secs(120));
        assert_eq!(settings.poll_interval_charging, Duration::from_secs(20));
        assert_eq!(settings.mqtt_prefix, "tesla");
        assert!(settings.reset_discovery);
        assert_eq!(settings.fast_retry, Duration::from_secs(1));
        assert_eq!(settings.error_topic(VIN), "tesla/5YJ3E1EA7KF000001/last_error/state");
    }
}
