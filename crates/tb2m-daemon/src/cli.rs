//! Command line flags, layered over the configuration file

use crate::config::Config;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tb2m")]
#[command(about = "Tesla BLE proxy to MQTT bridge with Home Assistant discovery")]
#[command(version, disable_version_flag = true)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "tb2m.toml")]
    pub config: PathBuf,

    /// VIN of a vehicle to bridge (repeatable)
    #[arg(short = 'v', long = "vin")]
    pub vins: Vec<String>,

    /// Base url of the BLE proxy
    #[arg(short = 'p', long)]
    pub proxy_host: Option<String>,

    /// Poll interval in seconds
    #[arg(short = 'i', long)]
    pub poll_interval: Option<u64>,

    /// Poll interval in seconds while charging
    #[arg(short = 'I', long)]
    pub poll_interval_charging: Option<u64>,

    /// Upper bound of the charging current control
    #[arg(short = 'A', long)]
    pub max_charging_amps: Option<u8>,

    #[arg(short = 'H', long)]
    pub mqtt_host: Option<String>,

    #[arg(short = 'P', long)]
    pub mqtt_port: Option<u16>,

    #[arg(short = 'u', long)]
    pub mqtt_user: Option<String>,

    #[arg(short = 'w', long)]
    pub mqtt_pass: Option<String>,

    /// QoS of every publish and subscription (0, 1 or 2)
    #[arg(short = 'q', long)]
    pub mqtt_qos: Option<u8>,

    /// Home Assistant discovery prefix
    #[arg(short = 'd', long)]
    pub discovery_prefix: Option<String>,

    /// Prefix of the bridge topics
    #[arg(short = 'm', long)]
    pub mqtt_prefix: Option<String>,

    /// Publish stripped discovery documents before the real ones
    #[arg(short = 'r', long)]
    pub reset_discovery: bool,

    /// Sensors document (TOML or JSON)
    #[arg(short = 'y', long)]
    pub sensors: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long)]
    pub log_level: Option<String>,

    /// Enable MQTT client logs
    #[arg(short = 'D', long)]
    pub mqtt_debug: bool,

    /// Software version reported to Home Assistant
    #[arg(short = 'V', long)]
    pub reported_version: Option<String>,

    /// Configuration url reported to Home Assistant; `{proxy-host}` is expanded
    #[arg(short = 'C', long)]
    pub reported_config_url: Option<String>,

    /// Print version
    #[arg(long)]
    pub version: bool,
}

impl Args {
    /// Override the file configuration with the flags that were given
    pub fn apply(self, config: &mut Config) {
        if !self.vins.is_empty() {
            config.vins = self.vins;
        }
        if let Some(host) = self.proxy_host {
            config.proxy.host = host;
        }
        if let Some(secs) = self.poll_interval {
            config.polling.interval_secs = secs;
        }
        if let Some(secs) = self.poll_interval_charging {
            config.polling.charging_interval_secs = secs;
        }
        if let Some(amps) = self.max_charging_amps {
            config.discovery.max_charging_amps = amps;
        }
        if let Some(host) = self.mqtt_host {
            config.mqtt.host = host;
        }
        if let Some(port) = self.mqtt_port {
            config.mqtt.port = port;
        }
        if let Some(user) = self.mqtt_user {
            config.mqtt.username = Some(user);
        }
        if let Some(pass) = self.mqtt_pass {
            config.mqtt.password = Some(pass);
        }
        if let Some(qos) = self.mqtt_qos {
            config.mqtt.qos = qos;
        }
        if let Some(prefix) = self.discovery_prefix {
            config.discovery.prefix = prefix;
        }
        if let Some(prefix) = self.mqtt_prefix {
            config.mqtt.prefix = prefix;
        }
        if self.reset_discovery {
            config.discovery.reset = true;
        }
        if let Some(path) = self.sensors {
            config.discovery.sensors = Some(path);
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if self.mqtt_debug {
            config.mqtt.debug = true;
        }
        if let Some(version) = self.reported_version {
            config.discovery.reported_version = version;
        }
        if let Some(url) = self.reported_config_url {
            config.discovery.reported_config_url = url;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_flags_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_flags_override_file() {
        let mut config = Config {
            vins: vec!["5YJ3E1EA7KF000009".to_string()],
            ..Config::default()
        };
        config.mqtt.host = "broker.lan".to_string();
        config.mqtt.port = 1884;

        let args = Args::try_parse_from([
            "tb2m",
            "-v",
            "5YJ3E1EA7KF000001",
            "--vin",
            "5YJ3E1EA7KF000002",
            "-H",
            "mqtt.lan",
            "-q",
            "1",
            "-r",
            "-D",
            "-V",
            "1.2.3",
            "-A",
            "32",
        ])
        .unwrap();
        assert_eq!(args.config, PathBuf::from("tb2m.toml"));
        args.apply(&mut config);

        assert_eq!(config.vins, vec!["5YJ3E1EA7KF000001", "5YJ3E1EA7KF000002"]);
        assert_eq!(config.mqtt.host, "mqtt.lan");
        assert_eq!(config.mqtt.port, 1884);
        assert_eq!(config.mqtt.qos, 1);
        assert!(config.discovery.reset);
        assert!(config.mqtt.debug);
        assert_eq!(config.discovery.reported_version, "1.2.3");
        assert_eq!(config.discovery.max_charging_amps, 32);
    }

    #[test]
    fn test_no_flags_keep_file() {
        let mut config = Config {
            vins: vec!["5YJ3E1EA7KF000009".to_string()],
            ..Config::default()
        };
        config.discovery.reset = true;

        Args::try_parse_from(["tb2m", "-c", "/etc/tb2m.toml"])
            .unwrap()
            .apply(&mut config);
        assert_eq!(config.vins, vec!["5YJ3E1EA7KF000009"]);
        assert!(config.discovery.reset);
        assert_eq!(config.proxy.host, "http://localhost:8080");
    }
}
