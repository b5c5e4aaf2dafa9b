//! Runtime settings shared by every device

use std::time::Duration;

/// Default poll interval in seconds
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 90;

/// Default poll interval while charging in seconds
pub const DEFAULT_POLL_INTERVAL_CHARGING_SECS: u64 = 20;

/// Poll settings and topic layout for device runtimes
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSettings {
    /// Interval between polls
    pub poll_interval: Duration,
    /// Interval between polls while the vehicle is charging
    pub poll_interval_charging: Duration,
    /// Interval after a failed fetch or while going offline
    pub fast_retry: Duration,
    /// Added to the poll interval to bound a single poll cycle
    pub watchdog_grace: Duration,
    pub mqtt_prefix: String,
    pub discovery_prefix: String,
    /// Publish a stripped discovery document before the real one
    pub reset_discovery: bool,
    /// Capacity of the inbound message queue of each device
    pub inbound_capacity: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            poll_interval_charging: Duration::from_secs(DEFAULT_POLL_INTERVAL_CHARGING_SECS),
            fast_retry: Duration::from_secs(1),
            watchdog_grace: Duration::from_secs(20),
            mqtt_prefix: "tb2m".to_string(),
            discovery_prefix: "homeassistant".to_string(),
            reset_discovery: false,
            inbound_capacity: 10,
        }
    }
}

impl RuntimeSettings {
    /// Longest a poll cycle may run before it is abandoned
    pub fn watchdog(&self) -> Duration {
        self.watchdog_grace + self.poll_interval
    }

    /// Topic on which Home Assistant announces itself
    pub fn birth_topic(&self) -> String {
        format!("{}/status", self.discovery_prefix)
    }

    pub fn error_topic(&self, vin: &str) -> String {
        format!("{}/{}/last_error/state", self.mqtt_prefix, vin)
    }
}
