//! State fetching
//!
//! The bridge device reports synthetic state. A vehicle is queried step by
//! step, each step only when the previous one says it can succeed:
//! connection status, then body controller state once the car is in range,
//! then vehicle data once it is awake.

use crate::error::RuntimeError;
use serde_json::{json, Map, Value};
use tb2m_core::DeviceKind;
use tb2m_proxy::{endpoints, ProxyApi, ProxyError};
use tokio::time::Instant;
use tracing::debug;

pub const STATUS_ONLINE: &str = "online";
pub const STATUS_OFFLINE: &str = "offline";

const SLEEP_STATUS_AWAKE: &str = "VEHICLE_SLEEP_STATUS_AWAKE";
const CHARGING: &str = "Charging";

/// One fetched state tree
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub tree: Value,
    pub online: bool,
    /// The vehicle reported an active charging session
    pub charging: bool,
}

impl Reading {
    pub fn offline() -> Self {
        Self {
            tree: json!({ "status": STATUS_OFFLINE }),
            online: false,
            charging: false,
        }
    }
}

/// Synthetic state of the bridge device
pub fn handler_reading(started: Instant) -> Reading {
    Reading {
        tree: json!({
            "status": STATUS_ONLINE,
            "uptime": started.elapsed().as_secs(),
        }),
        online: true,
        charging: false,
    }
}

pub async fn fetch(
    kind: DeviceKind,
    vin: &str,
    proxy: &dyn ProxyApi,
    started: Instant,
) -> Result<Reading, RuntimeError> {
    match kind {
        DeviceKind::Handler => Ok(handler_reading(started)),
        DeviceKind::PerVehicle => fetch_vehicle(proxy, vin).await,
    }
}

/// Outcome of a failed step: out of range is an offline reading
fn failed_step(vin: &str, step: &'static str, err: ProxyError) -> Result<Reading, RuntimeError> {
    if err.is_unreachable() {
        debug!(vin = %vin, step = step, "Vehicle not in range");
        Ok(Reading::offline())
    } else {
        Err(RuntimeError::Fetch { step, source: err })
    }
}

pub async fn fetch_vehicle(proxy: &dyn ProxyApi, vin: &str) -> Result<Reading, RuntimeError> {
    let mut tree = Map::new();
    let mut online = false;
    let mut charging = false;

    let connection = match proxy.get(&endpoints::connection_status(vin)).await {
        Ok(response) => response.unwrap_or_default(),
        Err(e) => return failed_step(vin, "connection status", e),
    };
    let in_range = connection.get("address").is_some_and(|a| !a.is_null());
    tree.insert("connection_status".to_string(), Value::Object(connection));

    if in_range {
        online = true;
        let body = match proxy.get(&endpoints::body_controller_state(vin)).await {
            Ok(response) => response.unwrap_or_default(),
            Err(e) => return failed_step(vin, "body controller state", e),
        };
        let awake = body.get("vehicle_sleep_status").and_then(Value::as_str) == Some(SLEEP_STATUS_AWAKE);
        tree.insert("body_controller_state".to_string(), Value::Object(body));

        if awake {
            let data = match proxy.get(&endpoints::vehicle_data(vin)).await {
                Ok(response) => response.unwrap_or_default(),
                Err(e) => return failed_step(vin, "vehicle state", e),
            };
            charging = data
                .get("charge_state")
                .and_then(|cs| cs.get("charging_state"))
                .and_then(Value::as_str)
                == Some(CHARGING);
            if charging {
                debug!(vin = %vin, "Using charging poll interval");
            }
            tree.insert("vehicle_data".to_string(), Value::Object(data));
        } else {
            debug!(vin = %vin, "Vehicle not awake");
        }
    } else {
        debug!(vin = %vin, "Vehicle not in range");
    }

    let status = if online { STATUS_ONLINE } else { STATUS_OFFLINE };
    tree.insert("status".to_string(), Value::String(status.to_string()));

    Ok(Reading {
        tree: Value::Object(tree),
        online,
        charging,
    })
}
