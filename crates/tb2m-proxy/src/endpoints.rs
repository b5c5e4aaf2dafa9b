//! Proxy REST endpoints

/// BLE connection state of a vehicle (RSSI, address when in range)
pub fn connection_status(vin: &str) -> String {
    format!("/api/proxy/1/vehicles/{}/connection_status", vin)
}

/// Body controller state (lock and sleep status), available without waking the car
pub fn body_controller_state(vin: &str) -> String {
    format!("/api/proxy/1/vehicles/{}/body_controller_state", vin)
}

/// Charge and climate state, only answered by an awake vehicle
pub fn vehicle_data(vin: &str) -> String {
    format!(
        "/api/1/vehicles/{}/vehicle_data?endpoints=charge_state;climate_state",
        vin
    )
}

pub fn wake_up(vin: &str) -> String {
    format!("/api/1/vehicles/{}/wake_up?wait=true", vin)
}

pub fn command(vin: &str, action: &str) -> String {
    format!("/api/1/vehicles/{}/command/{}?wait=true", vin, action)
}
