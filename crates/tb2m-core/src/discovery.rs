//! Discovery assembly
//!
//! Builds one [`DiscoveryRecord`] for the bridge itself followed by one per
//! configured vehicle.

use crate::compiler::{compile, Bindings, CompileError, Substitutions};
use crate::document::DeviceTemplates;
use crate::value::ConfigValue;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Identifier of the bridge device
pub const HANDLER_ID: &str = "tb2m";

#[derive(Error, Debug, PartialEq)]
pub enum DiscoveryError {
    #[error("Failed to compile {device}: {source}")]
    Compile {
        device: String,
        #[source]
        source: CompileError,
    },
    #[error("Unknown vehicle model (or invalid VIN): {0}")]
    UnknownVehicleModel(String),
    #[error("Components not found in {0}")]
    MissingComponents(String),
}

/// Values substituted into the sensors document
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoverySettings {
    pub discovery_prefix: String,
    pub mqtt_prefix: String,
    pub vins: Vec<String>,
    pub version: String,
    pub configuration_url: String,
    pub max_charging_amps: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Handler,
    PerVehicle,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Handler => write!(f, "handler"),
            DeviceKind::PerVehicle => write!(f, "per_vehicle"),
        }
    }
}

/// Everything a device runtime needs to know about its device
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryRecord {
    pub discovery_topic: String,
    pub kind: DeviceKind,
    pub payload: Value,
    /// `tb2m` for the bridge, the VIN for a vehicle
    pub vin: String,
    pub client_id: String,
    pub will_topic: String,
    pub bindings: Bindings,
}

impl DiscoveryRecord {
    /// Discovery payload with every component stripped to its platform
    pub fn reset_payload(&self) -> Result<Value, DiscoveryError> {
        reset_configuration(&self.payload)
            .ok_or_else(|| DiscoveryError::MissingComponents(self.discovery_topic.clone()))
    }
}

/// Human-readable model from the 4th character of a VIN
pub fn vehicle_model(vin: &str) -> Result<&'static str, DiscoveryError> {
    match vin.chars().nth(3) {
        Some('S') => Ok("Model S"),
        Some('3') => Ok("Model 3"),
        Some('X') => Ok("Model X"),
        Some('Y') => Ok("Model Y"),
        Some('C') => Ok("Cybertruck"),
        Some('R') => Ok("Roadster"),
        Some('T') => Ok("Semi"),
        _ => Err(DiscoveryError::UnknownVehicleModel(vin.to_string())),
    }
}

/// Copy of `payload` in which every component with a `platform` keeps only
/// that field. `None` when there is no `components` object.
pub fn reset_configuration(payload: &Value) -> Option<Value> {
    let mut reset = payload.clone();
    let components = reset.get_mut("components")?.as_object_mut()?;
    for component in components.values_mut() {
        if let Some(platform) = component.get("platform").filter(|p| !p.is_null()) {
            let mut stripped = Map::new();
            stripped.insert("platform".to_string(), platform.clone());
            *component = Value::Object(stripped);
        }
    }
    Some(reset)
}

fn discovery_topic(settings: &DiscoverySettings, device_id: &str) -> String {
    format!("{}/device/{}/config", settings.discovery_prefix, device_id)
}

fn handler_substitutions(settings: &DiscoverySettings) -> Substitutions {
    Substitutions::new()
        .with("mqtt_prefix", settings.mqtt_prefix.as_str())
        .with("tb2m_version", settings.version.as_str())
        .with("tb2m_configuration_url", settings.configuration_url.as_str())
}

fn vin_substitutions(settings: &DiscoverySettings, vin: &str) -> Result<Substitutions, DiscoveryError> {
    Ok(handler_substitutions(settings)
        .with("vin", vin)
        .with("vehicle_model", vehicle_model(vin)?)
        .with("max_charging_amps", settings.max_charging_amps.to_string()))
}

fn compile_device(
    device: &str,
    tree: &ConfigValue,
    subs: &Substitutions,
) -> Result<(Value, Bindings), DiscoveryError> {
    let compiled = compile(tree, subs).map_err(|source| DiscoveryError::Compile {
        device: device.to_string(),
        source,
    })?;
    Ok((compiled.value, compiled.bindings))
}

fn wrap(device: &str) -> impl Fn(CompileError) -> DiscoveryError + '_ {
    move |source| DiscoveryError::Compile {
        device: device.to_string(),
        source,
    }
}

/// Compile the sensors document into discovery records, bridge first
pub fn assemble(
    templates: &DeviceTemplates,
    settings: &DiscoverySettings,
) -> Result<Vec<DiscoveryRecord>, DiscoveryError> {
    let mut vin_components = Map::new();
    let mut vin_bindings = Vec::with_capacity(settings.vins.len());
    for vin in &settings.vins {
        let subs = vin_substitutions(settings, vin)?;
        let (value, bindings) =
            compile_device("handler_vin_components", &templates.handler_vin_components, &subs)?;
        if let Value::Object(components) = value {
            for (id, component) in components {
                if vin_components.insert(id.clone(), component).is_some() {
                    debug!(component = %id, vin = %vin, "Component overwritten by later VIN");
                }
            }
        }
        vin_bindings.push(bindings);
    }

    let (mut handler_payload, handler_bindings) =
        compile_device("handler", &templates.handler, &handler_substitutions(settings))?;
    let components = handler_payload
        .get_mut("components")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| DiscoveryError::MissingComponents("handler".to_string()))?;
    components.extend(vin_components);
    handler_bindings.check_conflicts().map_err(wrap("handler"))?;

    let mut records = Vec::with_capacity(settings.vins.len() + 1);
    records.push(DiscoveryRecord {
        discovery_topic: discovery_topic(settings, &settings.mqtt_prefix),
        kind: DeviceKind::Handler,
        payload: handler_payload,
        vin: HANDLER_ID.to_string(),
        client_id: settings.mqtt_prefix.clone(),
        will_topic: format!("{}/status", settings.mqtt_prefix),
        bindings: handler_bindings,
    });

    for (vin, extra) in settings.vins.iter().zip(vin_bindings) {
        let subs = vin_substitutions(settings, vin)?;
        let (payload, mut bindings) = compile_device(vin, &templates.per_vehicle, &subs)?;
        bindings.merge(extra).map_err(wrap(vin))?;
        bindings.check_conflicts().map_err(wrap(vin))?;

        let client_id = format!("{}_{}", settings.mqtt_prefix, vin);
        records.push(DiscoveryRecord {
            discovery_topic: discovery_topic(settings, &client_id),
            kind: DeviceKind::PerVehicle,
            payload,
            vin: vin.clone(),
            client_id,
            will_topic: format!("{}/{}/status", settings.mqtt_prefix, vin),
            bindings,
        });
    }

    Ok(records)
}
