//! Sensors document loading
//!
//! The sensors document describes every device tb2m announces. It is read
//! from a TOML file (or JSON when the file ends in `.json`) and falls back
//! to the copy embedded at build time.

use crate::value::{ConfigValue, ValueError};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Sensors document shipped with the binary
pub const DEFAULT_SENSORS: &str = include_str!("../assets/sensors.toml");

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Failed to read sensors document {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse sensors document: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Failed to parse sensors document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid sensors document: {0}")]
    Value(#[from] ValueError),
    #[error("`{0}` not found or not an object in sensors document")]
    Missing(&'static str),
}

/// Serialization format of a sensors document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Toml,
    Json,
}

impl DocumentFormat {
    /// JSON for `.json` files, TOML for everything else
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => DocumentFormat::Json,
            _ => DocumentFormat::Toml,
        }
    }
}

/// The three device templates of a sensors document
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceTemplates {
    /// The bridge device itself
    pub handler: ConfigValue,
    /// Components added to the bridge device once per vehicle
    pub handler_vin_components: ConfigValue,
    /// One device per vehicle
    pub per_vehicle: ConfigValue,
}

impl DeviceTemplates {
    /// Load from `path`, or the embedded document when `None`
    pub fn load(path: Option<&Path>) -> Result<Self, DocumentError> {
        match path {
            Some(path) => {
                debug!(path = %path.display(), "Using sensors document from file");
                let content = std::fs::read_to_string(path).map_err(|source| DocumentError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::parse(&content, DocumentFormat::from_path(path))
            }
            None => {
                debug!("Using default sensors document");
                Self::parse(DEFAULT_SENSORS, DocumentFormat::Toml)
            }
        }
    }

    pub fn parse(content: &str, format: DocumentFormat) -> Result<Self, DocumentError> {
        let value = match format {
            DocumentFormat::Toml => ConfigValue::from_toml(toml::from_str(content)?)?,
            DocumentFormat::Json => ConfigValue::from_json(serde_json::from_str(content)?),
        };
        Self::from_value(value)
    }

    pub fn from_value(value: ConfigValue) -> Result<Self, DocumentError> {
        let mut root = match value {
            ConfigValue::Object(map) => map,
            _ => return Err(DocumentError::Missing("devices")),
        };
        let mut devices = match root.remove("devices") {
            Some(ConfigValue::Object(map)) => map,
            _ => return Err(DocumentError::Missing("devices")),
        };

        let mut take = |key: &'static str, what: &'static str| match devices.remove(key) {
            Some(v @ ConfigValue::Object(_)) => Ok(v),
            _ => Err(DocumentError::Missing(what)),
        };
        let handler = take("handler", "devices.handler")?;
        let handler_vin_components = take("handler_vin_components", "devices.handler_vin_components")?;
        let per_vehicle = take("per_vehicle", "devices.per_vehicle")?;

        if !matches!(
            handler.as_object().and_then(|h| h.get("components")),
            Some(ConfigValue::Object(_))
        ) {
            return Err(DocumentError::Missing("devices.handler.components"));
        }

        Ok(Self {
            handler,
            handler_vin_components,
            per_vehicle,
        })
    }
}
