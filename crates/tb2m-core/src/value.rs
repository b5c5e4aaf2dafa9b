//! Configuration tree model
//!
//! The discovery configuration is an arbitrary nested document. It is
//! converted once into [`ConfigValue`] so the compiler only ever deals with
//! four shapes: objects, lists, strings and other scalars.

use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ValueError {
    #[error("Non-finite number at `{0}`")]
    NonFiniteNumber(String),
}

/// Scalar that is not a string
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(Number),
}

impl Scalar {
    pub fn to_json(&self) -> Value {
        match self {
            Scalar::Null => Value::Null,
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Number(n) => Value::Number(n.clone()),
        }
    }
}

/// A node of the configuration tree
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Object(BTreeMap<String, ConfigValue>),
    List(Vec<ConfigValue>),
    String(String),
    Scalar(Scalar),
}

impl ConfigValue {
    /// Convert a JSON document. JSON numbers are always finite, so this
    /// cannot fail.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(map) => ConfigValue::Object(
                map.into_iter()
                    .map(|(k, v)| (k, ConfigValue::from_json(v)))
                    .collect(),
            ),
            Value::Array(items) => {
                ConfigValue::List(items.into_iter().map(ConfigValue::from_json).collect())
            }
            Value::String(s) => ConfigValue::String(s),
            Value::Null => ConfigValue::Scalar(Scalar::Null),
            Value::Bool(b) => ConfigValue::Scalar(Scalar::Bool(b)),
            Value::Number(n) => ConfigValue::Scalar(Scalar::Number(n)),
        }
    }

    /// Convert a TOML document. Datetimes become strings.
    pub fn from_toml(value: toml::Value) -> Result<Self, ValueError> {
        from_toml_at(value, "")
    }

    /// Render as JSON (objects come out with sorted keys)
    pub fn to_json(&self) -> Value {
        match self {
            ConfigValue::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect::<Map<String, Value>>(),
            ),
            ConfigValue::List(items) => Value::Array(items.iter().map(|v| v.to_json()).collect()),
            ConfigValue::String(s) => Value::String(s.clone()),
            ConfigValue::Scalar(s) => s.to_json(),
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, ConfigValue>> {
        match self {
            ConfigValue::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Short name of the variant, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            ConfigValue::Object(_) => "object",
            ConfigValue::List(_) => "list",
            ConfigValue::String(_) => "string",
            ConfigValue::Scalar(_) => "scalar",
        }
    }
}

fn from_toml_at(value: toml::Value, path: &str) -> Result<ConfigValue, ValueError> {
    Ok(match value {
        toml::Value::Table(table) => {
            let mut map = BTreeMap::new();
            for (key, v) in table {
                let child = join_path(path, &key);
                map.insert(key, from_toml_at(v, &child)?);
            }
            ConfigValue::Object(map)
        }
        toml::Value::Array(items) => {
            let mut list = Vec::with_capacity(items.len());
            for (i, v) in items.into_iter().enumerate() {
                list.push(from_toml_at(v, &join_path(path, &i.to_string()))?);
            }
            ConfigValue::List(list)
        }
        toml::Value::String(s) => ConfigValue::String(s),
        toml::Value::Integer(i) => ConfigValue::Scalar(Scalar::Number(i.into())),
        toml::Value::Float(f) => match Number::from_f64(f) {
            Some(n) => ConfigValue::Scalar(Scalar::Number(n)),
            None => return Err(ValueError::NonFiniteNumber(path.to_string())),
        },
        toml::Value::Boolean(b) => ConfigValue::Scalar(Scalar::Bool(b)),
        toml::Value::Datetime(dt) => ConfigValue::String(dt.to_string()),
    })
}

fn join_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}
