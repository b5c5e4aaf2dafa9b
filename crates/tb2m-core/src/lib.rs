//! tb2m Core - Sensors document, binding compiler and discovery assembly
//!
//! This crate provides the startup half of the Tesla BLE to MQTT bridge:
//! - Sensors document loading (TOML or JSON) into a typed tree
//! - Directive parsing and compilation into publish/subscribe bindings
//! - Access-path extraction from fetched vehicle state
//! - Home Assistant device discovery records, one per device

pub mod compiler;
pub mod directive;
pub mod discovery;
pub mod document;
pub mod extract;
pub mod value;

pub use compiler::{
    compile, Bindings, CommandAction, CompileError, Compiled, PublishBindings, SubscribeBindings,
    Substitutions,
};
pub use directive::{Directive, TopicKey, WILDCARD_COMMAND};
pub use discovery::{
    assemble, vehicle_model, DeviceKind, DiscoveryError, DiscoveryRecord, DiscoverySettings,
    HANDLER_ID,
};
pub use document::{DeviceTemplates, DocumentError, DocumentFormat};
pub use extract::resolve;
pub use value::{ConfigValue, Scalar};
