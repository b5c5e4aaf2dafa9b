//! tb2m Runtime - Per-device poll, publish and command loops
//!
//! This crate runs a device described by a [`tb2m_core::DiscoveryRecord`]:
//! - MQTT session with last will, subscriptions and a bounded inbound queue
//!   that holds back delivery instead of dropping messages
//! - Poll loop with online hysteresis, adaptive interval and a watchdog
//! - Command dispatch that preempts in-flight polls
//! - Error reporting on the device error topic

pub mod command;
mod control;
pub mod device;
pub mod error;
pub mod fetch;
pub mod inbound;
pub mod mqtt;
mod poll;
pub mod publisher;
pub mod settings;
pub mod state;

pub use control::{Paused, PollHandle};
pub use device::{subscriptions, DeviceRuntime};
pub use error::RuntimeError;
pub use fetch::Reading;
pub use inbound::{inbound_channel, Inbound, InboundReceiver, InboundSender};
pub use mqtt::{qos_from_level, BrokerSettings, MqttPublisher, MqttSession};
pub use publisher::{BrokerError, Publisher};
pub use settings::RuntimeSettings;
pub use state::OnlineHysteresis;
