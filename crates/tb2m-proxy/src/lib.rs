//! tb2m Proxy - Client for the Tesla BLE proxy REST API
//!
//! This crate wraps reqwest to talk to a TeslaBleHttpProxy instance:
//! - Endpoint paths for state queries and vehicle commands
//! - Response envelope decoding with unreachable-vehicle detection
//! - The [`ProxyApi`] trait used by device runtimes

pub mod client;
pub mod endpoints;

pub use client::{decode_envelope, ProxyApi, ProxyClient, ProxyError, ProxyResponse, DEFAULT_TIMEOUT_SECS};
