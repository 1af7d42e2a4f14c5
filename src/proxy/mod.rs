// src/proxy/mod.rs
mod forwarder;
mod registry;
mod request;

pub use forwarder::{BackendResponse, Forwarder, HttpForwarder, ProxyError};
pub use registry::{display_name, BackendDescriptor, BackendRegistry, RegistryError};
pub use request::{is_json, outbound_headers, relayed_response_headers, ProxiedRequest};
