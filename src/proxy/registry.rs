// src/proxy/registry.rs
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

/// A fronted service: its logical name, the gateway route prefix bound to it
/// and the base URL requests are forwarded to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDescriptor {
    pub name: String,
    pub route_prefix: String,
    pub base_url: Url,
}

impl BackendDescriptor {
    pub fn new(name: impl Into<String>, route_prefix: impl Into<String>, base_url: Url) -> Self {
        Self {
            name: name.into(),
            route_prefix: route_prefix.into(),
            base_url,
        }
    }

    /// Identifier used for cache keys and telemetry, e.g. `user_service`.
    pub fn service_id(&self) -> String {
        format!("{}_service", self.name)
    }

    pub fn display_name(&self) -> String {
        display_name(&self.name)
    }
}

/// `order` -> `Order`
pub fn display_name(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate backend name: {0}")]
    DuplicateName(String),

    #[error("duplicate route prefix: {0}")]
    DuplicatePrefix(String),
}

/// Static name -> backend mapping, fixed at startup.
#[derive(Debug, Clone)]
pub struct BackendRegistry {
    backends: Arc<Vec<BackendDescriptor>>,
    by_name: Arc<HashMap<String, usize>>,
}

impl BackendRegistry {
    pub fn new(descriptors: Vec<BackendDescriptor>) -> Result<Self, RegistryError> {
        let mut by_name = HashMap::with_capacity(descriptors.len());
        let mut prefixes = HashMap::with_capacity(descriptors.len());

        for (idx, backend) in descriptors.iter().enumerate() {
            if by_name.insert(backend.name.clone(), idx).is_some() {
                return Err(RegistryError::DuplicateName(backend.name.clone()));
            }
            if prefixes.insert(backend.route_prefix.clone(), idx).is_some() {
                return Err(RegistryError::DuplicatePrefix(backend.route_prefix.clone()));
            }
        }

        tracing::info!("Registered {} backends", descriptors.len());

        Ok(Self {
            backends: Arc::new(descriptors),
            by_name: Arc::new(by_name),
        })
    }

    pub fn resolve(&self, name: &str) -> Option<&Url> {
        self.get(name).map(|backend| &backend.base_url)
    }

    pub fn get(&self, name: &str) -> Option<&BackendDescriptor> {
        self.by_name.get(name).map(|&idx| &self.backends[idx])
    }

    /// Backends in registration order.
    pub fn all(&self) -> &[BackendDescriptor] {
        &self.backends
    }
}
