//! Registry of dispensable plugin services.
//!
//! The registry maps a logical service name to the descriptor the host uses
//! to validate what a plugin dispenses under that name. It is assembled once
//! with a [`PluginRegistryBuilder`] and is read-only afterwards; the host
//! threads it into a [`Bootstrapper`](crate::host::Bootstrapper) rather than
//! consulting global state.

use crate::scheme::{SchemeDescriptor, SCHEME_SERVICE};
use scheme_runtime::{CapabilitySet, RuntimeError, RuntimeResult};
use std::collections::HashMap;
use std::sync::Arc;

/// Describes a service kind the host knows how to bind.
pub trait ServiceDescriptor: Send + Sync + 'static {
    /// Methods a dispensed object must advertise to be bound as this service.
    fn required_capabilities(&self) -> CapabilitySet;
}

/// Immutable mapping from service name to descriptor.
pub struct PluginRegistry {
    services: HashMap<String, Arc<dyn ServiceDescriptor>>,
}

impl PluginRegistry {
    /// Start building a registry.
    pub fn builder() -> PluginRegistryBuilder {
        PluginRegistryBuilder::new()
    }

    /// Look up the descriptor for a service name.
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn ServiceDescriptor>> {
        self.services.get(name).cloned()
    }

    /// Check whether a service name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Registered service names, sorted.
    pub fn service_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.services.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Get the number of registered services.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl Default for PluginRegistry {
    /// The host's standard registry: only the `scheme` service.
    fn default() -> Self {
        let mut services: HashMap<String, Arc<dyn ServiceDescriptor>> = HashMap::new();
        services.insert(SCHEME_SERVICE.to_string(), Arc::new(SchemeDescriptor));
        Self { services }
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("services", &self.service_names())
            .finish()
    }
}

/// Collects service registrations before the registry is frozen.
#[derive(Default)]
pub struct PluginRegistryBuilder {
    services: HashMap<String, Arc<dyn ServiceDescriptor>>,
}

impl PluginRegistryBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor under `name`. Names must be unique.
    pub fn register<D>(mut self, name: impl Into<String>, descriptor: D) -> RuntimeResult<Self>
    where
        D: ServiceDescriptor,
    {
        let name = name.into();
        if self.services.contains_key(&name) {
            return Err(RuntimeError::DuplicateService(name));
        }
        self.services.insert(name, Arc::new(descriptor));
        Ok(self)
    }

    /// Freeze the registry.
    pub fn build(self) -> PluginRegistry {
        PluginRegistry {
            services: self.services,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheme_runtime::Capability;

    struct EchoDescriptor;

    impl ServiceDescriptor for EchoDescriptor {
        fn required_capabilities(&self) -> CapabilitySet {
            CapabilitySet::from_strings(["echo"])
        }
    }

    #[test]
    fn test_default_registry_has_scheme() {
        let registry = PluginRegistry::default();
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("scheme"));

        let descriptor = registry.lookup("scheme").unwrap();
        let required = descriptor.required_capabilities();
        assert!(required.has(&Capability::GetName));
        assert!(required.has(&Capability::GetSupportedMediaTypes));
        assert!(required.has(&Capability::SynthSwAttributes));
    }

    #[test]
    fn test_builder_registers_services() {
        let registry = PluginRegistry::builder()
            .register("scheme", SchemeDescriptor)
            .unwrap()
            .register("echo", EchoDescriptor)
            .unwrap()
            .build();

        assert_eq!(registry.service_names(), vec!["echo", "scheme"]);
        assert!(registry.lookup("missing").is_none());
    }

    #[test]
    fn test_builder_rejects_duplicates() {
        let result = PluginRegistry::builder()
            .register("scheme", SchemeDescriptor)
            .unwrap()
            .register("scheme", EchoDescriptor);

        assert!(matches!(result, Err(RuntimeError::DuplicateService(name)) if name == "scheme"));
    }

    #[test]
    fn test_empty_registry() {
        let registry = PluginRegistry::builder().build();
        assert!(registry.is_empty());
        assert!(!registry.contains("scheme"));
    }
}
