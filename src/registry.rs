//! Name-keyed registry of services.
//!
//! The registry holds each service by `Arc`, so a service stays alive for as
//! long as any in-flight dispatch still uses it, even after removal.
//! Lookups clone the `Arc` and release the map shard before the handler runs.

use std::{fmt, sync::Arc};

use dashmap::{DashMap, mapref::entry::Entry};
use thiserror::Error;

use crate::service::Service;

/// Errors raised when registering services.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum RegistryError {
    /// A service with the same name is already registered.
    #[error("service `{0}` was already registered")]
    DuplicateService(String),
}

/// Concurrent map from service name to service.
#[derive(Default)]
pub struct ServiceRegistry(DashMap<String, Arc<dyn Service>>);

impl ServiceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register `service` under its own name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateService`] and leaves the registry
    /// unchanged if the name is already taken.
    pub fn register(&self, service: Arc<dyn Service>) -> Result<(), RegistryError> {
        match self.0.entry(service.name().to_owned()) {
            Entry::Occupied(entry) => Err(RegistryError::DuplicateService(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(service);
                Ok(())
            }
        }
    }

    /// Remove the service called `name`, returning it if it was present.
    pub fn remove(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.0.remove(name).map(|(_, service)| service)
    }

    /// Look up the service called `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.0.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns `true` if a service called `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool { self.0.contains_key(name) }

    /// Number of registered services.
    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    /// Returns `true` if no services are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Names of the registered services, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.0.iter().map(|entry| entry.key().clone()).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ServiceRegistry").field(&self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::service::RpcService;

    fn service(name: &str, method: &str) -> Arc<dyn Service> {
        Arc::new(
            RpcService::new(name)
                .method(method, |_: &[u8]| Ok(None))
                .expect("register method"),
        )
    }

    #[fixture]
    fn registry() -> ServiceRegistry {
        let registry = ServiceRegistry::new();
        registry
            .register(service("Echo", "first"))
            .expect("register Echo");
        registry
    }

    #[rstest]
    fn duplicate_name_keeps_first_service(registry: ServiceRegistry) {
        assert_eq!(
            registry.register(service("Echo", "second")),
            Err(RegistryError::DuplicateService("Echo".into()))
        );
        assert_eq!(registry.len(), 1);

        let kept = registry.get("Echo").expect("Echo registered");
        assert!(kept.call_method("first", &[]).is_ok());
        assert!(kept.call_method("second", &[]).is_err());
    }

    #[rstest]
    fn remove_is_a_no_op_for_unknown_names(registry: ServiceRegistry) {
        assert!(registry.remove("Missing").is_none());
        assert!(registry.contains("Echo"));

        assert!(registry.remove("Echo").is_some());
        assert!(registry.is_empty());
        assert!(registry.get("Echo").is_none());
    }

    #[rstest]
    fn removed_service_outlives_registry_entry(registry: ServiceRegistry) {
        let held = registry.get("Echo").expect("Echo registered");
        registry.remove("Echo");
        assert_eq!(held.name(), "Echo");
        registry
            .register(service("Echo", "again"))
            .expect("name is free again");
    }

    #[rstest]
    fn names_are_sorted(registry: ServiceRegistry) {
        registry.register(service("Alpha", "m")).expect("register Alpha");
        assert_eq!(registry.names(), vec!["Alpha".to_owned(), "Echo".to_owned()]);
    }
}
