//! Service type identifiers and the factory registry.

use crate::error::{Error, Result};
use crate::service::BackingService;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Opaque identifier for a kind of backing service (e.g. `"redis"`).
///
/// Adapters typically expose one as a constant:
///
/// ```
/// use stagehand::ServiceType;
/// pub const REDIS: ServiceType = ServiceType::new("redis");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceType(&'static str);

impl ServiceType {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Zero-argument constructor producing a fresh, unstarted instance.
pub type ServiceFactory = Arc<dyn Fn() -> Box<dyn BackingService> + Send + Sync>;

/// Maps a [`ServiceType`] to the factory that produces its instances.
///
/// Registrations happen during process initialization (effectively a single
/// writer); resolution happens concurrently from many callers and takes the
/// read path of the lock.
#[derive(Default)]
pub struct ServiceRegistry {
    factories: RwLock<HashMap<ServiceType, ServiceFactory>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for `service_type`.
    ///
    /// # Panics
    ///
    /// Panics if the type is already registered. A duplicate registration is
    /// a build-time programming error, not a runtime condition, so it aborts
    /// initialization. Use [`try_register`](Self::try_register) for the
    /// error-returning form.
    pub fn register<F>(&self, service_type: ServiceType, factory: F)
    where
        F: Fn() -> Box<dyn BackingService> + Send + Sync + 'static,
    {
        if let Err(e) = self.try_register(service_type, factory) {
            panic!("{e}");
        }
    }

    /// Fallible registration, failing with [`Error::DuplicateRegistration`]
    /// when the type already has a factory.
    pub fn try_register<F>(&self, service_type: ServiceType, factory: F) -> Result<()>
    where
        F: Fn() -> Box<dyn BackingService> + Send + Sync + 'static,
    {
        let mut factories = self.factories.write();
        if factories.contains_key(&service_type) {
            return Err(Error::DuplicateRegistration(service_type.to_string()));
        }
        tracing::debug!(%service_type, "registered service factory");
        factories.insert(service_type, Arc::new(factory));
        Ok(())
    }

    /// Look up the factory for `service_type`.
    pub fn resolve(&self, service_type: &ServiceType) -> Result<ServiceFactory> {
        self.factories
            .read()
            .get(service_type)
            .cloned()
            .ok_or_else(|| Error::UnsupportedServiceType(service_type.to_string()))
    }

    /// Every registered type, in no particular order.
    pub fn registered_types(&self) -> Vec<ServiceType> {
        self.factories.read().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as CrateResult;
    use async_trait::async_trait;
    use std::any::Any;

    struct Dummy;

    #[async_trait]
    impl BackingService for Dummy {
        async fn start(&mut self) -> CrateResult<String> {
            Ok("127.0.0.1:1".into())
        }
        async fn stop(&mut self) -> CrateResult<()> {
            Ok(())
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    const DUMMY: ServiceType = ServiceType::new("dummy");

    #[test]
    fn resolve_returns_registered_factory() {
        let registry = ServiceRegistry::new();
        registry.register(DUMMY, || Box::new(Dummy));
        let factory = registry.resolve(&DUMMY).unwrap();
        let instance = factory();
        assert!(instance.as_any().is::<Dummy>());
    }

    #[test]
    fn resolve_unknown_type_fails_without_side_effects() {
        let registry = ServiceRegistry::new();
        let err = registry.resolve(&DUMMY).err().unwrap();
        assert!(matches!(err, Error::UnsupportedServiceType(t) if t == "dummy"));
        assert!(registry.registered_types().is_empty());
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn duplicate_registration_is_fatal() {
        let registry = ServiceRegistry::new();
        registry.register(DUMMY, || Box::new(Dummy));
        registry.register(DUMMY, || Box::new(Dummy));
    }

    #[test]
    fn try_register_reports_duplicate_as_error() {
        let registry = ServiceRegistry::new();
        registry.try_register(DUMMY, || Box::new(Dummy)).unwrap();
        let err = registry
            .try_register(DUMMY, || Box::new(Dummy))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateRegistration(_)));
    }
}
