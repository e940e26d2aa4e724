//! The capability contract between the orchestration core and backing
//! adapters, plus the configuration directives applied before start.

use crate::container::ContainerClient;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::any::Any;

/// One unit of a backing service (a Redis, a ZooKeeper, ...), implemented by
/// an adapter outside this crate.
///
/// An instance is constructed unstarted by a [`ServiceFactory`], configured
/// through [`apply`](BackingService::apply), and then driven through exactly
/// one start/stop cycle by the [`StateGuard`](crate::guard::StateGuard) that
/// owns it. Config-file generation, binary invocation and protocol-specific
/// readiness probing are all adapter-internal; the core only sees the
/// returned `host:port` address.
///
/// The container methods are optional capabilities: the defaults report the
/// service as unsupported on the container path, which surfaces as an error
/// from [`ContainerLauncher::start`](crate::launcher::ContainerLauncher::start).
#[async_trait]
pub trait BackingService: Send {
    /// Launch the service natively and return its listening `host:port`.
    async fn start(&mut self) -> Result<String>;

    /// Stop the natively launched service.
    async fn stop(&mut self) -> Result<()>;

    /// Launch the service in a container and return its reachable `host:port`.
    async fn start_container(&mut self, _client: &ContainerClient) -> Result<String> {
        Err(Error::ContainerCommandFailed {
            operation: "start".into(),
            reason: "service does not support the container path".into(),
        })
    }

    /// Stop the containerized service.
    async fn stop_container(&mut self, _client: &ContainerClient) -> Result<()> {
        Err(Error::ContainerCommandFailed {
            operation: "stop".into(),
            reason: "service does not support the container path".into(),
        })
    }

    /// Apply one configuration directive to the unstarted instance.
    ///
    /// Directives arrive in caller order; applying the same key twice means
    /// the later value wins. Adapters reject keys they don't understand,
    /// which aborts the start before anything is spawned.
    fn apply(&mut self, option: &ServiceOption) -> Result<()> {
        Err(Error::DirectiveRejected {
            key: option.key().to_string(),
            reason: "service accepts no options".into(),
        })
    }

    /// Capability probing: downcast access to the concrete adapter.
    fn as_any(&self) -> &dyn Any;

    /// Mutable capability probing.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A tagged configuration directive applied to an instance before start.
///
/// Options compose as an ordered list rather than closures: order sensitivity
/// (later directives override earlier ones on the same key) falls out of the
/// adapter re-assigning the field on each `apply`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceOption {
    key: String,
    value: String,
}

impl ServiceOption {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Inert;

    #[async_trait]
    impl BackingService for Inert {
        async fn start(&mut self) -> Result<String> {
            Ok("127.0.0.1:0".into())
        }
        async fn stop(&mut self) -> Result<()> {
            Ok(())
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[tokio::test]
    async fn default_container_path_is_unsupported() {
        let mut svc = Inert;
        let client = ContainerClient::new();
        assert!(svc.start_container(&client).await.is_err());
        assert!(svc.stop_container(&client).await.is_err());
    }

    #[test]
    fn default_apply_rejects_every_key() {
        let mut svc = Inert;
        let err = svc.apply(&ServiceOption::new("auth", "s3cret")).unwrap_err();
        assert!(matches!(err, Error::DirectiveRejected { key, .. } if key == "auth"));
    }
}
