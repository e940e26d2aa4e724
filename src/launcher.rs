//! The orchestrators: resolve a factory, configure a fresh instance, drive
//! it through a guard, and track everything that started for teardown.
//!
//! [`Launcher`] and [`ContainerLauncher`] share every contract; they differ
//! only in which capability path the guard dispatches to. Teardown is
//! best-effort: `stop_all` visits every tracked instance, aggregates every
//! failure, and clears the map no matter what.

use crate::container::ContainerClient;
use crate::error::{Error, Result};
use crate::guard::{LaunchMode, LifecycleState, StateGuard};
use crate::registry::{ServiceRegistry, ServiceType};
use crate::service::ServiceOption;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Instance map: reachable address → the guard owning that instance.
///
/// A tokio mutex because `stop_all` holds it across backend stop calls;
/// test suites stop a small, bounded number of instances, so throughput on
/// this lock does not matter.
type InstanceMap = Mutex<HashMap<String, Arc<StateGuard>>>;

/// Stop function bound to one started instance, handed back from `start`.
///
/// Cheap to clone; all clones target the same guard, so only the first stop
/// can succeed and the rest report [`Error::InvalidState`].
#[derive(Debug, Clone)]
pub struct StopHandle {
    guard: Arc<StateGuard>,
}

impl StopHandle {
    /// Stop the instance this handle was returned for.
    pub async fn stop(&self) -> Result<()> {
        self.guard.stop().await
    }

    /// Lifecycle state of the underlying guard.
    pub fn state(&self) -> LifecycleState {
        self.guard.state()
    }
}

/// Native-process orchestrator.
pub struct Launcher {
    registry: Arc<ServiceRegistry>,
    instances: InstanceMap,
}

impl Launcher {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self {
            registry,
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Start an instance of `service_type`, returning its reachable address
    /// and the stop function for it.
    ///
    /// Options apply in order before anything is spawned; the first rejected
    /// option aborts the start. A failed start leaves no entry in the
    /// instance map and the failed guard is simply dropped.
    pub async fn start(
        &self,
        service_type: ServiceType,
        options: &[ServiceOption],
    ) -> Result<(String, StopHandle)> {
        start_guarded(
            &self.registry,
            &self.instances,
            service_type,
            options,
            LaunchMode::Native,
        )
        .await
    }

    /// Stop every tracked instance, best-effort.
    pub async fn stop_all(&self) -> Result<()> {
        stop_tracked(&self.instances).await
    }

    /// Look up the guard tracked under `address`, for capability probing on
    /// the backend instance via [`StateGuard::service`].
    pub async fn get(&self, address: &str) -> Option<Arc<StateGuard>> {
        self.instances.lock().await.get(address).cloned()
    }

    /// Addresses currently tracked.
    pub async fn addresses(&self) -> Vec<String> {
        self.instances.lock().await.keys().cloned().collect()
    }
}

/// Container-based orchestrator: same contract as [`Launcher`], but guards
/// dispatch to the adapters' container capabilities through a shared
/// [`ContainerClient`].
pub struct ContainerLauncher {
    registry: Arc<ServiceRegistry>,
    client: ContainerClient,
    instances: InstanceMap,
}

impl ContainerLauncher {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self::with_client(registry, ContainerClient::new())
    }

    pub fn with_client(registry: Arc<ServiceRegistry>, client: ContainerClient) -> Self {
        Self {
            registry,
            client,
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// The client shared by all instances this launcher starts.
    pub fn client(&self) -> &ContainerClient {
        &self.client
    }

    /// Abort the waiting phases of in-flight starts. Already-running
    /// containers are unaffected; stop them through `stop_all`.
    pub fn cancel_operations(&self) {
        self.client.cancel_operations();
    }

    pub async fn start(
        &self,
        service_type: ServiceType,
        options: &[ServiceOption],
    ) -> Result<(String, StopHandle)> {
        start_guarded(
            &self.registry,
            &self.instances,
            service_type,
            options,
            LaunchMode::Container(self.client.clone()),
        )
        .await
    }

    pub async fn stop_all(&self) -> Result<()> {
        stop_tracked(&self.instances).await
    }

    pub async fn get(&self, address: &str) -> Option<Arc<StateGuard>> {
        self.instances.lock().await.get(address).cloned()
    }

    pub async fn addresses(&self) -> Vec<String> {
        self.instances.lock().await.keys().cloned().collect()
    }
}

async fn start_guarded(
    registry: &ServiceRegistry,
    instances: &InstanceMap,
    service_type: ServiceType,
    options: &[ServiceOption],
    mode: LaunchMode,
) -> Result<(String, StopHandle)> {
    let factory = registry.resolve(&service_type)?;
    let mut service = factory();
    for option in options {
        service.apply(option)?;
    }

    let guard = Arc::new(StateGuard::new(service_type, service, mode));
    // The guard's own transition is the synchronization for the start; the
    // map mutex is only taken for the insert afterwards.
    let address = guard.start().await?;

    let mut map = instances.lock().await;
    if map.contains_key(&address) {
        // Should be impossible while the broker never reuses ports; pick the
        // loud failure over silently orphaning the previous instance.
        tracing::error!(%address, "address already tracked by another live instance");
    }
    map.insert(address.clone(), Arc::clone(&guard));
    drop(map);

    tracing::debug!(%service_type, %address, "service started and tracked");
    Ok((address, StopHandle { guard }))
}

async fn stop_tracked(instances: &InstanceMap) -> Result<()> {
    let mut map = instances.lock().await;
    let mut failures = Vec::new();
    for (address, guard) in map.iter() {
        if let Err(e) = guard.stop().await {
            tracing::warn!(%address, error = %e, "instance failed to stop");
            failures.push(e);
        }
    }
    // Cleared unconditionally: best-effort teardown, not rollback.
    map.clear();
    match Error::combine(failures) {
        None => Ok(()),
        Some(e) => Err(e),
    }
}
