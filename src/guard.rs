//! Per-instance lifecycle state machine.
//!
//! Each [`StateGuard`] wraps exactly one backing-service instance and
//! enforces the one-way state machine `New → Starting → Ready → Stopped`
//! with a single atomic word. The compare-and-swap transition is the only
//! synchronization: concurrent starts (or stops) against the same guard
//! admit exactly one winner, and guards for different instances never
//! contend on anything.

use crate::container::ContainerClient;
use crate::error::{Error, Result};
use crate::registry::ServiceType;
use crate::service::BackingService;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::Mutex;

/// Lifecycle state of a guarded instance. Transitions are one-way; no state
/// is re-enterable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    New = 0,
    Starting = 1,
    Ready = 2,
    Stopped = 3,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::New => "new",
            LifecycleState::Starting => "starting",
            LifecycleState::Ready => "ready",
            LifecycleState::Stopped => "stopped",
        }
    }

    fn from_word(word: u8) -> Self {
        match word {
            0 => LifecycleState::New,
            1 => LifecycleState::Starting,
            2 => LifecycleState::Ready,
            _ => LifecycleState::Stopped,
        }
    }
}

/// How the guard drives its instance: through the native process path or
/// the container path.
pub(crate) enum LaunchMode {
    Native,
    Container(ContainerClient),
}

/// Wraps one service instance for one start/stop cycle.
///
/// The guard owns the instance exclusively; callers reach the raw adapter
/// only through [`service`](StateGuard::service) for capability probing. A
/// guard whose start fails stays in `Starting` forever; the instance must
/// be discarded and reconstructed, never retried through the same guard.
pub struct StateGuard {
    state: AtomicU8,
    mode: LaunchMode,
    service_type: ServiceType,
    service: Mutex<Box<dyn BackingService>>,
}

impl std::fmt::Debug for StateGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateGuard")
            .field("state", &self.state())
            .field("service_type", &self.service_type)
            .finish_non_exhaustive()
    }
}

impl StateGuard {
    pub(crate) fn new(
        service_type: ServiceType,
        service: Box<dyn BackingService>,
        mode: LaunchMode,
    ) -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::New as u8),
            mode,
            service_type,
            service: Mutex::new(service),
        }
    }

    /// The service type this guard was constructed for.
    pub fn service_type(&self) -> ServiceType {
        self.service_type
    }

    /// Current state. Diagnostic only; it may change immediately after the
    /// read, except for `Stopped` which is terminal.
    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_word(self.state.load(Ordering::Acquire))
    }

    /// Lock the wrapped instance for capability probing
    /// (`as_any` downcasting to the concrete adapter).
    pub async fn service(&self) -> tokio::sync::MutexGuard<'_, Box<dyn BackingService>> {
        self.service.lock().await
    }

    /// Drive the instance through its backend start, exactly once.
    ///
    /// Fails with [`Error::InvalidState`] unless the guard is in `New`,
    /// which covers a concurrent double-start as well as any call after a
    /// prior attempt. On backend failure the guard stays in `Starting`.
    #[tracing::instrument(skip(self), fields(service.kind = %self.service_type))]
    pub async fn start(&self) -> Result<String> {
        self.transition(LifecycleState::New, LifecycleState::Starting)?;

        let mut service = self.service.lock().await;
        let started = match &self.mode {
            LaunchMode::Native => service.start().await,
            LaunchMode::Container(client) => service.start_container(client).await,
        };
        match started {
            Ok(address) => {
                self.state
                    .store(LifecycleState::Ready as u8, Ordering::Release);
                tracing::debug!(%address, "service ready");
                Ok(address)
            }
            Err(e) => {
                tracing::warn!(error = %e, "service start failed; guard is spent");
                Err(e)
            }
        }
    }

    /// Drive the instance through its backend stop, exactly once.
    ///
    /// The `Ready → Stopped` transition happens *before* the backend call,
    /// so a failing stop still lands on `Stopped` and can never be retried
    /// through this guard.
    #[tracing::instrument(skip(self), fields(service.kind = %self.service_type))]
    pub async fn stop(&self) -> Result<()> {
        self.transition(LifecycleState::Ready, LifecycleState::Stopped)?;

        let mut service = self.service.lock().await;
        match &self.mode {
            LaunchMode::Native => service.stop().await,
            LaunchMode::Container(client) => service.stop_container(client).await,
        }
    }

    fn transition(&self, from: LifecycleState, to: LifecycleState) -> Result<()> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|found| Error::InvalidState {
                expected: from.as_str(),
                found: LifecycleState::from_word(found).as_str(),
            })
    }
}
