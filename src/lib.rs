//! # Stagehand
//!
//! Ephemeral backing services for integration tests: spin up a real
//! dependency, hand the test its address, tear everything down afterwards.
//!
//! ## Features
//!
//! - **Port Brokering**: Process-wide unique port booking with bind-probe
//!   verification, never recycling a booked port
//! - **Pluggable Adapters**: Services register a factory under a
//!   [`ServiceType`]; the launchers construct fresh instances per start
//! - **Lifecycle Guarding**: A one-way `New → Starting → Ready → Stopped`
//!   state machine wraps every instance, so misuse fails loudly instead of
//!   double-starting or double-stopping a backend
//! - **Two Launch Paths**: Native processes via [`Launcher`], Docker
//!   containers via [`ContainerLauncher`], behind the same contract
//! - **Best-Effort Teardown**: `stop_all` stops everything it can, reports
//!   every failure at once, and always forgets the instances it visited
//! - **Cancellation Support**: Container waits abort promptly via
//!   `CancellationToken`
//!
//! ## Quick Start
//!
//! ```no_run
//! use stagehand::{Launcher, ServiceRegistry, ServiceType};
//! use std::sync::Arc;
//!
//! const REDIS: ServiceType = ServiceType::new("redis");
//!
//! # async fn example(registry: Arc<ServiceRegistry>) -> stagehand::Result<()> {
//! let launcher = Launcher::new(registry);
//! let (address, stop) = launcher.start(REDIS, &[]).await?;
//! // ... run the test against `address` ...
//! stop.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Model
//!
//! - Launchers take `&self` everywhere; tests share one behind an `Arc`
//! - Port booking is an atomic cursor, safe from any thread without locks
//! - Each instance's state transitions are compare-and-swap, so exactly one
//!   caller wins a concurrent start or stop
//! - A start that fails spends its guard permanently rather than allowing a
//!   retry against a half-started backend

pub mod container;
pub mod error;
pub mod guard;
pub mod launcher;
pub mod port;
pub mod process;
pub mod registry;
pub mod service;
pub mod wait;

// Re-export commonly used types
pub use container::{ContainerClient, ContainerSpec, ContainerSpecBuilder, RunningContainer};
pub use error::{Error, Result};
pub use guard::{LifecycleState, StateGuard};
pub use launcher::{ContainerLauncher, Launcher, StopHandle};
pub use port::{PortBroker, MAX_PORT, MIN_PORT};
pub use process::{check_executables, find_executable, scratch_dir, write_config, Exec};
pub use registry::{ServiceFactory, ServiceRegistry, ServiceType};
pub use service::{BackingService, ServiceOption};
pub use wait::{wait_for, wait_reachable, RetryBudget, WaitError};
