//! Container plumbing for the container-based launch path.
//!
//! All Docker interactions go through [`ContainerClient`], a thin wrapper
//! over the `docker` CLI with per-call timeouts. The launch sequence lives in
//! [`ContainerClient::launch`]: create, start, wait for the running state,
//! resolve the reachable address, wait for TCP reachability, and force-remove
//! the container on any failure along the way.

use crate::error::{Error, Result};
use crate::port::PortBroker;
use crate::wait::{self, RetryBudget, WaitError};
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Cap on a single `docker` CLI invocation.
const CLI_TIMEOUT: Duration = Duration::from_secs(30);

/// Budget for the container to report a running state after start.
pub const STARTED_BUDGET: RetryBudget =
    RetryBudget::new(Duration::from_secs(5), Duration::from_millis(100));

/// Budget for the exposed port to become dialable once the container runs.
pub const REACHABLE_BUDGET: RetryBudget =
    RetryBudget::new(Duration::from_secs(10), Duration::from_millis(100));

/// Whether this host can dial a container's private network address
/// directly. On macOS the containers live inside a VM, so the reachable
/// address must go through an explicit host-port binding instead.
fn host_routes_to_containers() -> bool {
    cfg!(target_os = "linux")
}

/// Creation parameters for one container, assembled with
/// [`ContainerSpec::builder`].
///
/// Exactly one exposed port (the first) is treated as the externally
/// reachable one; any host-port binding the platform needs is requested for
/// that port only.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    image: String,
    command: Vec<String>,
    env: Vec<String>,
    exposed_ports: Vec<u16>,
}

impl ContainerSpec {
    pub fn builder(image: impl Into<String>) -> ContainerSpecBuilder {
        ContainerSpecBuilder {
            spec: ContainerSpec {
                image: image.into(),
                command: Vec::new(),
                env: Vec::new(),
                exposed_ports: Vec::new(),
            },
        }
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    /// The port a caller connects to: the first exposed port.
    pub fn connect_port(&self) -> Option<u16> {
        self.exposed_ports.first().copied()
    }
}

/// Fluent construction of a [`ContainerSpec`].
#[derive(Debug)]
pub struct ContainerSpecBuilder {
    spec: ContainerSpec,
}

impl ContainerSpecBuilder {
    /// Override the image's default command.
    pub fn command<I, A>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: ToString,
    {
        self.spec.command = command.into_iter().map(|a| a.to_string()).collect();
        self
    }

    /// Add one `KEY=VALUE` environment entry.
    pub fn env(mut self, entry: impl Into<String>) -> Self {
        self.spec.env.push(entry.into());
        self
    }

    /// Expose a TCP port. The first exposed port is the reachable one.
    pub fn expose(mut self, port: u16) -> Self {
        self.spec.exposed_ports.push(port);
        self
    }

    pub fn build(self) -> ContainerSpec {
        self.spec
    }
}

/// A container the launch sequence brought up, identified by the Docker id
/// and the address the caller can actually dial.
#[derive(Debug, Clone)]
pub struct RunningContainer {
    pub id: String,
    pub address: String,
}

/// Thin client over the `docker` CLI.
///
/// Cheap to clone; every clone shares the same cancellation token, so
/// cancelling one cancels the waits of every in-flight launch started
/// through any clone.
#[derive(Debug, Clone, Default)]
pub struct ContainerClient {
    cancel: CancellationToken,
}

impl ContainerClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// The token observed by this client's launch waits.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Abort the waiting phases of in-flight launches. Containers already
    /// created keep running; their launch calls remove them before erroring.
    pub fn cancel_operations(&self) {
        self.cancel.cancel();
    }

    /// Run one docker CLI invocation, bounded by [`CLI_TIMEOUT`].
    async fn run(&self, args: &[&str]) -> Result<Output> {
        let result =
            tokio::time::timeout(CLI_TIMEOUT, Command::new("docker").args(args).output()).await;
        let operation = format!("docker {}", args.join(" "));
        match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(Error::ContainerCommandFailed {
                operation,
                reason: e.to_string(),
            }),
            Err(_) => Err(Error::ContainerCommandFailed {
                operation,
                reason: format!("timed out after {CLI_TIMEOUT:?}"),
            }),
        }
    }

    /// Like [`run`](Self::run) but non-zero exit is an error carrying stderr.
    async fn run_success(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args).await?;
        if output.status.success() {
            return Ok(output);
        }
        Err(Error::ContainerCommandFailed {
            operation: format!("docker {}", args.join(" ")),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    /// Check that the daemon responds at all. Tests use this to skip the
    /// container path on machines without Docker.
    pub async fn daemon_healthy(&self) -> bool {
        match self.run(&["info", "--format", "{{.ServerVersion}}"]).await {
            Ok(o) => o.status.success(),
            Err(_) => false,
        }
    }

    /// Pull an image; a locally present image is fine too.
    pub async fn pull(&self, image: &str) -> Result<()> {
        let result = tokio::time::timeout(
            Duration::from_secs(120),
            Command::new("docker").args(["pull", image]).output(),
        )
        .await;
        match result {
            Ok(Ok(o)) if o.status.success() => Ok(()),
            Ok(Ok(o)) => Err(Error::ContainerCommandFailed {
                operation: format!("docker pull {image}"),
                reason: String::from_utf8_lossy(&o.stderr).trim().to_string(),
            }),
            Ok(Err(e)) => Err(Error::ContainerCommandFailed {
                operation: format!("docker pull {image}"),
                reason: e.to_string(),
            }),
            Err(_) => Err(Error::ContainerCommandFailed {
                operation: format!("docker pull {image}"),
                reason: "timed out".into(),
            }),
        }
    }

    /// Whether the container is currently in the running state.
    pub async fn is_running(&self, id: &str) -> bool {
        match self
            .run(&["inspect", "-f", "{{.State.Running}}", id])
            .await
        {
            Ok(o) if o.status.success() => String::from_utf8_lossy(&o.stdout).trim() == "true",
            _ => false,
        }
    }

    /// Whether the container exists at all (in any state).
    pub async fn exists(&self, id: &str) -> bool {
        match self.run(&["inspect", "-f", "{{.Id}}", id]).await {
            Ok(o) => o.status.success(),
            Err(_) => false,
        }
    }

    /// The container's private network address.
    async fn inspect_ip(&self, id: &str) -> Result<String> {
        let output = self
            .run_success(&["inspect", "-f", "{{json .NetworkSettings.IPAddress}}", id])
            .await?;
        let raw = String::from_utf8_lossy(&output.stdout);
        let ip: String =
            serde_json::from_str(raw.trim()).map_err(|e| Error::ContainerCommandFailed {
                operation: format!("docker inspect {id}"),
                reason: format!("unparsable network settings: {e}"),
            })?;
        if ip.is_empty() {
            return Err(Error::ContainerCommandFailed {
                operation: format!("docker inspect {id}"),
                reason: "container has no network address".into(),
            });
        }
        Ok(ip)
    }

    /// Force-remove a container. A container that is already gone is not a
    /// failure; anything else is surfaced, never swallowed.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let output = self.run(&["rm", "-f", id]).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("No such container") {
            return Ok(());
        }
        Err(Error::ContainerCommandFailed {
            operation: format!("docker rm -f {id}"),
            reason: stderr.trim().to_string(),
        })
    }

    /// Bring up a container and wait until it is live and reachable.
    ///
    /// Steps: create, start, poll inspection until the running state (budget
    /// [`STARTED_BUDGET`], else [`Error::ContainerStartTimeout`]), resolve
    /// the reachable address, poll TCP connectivity (budget
    /// [`REACHABLE_BUDGET`], else [`Error::ContainerUnreachable`]). Every
    /// failure after creation force-removes the container before returning.
    #[tracing::instrument(skip(self, spec), fields(image = %spec.image()))]
    pub async fn launch(&self, spec: &ContainerSpec) -> Result<RunningContainer> {
        let connect_port = spec.connect_port().ok_or_else(|| Error::ContainerCreateFailed {
            image: spec.image.clone(),
            reason: "spec exposes no port".into(),
        })?;

        // On hosts that cannot route to container addresses, bind the
        // reachable port to a broker-booked host port up front.
        let host_binding = if host_routes_to_containers() {
            None
        } else {
            Some(PortBroker::shared().book(1)?[0])
        };

        let id = self.create(spec, host_binding, connect_port).await?;
        tracing::debug!(container = %id, "container created");

        if let Err(e) = self.run_success(&["start", &id]).await {
            self.cleanup_after_failure(&id).await;
            return Err(e);
        }

        match wait::wait_for(STARTED_BUDGET, &self.cancel, || self.is_running(&id)).await {
            Ok(()) => {}
            Err(WaitError::TimedOut) => {
                self.cleanup_after_failure(&id).await;
                return Err(Error::ContainerStartTimeout {
                    container: short_id(&id),
                    waited: STARTED_BUDGET.timeout,
                });
            }
            Err(WaitError::Cancelled) => {
                self.cleanup_after_failure(&id).await;
                return Err(Error::Cancelled(short_id(&id)));
            }
        }

        let address = match host_binding {
            Some(host_port) => format!("127.0.0.1:{host_port}"),
            None => match self.inspect_ip(&id).await {
                Ok(ip) => format!("{ip}:{connect_port}"),
                Err(e) => {
                    self.cleanup_after_failure(&id).await;
                    return Err(e);
                }
            },
        };
        tracing::debug!(container = %id, %address, "waiting for reachability");

        match wait::wait_reachable(&address, REACHABLE_BUDGET, &self.cancel).await {
            Ok(()) => Ok(RunningContainer { id, address }),
            Err(WaitError::TimedOut) => {
                self.cleanup_after_failure(&id).await;
                Err(Error::ContainerUnreachable {
                    container: short_id(&id),
                    address,
                    waited: REACHABLE_BUDGET.timeout,
                })
            }
            Err(WaitError::Cancelled) => {
                self.cleanup_after_failure(&id).await;
                Err(Error::Cancelled(short_id(&id)))
            }
        }
    }

    async fn create(
        &self,
        spec: &ContainerSpec,
        host_binding: Option<u16>,
        connect_port: u16,
    ) -> Result<String> {
        let mut args: Vec<String> = vec!["create".into()];
        for port in &spec.exposed_ports {
            args.push("--expose".into());
            args.push(port.to_string());
        }
        if let Some(host_port) = host_binding {
            args.push("-p".into());
            args.push(format!("{host_port}:{connect_port}"));
        }
        for entry in &spec.env {
            args.push("-e".into());
            args.push(entry.clone());
        }
        args.push(spec.image.clone());
        args.extend(spec.command.iter().cloned());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self
            .run(&arg_refs)
            .await
            .and_then(|o| {
                if o.status.success() {
                    Ok(o)
                } else {
                    Err(Error::ContainerCreateFailed {
                        image: spec.image.clone(),
                        reason: String::from_utf8_lossy(&o.stderr).trim().to_string(),
                    })
                }
            })
            .map_err(|e| match e {
                Error::ContainerCreateFailed { .. } => e,
                other => Error::ContainerCreateFailed {
                    image: spec.image.clone(),
                    reason: other.to_string(),
                },
            })?;

        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(Error::ContainerCreateFailed {
                image: spec.image.clone(),
                reason: "docker create produced no container id".into(),
            });
        }
        Ok(id)
    }

    /// Best-effort removal on the failure path; the original error is the
    /// one worth reporting, so a removal failure only gets logged.
    async fn cleanup_after_failure(&self, id: &str) {
        if let Err(e) = self.remove(id).await {
            tracing::warn!(container = %id, error = %e, "failed to remove container after launch failure");
        }
    }
}

fn short_id(id: &str) -> String {
    id.chars().take(12).collect()
}
