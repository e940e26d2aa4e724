//! Deadline-bounded, cancellable polling.
//!
//! Every wait in the core is a sleep-and-retry loop over a cheap probe, but
//! parameterized by an explicit [`RetryBudget`] and a `CancellationToken`
//! instead of a hard-coded times-times-delay pair, so callers can both bound
//! and abort a wait. The probe itself is never interrupted mid-call; only
//! the sleeps between probes race against the deadline and the token.

use std::future::Future;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// Cap on a single TCP dial attempt inside [`wait_reachable`].
const DIAL_TIMEOUT: Duration = Duration::from_secs(3);

/// How long to keep retrying, and how long to sleep between probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    pub timeout: Duration,
    pub interval: Duration,
}

impl RetryBudget {
    pub const fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }
}

/// Why a wait ended without the probe succeeding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// The retry budget elapsed. Callers map this to the taxonomy entry for
    /// whatever they were waiting on.
    TimedOut,
    /// The cancellation token fired.
    Cancelled,
}

/// Poll `probe` until it returns `true`, the budget elapses, or `cancel`
/// fires. The final probe runs even when the deadline lands mid-sleep, so a
/// condition that becomes true exactly at the deadline is still observed.
pub async fn wait_for<F, Fut>(
    budget: RetryBudget,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<(), WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + budget.timeout;
    loop {
        if probe().await {
            return Ok(());
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(WaitError::TimedOut);
        }
        let pause = budget.interval.min(deadline - now);
        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = cancel.cancelled() => return Err(WaitError::Cancelled),
        }
    }
}

/// Poll TCP connectivity to `addr` ("host:port") within the budget.
/// This is the readiness signal for container-based instances.
pub async fn wait_reachable(
    addr: &str,
    budget: RetryBudget,
    cancel: &CancellationToken,
) -> Result<(), WaitError> {
    wait_for(budget, cancel, || dial(addr)).await
}

/// One dial attempt, bounded by [`DIAL_TIMEOUT`].
async fn dial(addr: &str) -> bool {
    match tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(addr)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            tracing::trace!(addr, error = %e, "dial attempt failed");
            false
        }
        Err(_) => false,
    }
}

/// One-shot check that loopback is accepting connections on every port.
/// Adapters use this inside their own readiness loops after spawning a
/// process that binds a booked port.
pub async fn listening(ports: &[u16]) -> bool {
    for &port in ports {
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        if tokio::time::timeout(Duration::from_millis(500), TcpStream::connect(addr))
            .await
            .map(|r| r.is_err())
            .unwrap_or(true)
        {
            return false;
        }
    }
    true
}
