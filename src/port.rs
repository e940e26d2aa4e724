//! Collision-free port booking for concurrent test fixtures.
//!
//! The broker hands out ports from a fixed range by walking a single atomic
//! cursor downward and bind-probing every candidate. Walking *down* from the
//! top of the range is deliberate: the OS allocates ephemeral ports for
//! outgoing connections from the bottom up, so starting high reduces
//! collisions with ports the kernel hands out behind our back.
//!
//! A number issued once is never issued again within the process, even after
//! the service that used it has stopped. The cursor is a consumable
//! resource: once it crosses the floor, only a process restart helps.

use crate::error::{Error, Result};
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::OnceLock;

/// Top of the default booking range.
pub const MAX_PORT: u16 = 65535;
/// Bottom of the default booking range.
pub const MIN_PORT: u16 = 10000;

static SHARED: OnceLock<PortBroker> = OnceLock::new();

/// Process-scoped port allocator.
///
/// The only shared mutable state is the cursor itself, updated with a single
/// atomic `fetch_sub`, so any number of callers may book concurrently without
/// a lock. The bind probe outside the atomic is what makes the result safe
/// against ports already held by the OS or by out-of-process services.
pub struct PortBroker {
    /// Next candidate is `cursor - 1`; starts one above the top of the range.
    cursor: AtomicI32,
    floor: u16,
}

impl PortBroker {
    /// Broker over the default range (`MIN_PORT..=MAX_PORT`).
    pub fn new() -> Self {
        Self::with_range(MIN_PORT, MAX_PORT)
    }

    /// Broker over a custom range. Mostly useful in tests that want to drive
    /// the cursor into exhaustion quickly.
    pub fn with_range(floor: u16, top: u16) -> Self {
        assert!(floor <= top, "port range floor must not exceed top");
        Self {
            cursor: AtomicI32::new(i32::from(top) + 1),
            floor,
        }
    }

    /// The process-wide broker shared by every adapter.
    ///
    /// Sharing one cursor is what makes the distinctness guarantee
    /// process-wide rather than per-broker.
    pub fn shared() -> &'static PortBroker {
        SHARED.get_or_init(PortBroker::new)
    }

    /// Book `count` distinct free ports, probing on the loopback interface.
    pub fn book(&self, count: usize) -> Result<Vec<u16>> {
        self.book_on(count, Ipv4Addr::LOCALHOST)
    }

    /// Book `count` distinct free ports, probing on the given IPv4 interface.
    ///
    /// Candidates that fail the bind probe are skipped, not retried; the
    /// cursor keeps decrementing until enough ports verify or the range is
    /// exhausted ([`Error::PortExhausted`], non-retryable).
    pub fn book_on(&self, count: usize, host: Ipv4Addr) -> Result<Vec<u16>> {
        let mut booked = Vec::with_capacity(count);
        while booked.len() < count {
            let candidate = self.cursor.fetch_sub(1, Ordering::SeqCst) - 1;
            if candidate < i32::from(self.floor) {
                tracing::warn!(floor = self.floor, "port range exhausted");
                return Err(Error::PortExhausted { floor: self.floor });
            }
            let port = candidate as u16;
            if probe(host, port) {
                booked.push(port);
            } else {
                tracing::debug!(port, "candidate port in use, skipping");
            }
        }
        Ok(booked)
    }

    /// Ports remaining before the cursor crosses the floor. Diagnostic only;
    /// another caller may consume them between the read and a booking.
    pub fn remaining(&self) -> u32 {
        let cursor = self.cursor.load(Ordering::SeqCst);
        (cursor - i32::from(self.floor)).max(0) as u32
    }
}

impl Default for PortBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// Bind-and-release an IPv4 listener to verify the port is actually free.
/// IPv4 explicitly: probing the unspecified `tcp` family can accept an
/// IPv6-only bind while the IPv4 side of the port stays occupied.
fn probe(host: Ipv4Addr, port: u16) -> bool {
    TcpListener::bind(SocketAddrV4::new(host, port)).is_ok()
}
