//! Port broker behavior under real concurrency: many threads booking at
//! once must never receive the same port, and exhaustion must be permanent.
use stagehand::{PortBroker, MAX_PORT};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

#[test]
fn concurrent_bookings_never_collide() {
    let broker = Arc::new(PortBroker::with_range(20000, MAX_PORT));
    let mut handles = Vec::new();
    for _ in 0..100 {
        let broker = Arc::clone(&broker);
        handles.push(thread::spawn(move || broker.book(100).unwrap()));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for port in handle.join().unwrap() {
            assert!((20000..=MAX_PORT).contains(&port), "port {port} out of range");
            assert!(seen.insert(port), "port {port} booked twice");
        }
    }
    assert_eq!(seen.len(), 10_000);
}

#[test]
fn shared_broker_hands_out_distinct_ports_across_threads() {
    let mut handles = Vec::new();
    for _ in 0..8 {
        handles.push(thread::spawn(|| PortBroker::shared().book(5).unwrap()));
    }
    let mut seen = HashSet::new();
    for handle in handles {
        for port in handle.join().unwrap() {
            assert!(seen.insert(port), "shared broker booked {port} twice");
        }
    }
}

#[test]
fn exhausted_broker_stays_exhausted() {
    // Six candidate ports at most; some may be occupied on the host, which
    // only exhausts the cursor sooner.
    let broker = PortBroker::with_range(65530, MAX_PORT);
    let err = broker.book(10).unwrap_err();
    assert!(matches!(err, stagehand::Error::PortExhausted { floor: 65530 }));
    assert!(broker.book(1).is_err());
}
