//! Process-wide counters for routing, dispatch and connection health.
//! Read with [`snapshot`]; the bridge logs a summary periodically at debug level.
use std::sync::atomic::{AtomicU64, Ordering};

static EVENTS_RECEIVED: AtomicU64 = AtomicU64::new(0);
static EVENTS_DISPATCHED: AtomicU64 = AtomicU64::new(0);
static EVENTS_UNCLASSIFIED: AtomicU64 = AtomicU64::new(0);
static EVENTS_UNKNOWN_DEVICE: AtomicU64 = AtomicU64::new(0);
static HANDLER_ERRORS: AtomicU64 = AtomicU64::new(0);
static TRANSMISSIONS: AtomicU64 = AtomicU64::new(0);
static TRANSMISSIONS_FAILED: AtomicU64 = AtomicU64::new(0);
static REPETITIONS_CANCELLED: AtomicU64 = AtomicU64::new(0);
static CONNECT_ATTEMPTS: AtomicU64 = AtomicU64::new(0);
static CONNECT_FAILURES: AtomicU64 = AtomicU64::new(0);
static DISCONNECTS: AtomicU64 = AtomicU64::new(0);

pub fn inc_events_received() {
    EVENTS_RECEIVED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_events_dispatched() {
    EVENTS_DISPATCHED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_events_unclassified() {
    EVENTS_UNCLASSIFIED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_events_unknown_device() {
    EVENTS_UNKNOWN_DEVICE.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_handler_errors() {
    HANDLER_ERRORS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_transmissions() {
    TRANSMISSIONS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_transmissions_failed() {
    TRANSMISSIONS_FAILED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_repetitions_cancelled() {
    REPETITIONS_CANCELLED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_connect_attempts() {
    CONNECT_ATTEMPTS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_connect_failures() {
    CONNECT_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_disconnects() {
    DISCONNECTS.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub events_received: u64,
    pub events_dispatched: u64,
    pub events_unclassified: u64,
    pub events_unknown_device: u64,
    pub handler_errors: u64,
    pub transmissions: u64,
    pub transmissions_failed: u64,
    pub repetitions_cancelled: u64,
    pub connect_attempts: u64,
    pub connect_failures: u64,
    pub disconnects: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        events_received: EVENTS_RECEIVED.load(Ordering::Relaxed),
        events_dispatched: EVENTS_DISPATCHED.load(Ordering::Relaxed),
        events_unclassified: EVENTS_UNCLASSIFIED.load(Ordering::Relaxed),
        events_unknown_device: EVENTS_UNKNOWN_DEVICE.load(Ordering::Relaxed),
        handler_errors: HANDLER_ERRORS.load(Ordering::Relaxed),
        transmissions: TRANSMISSIONS.load(Ordering::Relaxed),
        transmissions_failed: TRANSMISSIONS_FAILED.load(Ordering::Relaxed),
        repetitions_cancelled: REPETITIONS_CANCELLED.load(Ordering::Relaxed),
        connect_attempts: CONNECT_ATTEMPTS.load(Ordering::Relaxed),
        connect_failures: CONNECT_FAILURES.load(Ordering::Relaxed),
        disconnects: DISCONNECTS.load(Ordering::Relaxed),
    }
}
