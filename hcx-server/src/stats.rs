//! # Peer Statistics
//!
//! Purpose: Count what the reference peer has seen so tests can assert on
//! connection reuse and request totals.
//!
//! ## Design Principles
//! 1. **Accumulator Pattern**: Atomic counters aggregate events cheaply.
//! 2. **Snapshot Reads**: Callers get a plain struct, never the atomics.
//!
//! ## Notes
//! - `Ordering::Relaxed` is enough; no cross-counter ordering is promised.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerSnapshot {
    /// Connections accepted (for TLS, handshakes completed).
    pub connections_total: u64,
    /// Connections currently open.
    pub connections_active: u64,
    /// Requests answered.
    pub requests_total: u64,
    /// Connections dropped because of malformed input.
    pub protocol_errors: u64,
}

/// Thread-safe counters shared between the accept loop and connection tasks.
#[derive(Debug, Default)]
pub struct PeerStats {
    connections_total: AtomicU64,
    connections_active: AtomicU64,
    requests_total: AtomicU64,
    protocol_errors: AtomicU64,
}

impl PeerStats {
    pub fn new() -> Self {
        PeerStats::default()
    }

    pub fn record_connection_open(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_close(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PeerSnapshot {
        PeerSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            requests_total: self.requests_total.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
        }
    }
}
