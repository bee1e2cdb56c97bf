//! Traffic and lifecycle counters for one bridge instance.
//!
//! Every counter is an `AtomicU64` so the uplink pump, the serial writer and
//! every client session can update them without taking a lock.  `Relaxed`
//! ordering is enough: the counters are independent and only ever read as a
//! point-in-time [`StatsSnapshot`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, shared by reference across all bridge tasks.
#[derive(Debug, Default)]
pub struct BridgeStats {
    uplink_frames: AtomicU64,
    downlink_frames: AtomicU64,
    downlink_dropped: AtomicU64,
    noise_bytes: AtomicU64,
    clients_accepted: AtomicU64,
    clients_rejected: AtomicU64,
    clients_evicted: AtomicU64,
    serial_reconnects: AtomicU64,
}

impl BridgeStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A frame from the serial device was broadcast to the clients.
    pub fn record_uplink_frame(&self) {
        self.uplink_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// A client frame was written to the serial device.
    pub fn record_downlink_frame(&self) {
        self.downlink_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// A client frame was dropped because the serial device was unavailable.
    pub fn record_downlink_dropped(&self) {
        self.downlink_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_noise_bytes(&self, count: u64) {
        self.noise_bytes.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_client_accepted(&self) {
        self.clients_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// A connection was refused because the client cap was reached.
    pub fn record_client_rejected(&self) {
        self.clients_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Clients removed by a broadcast because they could not take the frame.
    pub fn record_clients_evicted(&self, count: u64) {
        self.clients_evicted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_serial_reconnect(&self) {
        self.serial_reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Downlink frames dropped so far.
    pub fn downlink_dropped(&self) -> u64 {
        self.downlink_dropped.load(Ordering::Relaxed)
    }

    /// Reads every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uplink_frames: self.uplink_frames.load(Ordering::Relaxed),
            downlink_frames: self.downlink_frames.load(Ordering::Relaxed),
            downlink_dropped: self.downlink_dropped.load(Ordering::Relaxed),
            noise_bytes: self.noise_bytes.load(Ordering::Relaxed),
            clients_accepted: self.clients_accepted.load(Ordering::Relaxed),
            clients_rejected: self.clients_rejected.load(Ordering::Relaxed),
            clients_evicted: self.clients_evicted.load(Ordering::Relaxed),
            serial_reconnects: self.serial_reconnects.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`BridgeStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub uplink_frames: u64,
    pub downlink_frames: u64,
    pub downlink_dropped: u64,
    pub noise_bytes: u64,
    pub clients_accepted: u64,
    pub clients_rejected: u64,
    pub clients_evicted: u64,
    pub serial_reconnects: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "uplink={} downlink={} downlink_dropped={} noise_bytes={} \
             clients_accepted={} clients_rejected={} clients_evicted={} serial_reconnects={}",
            self.uplink_frames,
            self.downlink_frames,
            self.downlink_dropped,
            self.noise_bytes,
            self.clients_accepted,
            self.clients_rejected,
            self.clients_evicted,
            self.serial_reconnects,
        )
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
