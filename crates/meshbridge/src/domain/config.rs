//! Bridge configuration types.
//!
//! [`BridgeConfig`] is the single source of truth for all runtime settings.
//! It is constructed from CLI arguments in `main.rs`, or from sensible
//! defaults in tests.
//!
//! # Design rationale
//!
//! Keeping configuration as a plain struct (no global state, no environment
//! variable reads inside the domain) makes the bridge easy to embed in tests.
//! The binary is responsible for populating the struct from CLI args.

use std::time::Duration;

/// Default serial baud rate for mesh-radio companion firmware.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default TCP port clients connect to.
pub const DEFAULT_TCP_PORT: u16 = 5000;

/// Default number of encoded frames that may wait in one client's outbound
/// queue before the client is considered too slow and evicted.
pub const DEFAULT_CLIENT_QUEUE_DEPTH: usize = 256;

/// All runtime configuration for the serial-to-TCP bridge.
///
/// The device path and baud rate are fixed for the lifetime of one bridge
/// instance: the reconnect loop always reopens the same device.
///
/// # Example
///
/// ```rust
/// use meshbridge::domain::BridgeConfig;
///
/// let cfg = BridgeConfig::default();
/// assert_eq!(cfg.bind_host, "0.0.0.0");
/// assert_eq!(cfg.port, 5000);
/// assert_eq!(cfg.baud_rate, 115_200);
/// ```
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Serial device node, e.g. `/dev/ttyUSB0` or `COM3`.
    pub serial_path: String,

    /// Serial line speed.
    pub baud_rate: u32,

    /// Host the TCP listener binds to: an IP literal or a hostname such as
    /// `localhost`, resolved when the listener is bound.
    ///
    /// `0.0.0.0` accepts connections from any network interface.  Set to
    /// `127.0.0.1` to accept only local connections.
    pub bind_host: String,

    /// TCP port clients connect to.  `0` picks an ephemeral port.
    pub port: u16,

    /// Optional cap on simultaneously connected clients.  `None` means
    /// unlimited.
    pub max_clients: Option<usize>,

    /// Delay schedule for reopening the serial device after it disappears.
    pub reconnect: ReconnectPolicy,

    /// Per-client outbound queue depth, in frames.
    pub client_queue_depth: usize,
}

impl Default for BridgeConfig {
    /// Returns a `BridgeConfig` suitable for local development.
    ///
    /// | Field              | Default          |
    /// |--------------------|------------------|
    /// | serial_path        | `/dev/ttyUSB0`   |
    /// | baud_rate          | 115200           |
    /// | bind_host          | `0.0.0.0`        |
    /// | port               | 5000             |
    /// | max_clients        | unlimited        |
    /// | reconnect          | 1 s doubling to 30 s |
    /// | client_queue_depth | 256              |
    fn default() -> Self {
        Self {
            serial_path: "/dev/ttyUSB0".to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            bind_host: "0.0.0.0".to_string(),
            port: DEFAULT_TCP_PORT,
            max_clients: None,
            reconnect: ReconnectPolicy::default(),
            client_queue_depth: DEFAULT_CLIENT_QUEUE_DEPTH,
        }
    }
}

/// Exponential backoff schedule for serial reconnect attempts.
///
/// The first retry waits `initial_delay`; each failed attempt doubles the
/// delay up to `max_delay`.  Retries continue until shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// Returns the delay to use after an attempt that waited `current`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        current
            .saturating_mul(2)
            .clamp(self.initial_delay, self.max_delay.max(self.initial_delay))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
