//! Serial link state and the events the serial endpoint publishes.

use std::fmt;

use bytes::Bytes;

/// Connection state of the serial device.
///
/// Owned by the serial endpoint; every other component only observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialState {
    /// No device handle is open.  Downlink frames are dropped.
    Disconnected,
    /// An open attempt is in progress.
    Connecting,
    /// The device is open and being read.
    Connected,
}

impl fmt::Display for SerialState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SerialState::Disconnected => "disconnected",
            SerialState::Connecting => "connecting",
            SerialState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Output of the serial read loop, consumed by the uplink pump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialEvent {
    /// The device was opened (at startup or after a reconnect).
    Connected,
    /// A raw chunk of bytes, exactly as the device delivered it.
    Data(Bytes),
    /// The device went away.  Any partially decoded frame is stale.
    Disconnected,
}
