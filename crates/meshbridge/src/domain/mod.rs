//! Domain layer for meshbridge.
//!
//! The domain layer contains plain data types with no dependencies on I/O,
//! networking, or the async runtime.  This makes them easy to test in
//! isolation.
//!
//! # What belongs in the domain layer?
//!
//! - Configuration structures
//! - The serial link state and the events the serial endpoint publishes
//! - Traffic counters
//!
//! # What does NOT belong here?
//!
//! - Any `tokio`, `TcpStream`, or serial port types
//! - Anything that could block or fail due to external state

pub mod config;
pub mod link;
pub mod stats;

pub use config::{BridgeConfig, ReconnectPolicy};
pub use link::{SerialEvent, SerialState};
pub use stats::{BridgeStats, StatsSnapshot};
