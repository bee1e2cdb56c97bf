//! meshbridge library crate.
//!
//! This crate bridges a mesh-radio companion device on a serial port to any
//! number of TCP clients.  Frames read from the radio are broadcast to every
//! client; frames from any client are written to the radio.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Serial device (0x3C-framed byte stream)
//!         ↕
//! [meshbridge]
//!   ├── domain/           Pure types: BridgeConfig, SerialState, BridgeStats
//!   ├── application/      Coordinator: client registry, uplink/downlink pumps
//!   └── infrastructure/
//!         ├── serial_link/ Serial port I/O and reconnect supervisor
//!         ├── frame_codec/ tokio_util codec over meshbridge-core
//!         ├── tcp_server/  Accept loop and per-client sessions
//!         └── runner/      Startup ordering
//!         ↕
//! TCP clients (same framing)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async runtime.
//! - `application` depends on `domain` and `meshbridge-core`, and talks to the
//!   serial device only through the [`application::DeviceLink`] trait.
//! - `infrastructure` depends on all other layers plus `tokio` and
//!   `serialport`.

/// Domain layer: pure business-logic types (no I/O).
pub mod domain;

/// Application layer: frame routing between the device and the clients.
pub mod application;

/// Infrastructure layer: serial port, TCP listener, codec.
pub mod infrastructure;
