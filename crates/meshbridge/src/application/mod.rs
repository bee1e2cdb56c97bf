//! Application layer for meshbridge.
//!
//! The application layer orchestrates the business logic: it knows *what* to
//! do, but delegates *how* to do it to the infrastructure layer.
//!
//! # Responsibilities
//!
//! - Tracking connected clients and fanning uplink frames out to them
//! - Serialising every client's downlink frames onto the one serial device
//! - Dropping downlink traffic while the device is unavailable
//!
//! # What does NOT belong here?
//!
//! - Opening sockets or serial ports (that is infrastructure)
//! - Reading raw bytes from a `TcpStream` (the session task does that)

pub mod bridge_service;
pub mod client_registry;

pub use bridge_service::{BridgeError, BridgeService, BridgeTasks, DeviceLink};
pub use client_registry::{
    BroadcastOutcome, ClientHandle, ClientId, ClientOutbound, ClientRegistry, RegistryError,
};
