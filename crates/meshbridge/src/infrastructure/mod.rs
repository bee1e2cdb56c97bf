//! Infrastructure layer for meshbridge.
//!
//! This layer contains all I/O code: the serial port, the TCP listener and
//! the tokio codec that frames client sockets.
//!
//! # Modules
//!
//! - [`serial_link`]: opens, reads, writes and reopens the serial device.
//! - [`frame_codec`]: `tokio_util` codec for the mesh frame format.
//! - [`tcp_server`]: accept loop and per-client sessions.
//! - [`runner`]: starts everything in the right order.

pub mod frame_codec;
pub mod runner;
pub mod serial_link;
pub mod tcp_server;

pub use frame_codec::MeshFrameCodec;
pub use runner::{start_bridge, RunningBridge};
pub use serial_link::{
    OpenedSerial, SerialError, SerialLink, SerialOpener, SerialPortOpener, SerialStreams,
};
pub use tcp_server::{bind_listener, serve};
