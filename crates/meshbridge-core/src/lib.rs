//! # meshbridge-core
//!
//! Shared library for MeshBridge containing the frame model and the
//! resumable frame codec for the mesh-radio serial protocol.
//!
//! This crate has zero dependencies on OS APIs, async runtimes, or network
//! sockets.  Everything here is a pure function of the bytes it is given,
//! which is what lets the bridge binary reuse the exact same codec for the
//! serial line and for every TCP client.
//!
//! # Architecture overview (for beginners)
//!
//! A mesh-radio node attached over USB speaks a very small framing protocol:
//! every message is a marker byte (`0x3C`), a 2-byte little-endian length and
//! then the payload.  The bridge never looks *inside* the payload; it only
//! needs to know where one message ends and the next begins so that it can
//! hand whole messages to many TCP clients at once.
//!
//! - **`protocol::frame`** – the [`Frame`] type and the wire constants.
//! - **`protocol::codec`** – [`FrameDecoder`], a state machine that turns an
//!   arbitrarily chunked byte stream into frames, and [`encode_frame`], which
//!   does the reverse.

pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `meshbridge_core::Frame` instead of `meshbridge_core::protocol::frame::Frame`.
pub use protocol::codec::{decode_frame, encode_frame, encode_frame_into, DecodeStep, FrameDecoder};
pub use protocol::frame::{Frame, FrameError, FRAME_MARKER, HEADER_SIZE, MAX_PAYLOAD_LEN};
