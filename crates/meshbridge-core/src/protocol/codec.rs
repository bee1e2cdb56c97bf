//! Resumable codec for the marker + length framed byte stream.
//!
//! Wire format:
//! ```text
//! [0x3C][payload_len:2 LE][payload:N]
//! ```
//!
//! # Why a resumable decoder? (for beginners)
//!
//! Neither a serial port nor a TCP socket preserves message boundaries.  A
//! single `read()` may return half a header, three frames and the first byte
//! of a fourth, or anything in between.  The decoder therefore keeps every
//! byte it has not yet turned into a frame and picks up exactly where it left
//! off on the next call.
//!
//! # Resynchronisation
//!
//! There is no checksum.  Bytes that appear before a marker byte are noise:
//! they are dropped and counted, never treated as an error.  A truncated frame
//! is only ever detected by finding the next marker after it.
//!
//! # Memory bound
//!
//! The length field is attacker controlled.  The decoder never reserves room
//! for a payload before those bytes have actually arrived, so the buffer only
//! ever grows by what the transport delivered.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::protocol::frame::{Frame, FRAME_MARKER, HEADER_SIZE};

/// Result of one call to [`decode_frame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeStep {
    /// The next complete frame, or `None` if more bytes are needed.
    pub frame: Option<Frame>,
    /// Number of noise bytes dropped from the front of the buffer while
    /// looking for a marker.
    pub discarded: usize,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a frame into a freshly allocated buffer.
///
/// # Examples
///
/// ```rust
/// use meshbridge_core::{encode_frame, Frame};
///
/// let bytes = encode_frame(&Frame::new(&b"ABC"[..]).unwrap());
/// assert_eq!(&bytes[..], &[0x3C, 0x03, 0x00, 0x41, 0x42, 0x43]);
/// ```
pub fn encode_frame(frame: &Frame) -> Bytes {
    let mut buf = BytesMut::with_capacity(frame.wire_len());
    encode_frame_into(frame, &mut buf);
    buf.freeze()
}

/// Appends the encoded form of `frame` to `dst`.
pub fn encode_frame_into(frame: &Frame, dst: &mut BytesMut) {
    dst.reserve(frame.wire_len());
    dst.put_u8(FRAME_MARKER);
    // `Frame` guarantees the payload fits in a u16.
    dst.put_u16_le(frame.len() as u16);
    dst.extend_from_slice(frame.payload());
}

/// Removes the next complete frame from the front of `buf`.
///
/// Noise before the first marker is discarded.  If the header or payload is
/// incomplete, the bytes from the marker onwards are left in `buf` untouched
/// and `frame` is `None`.
///
/// # Examples
///
/// ```rust
/// use bytes::BytesMut;
/// use meshbridge_core::decode_frame;
///
/// let mut buf = BytesMut::from(&[0xFF, 0x3C, 0x01, 0x00, 0x7A][..]);
/// let step = decode_frame(&mut buf);
/// assert_eq!(step.discarded, 1);
/// assert_eq!(&step.frame.unwrap().payload()[..], b"z");
/// assert!(buf.is_empty());
/// ```
pub fn decode_frame(buf: &mut BytesMut) -> DecodeStep {
    let discarded = skip_to_marker(buf);

    if buf.len() < HEADER_SIZE {
        return DecodeStep {
            frame: None,
            discarded,
        };
    }

    let payload_len = u16::from_le_bytes([buf[1], buf[2]]) as usize;
    if buf.len() < HEADER_SIZE + payload_len {
        return DecodeStep {
            frame: None,
            discarded,
        };
    }

    buf.advance(HEADER_SIZE);
    let payload = buf.split_to(payload_len).freeze();

    DecodeStep {
        frame: Some(Frame::from_wire(payload)),
        discarded,
    }
}

/// Drops every byte before the first marker and returns how many were dropped.
fn skip_to_marker(buf: &mut BytesMut) -> usize {
    match buf.iter().position(|&b| b == FRAME_MARKER) {
        Some(0) => 0,
        Some(offset) => {
            trace!("discarding {offset} noise byte(s) before frame marker");
            buf.advance(offset);
            offset
        }
        None => {
            let dropped = buf.len();
            if dropped > 0 {
                trace!("discarding {dropped} noise byte(s); no frame marker buffered");
            }
            buf.clear();
            dropped
        }
    }
}

// ── Streaming decoder ─────────────────────────────────────────────────────────

/// A per-stream frame decoder.
///
/// Each input stream (the serial line, or one TCP client) owns exactly one
/// `FrameDecoder`.  Its buffer is never shared: mixing bytes from two streams
/// would splice unrelated frames together.
///
/// # Examples
///
/// ```rust
/// use meshbridge_core::FrameDecoder;
///
/// let mut decoder = FrameDecoder::new();
/// assert!(decoder.feed(&[0x3C, 0x03]).is_empty());
/// let frames = decoder.feed(&[0x00, 0x41, 0x42, 0x43]);
/// assert_eq!(frames.len(), 1);
/// assert_eq!(&frames[0].payload()[..], b"ABC");
/// ```
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Bytes received but not yet turned into a frame.
    buffer: BytesMut,
    /// Running total of noise bytes dropped while resynchronising.
    discarded: u64,
}

impl FrameDecoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends newly received bytes and returns every frame they complete,
    /// in arrival order.
    ///
    /// A trailing partial frame stays buffered for the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        loop {
            let step = decode_frame(&mut self.buffer);
            self.discarded += step.discarded as u64;
            match step.frame {
                Some(frame) => frames.push(frame),
                None => break,
            }
        }
        frames
    }

    /// Number of bytes currently waiting for the rest of their frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Total noise bytes discarded since this decoder was created.
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded
    }

    /// Drops any partially received frame.
    ///
    /// Used when the underlying stream is replaced (e.g. the serial device
    /// reconnects) so stale bytes are not glued onto the new stream.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
