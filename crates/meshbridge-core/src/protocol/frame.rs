//! The [`Frame`] type and the constants that describe it on the wire.
//!
//! Wire format:
//! ```text
//! [marker:1 = 0x3C][payload_len:2][payload:N]
//! ```
//! `payload_len` is an unsigned little-endian 16-bit integer.  There is no
//! trailer, no escaping and no checksum.

use bytes::Bytes;
use thiserror::Error;

/// The byte that starts every frame header.
pub const FRAME_MARKER: u8 = 0x3C;

/// Marker byte plus the 2-byte length field.
pub const HEADER_SIZE: usize = 3;

/// Largest payload the 16-bit length field can describe.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Errors that can occur when building a frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The payload does not fit in the 16-bit length field.
    #[error("payload of {len} bytes exceeds the {MAX_PAYLOAD_LEN}-byte frame limit")]
    PayloadTooLarge { len: usize },
}

/// One protocol message exchanged over serial or TCP.
///
/// A `Frame` only carries the payload; the header is rebuilt by
/// [`crate::encode_frame`] whenever the frame is written out.  The payload is
/// opaque to the bridge – it is never parsed or modified.
///
/// A zero-length frame is valid and is forwarded like any other frame.
///
/// # Examples
///
/// ```rust
/// use meshbridge_core::Frame;
///
/// let frame = Frame::new(&b"ABC"[..]).unwrap();
/// assert_eq!(frame.len(), 3);
/// assert_eq!(frame.wire_len(), 6);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Frame {
    /// Raw payload bytes.  `Bytes` is reference counted, so cloning a frame
    /// for every client during a broadcast does not copy the payload.
    payload: Bytes,
}

impl Frame {
    /// Creates a frame from a payload.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::PayloadTooLarge`] if the payload is longer than
    /// [`MAX_PAYLOAD_LEN`] bytes.
    pub fn new(payload: impl Into<Bytes>) -> Result<Self, FrameError> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLarge { len: payload.len() });
        }
        Ok(Self { payload })
    }

    /// Creates a zero-length frame.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Wraps a payload whose length was read from a 16-bit header field.
    pub(crate) fn from_wire(payload: Bytes) -> Self {
        debug_assert!(payload.len() <= MAX_PAYLOAD_LEN);
        Self { payload }
    }

    /// Returns the payload bytes.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consumes the frame and returns the payload.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns `true` for a zero-length frame.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Total number of bytes this frame occupies on the wire (header + payload).
    pub fn wire_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_accepts_max_payload() {
        let frame = Frame::new(vec![0u8; MAX_PAYLOAD_LEN]).unwrap();
        assert_eq!(frame.len(), 65535);
    }

    #[test]
    fn test_new_rejects_oversized_payload() {
        // Arrange: one byte past the 16-bit limit
        let payload = vec![0u8; MAX_PAYLOAD_LEN + 1];

        // Act
        let result = Frame::new(payload);

        // Assert
        assert_eq!(result, Err(FrameError::PayloadTooLarge { len: 65536 }));
    }

    #[test]
    fn test_empty_frame_is_valid() {
        let frame = Frame::empty();
        assert!(frame.is_empty());
        assert_eq!(frame.wire_len(), HEADER_SIZE);
        assert_eq!(frame, Frame::new(Vec::new()).unwrap());
    }

    #[test]
    fn test_clone_shares_payload() {
        let frame = Frame::new(vec![1u8, 2, 3]).unwrap();
        let cloned = frame.clone();
        // Same backing storage: `Bytes` clones are pointer copies.
        assert_eq!(frame.payload().as_ptr(), cloned.payload().as_ptr());
    }

    #[test]
    fn test_into_payload_returns_original_bytes() {
        let frame = Frame::new(&b"mesh"[..]).unwrap();
        assert_eq!(&frame.into_payload()[..], b"mesh");
    }
}
