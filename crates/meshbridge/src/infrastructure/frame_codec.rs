//! `tokio_util::codec` adapter for the mesh frame format.
//!
//! Client sessions read their sockets through `FramedRead<_, MeshFrameCodec>`
//! so the per-connection buffering and resynchronisation come from the same
//! [`decode_frame`] routine the serial uplink uses.

use bytes::BytesMut;
use meshbridge_core::{decode_frame, Frame};
use tokio_util::codec::Decoder;
use tracing::debug;

/// Frame codec for one byte stream.
///
/// Bytes that do not belong to a frame are skipped and counted, never
/// reported as errors: a client sending garbage keeps its connection.
#[derive(Debug, Default)]
pub struct MeshFrameCodec {
    discarded: u64,
}

impl MeshFrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Noise bytes skipped on this stream so far.
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded
    }
}

impl Decoder for MeshFrameCodec {
    type Item = Frame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        let step = decode_frame(src);
        self.discarded += step.discarded as u64;
        Ok(step.frame)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        // A truncated frame at end of stream can never complete.
        if !src.is_empty() {
            debug!("dropping {} trailing bytes at end of stream", src.len());
            self.discarded += src.len() as u64;
            src.clear();
        }
        Ok(None)
    }
}
