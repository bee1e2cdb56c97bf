//! Protocol module containing the frame type and the binary codec.

pub mod codec;
pub mod frame;

pub use codec::{decode_frame, encode_frame, encode_frame_into, DecodeStep, FrameDecoder};
pub use frame::{Frame, FrameError, FRAME_MARKER, HEADER_SIZE, MAX_PAYLOAD_LEN};
