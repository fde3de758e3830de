//! Hardware video decoding
//!
//! Packets from the demuxer are decoded on the GPU and surfaced as
//! [`DecodedFrame`]s whose textures stay resident on the render device.

mod decoder;
pub(crate) mod extract;
mod frame;

pub use decoder::{DecodeError, DecoderState, FrameDecode, FrameDecoder, Received};
pub use extract::is_hardware_format;
pub use frame::DecodedFrame;
