//! Framing for device byte streams.
//!
//! A device link carries a mix of three framings, recognized per connection:
//! - SLIP frames delimited by `0xC0` with `0xDB` escapes
//! - Length-prefixed frames: optional magic header, 2-byte big-endian length
//! - Newline-delimited text (boot logs, AT responses, console output)
//!
//! [`FrameDecoder`] extracts all three from arbitrarily chunked input,
//! resynchronizes after corruption and reports every discarded byte.

pub mod codec;
pub mod decoder;
pub mod error;
pub mod message;
pub mod slip;
pub mod text;

pub use codec::{
    find_header, hex_preview, wrap_frame, BinaryFraming, HeaderScan, LENGTH_PREFIX_SIZE,
    MAX_PAYLOAD, PREVIEW_BYTES,
};
pub use decoder::{DecodeEvent, DecoderConfig, FrameDecoder};
pub use error::{FrameError, Result};
pub use message::{JsonCodec, MessageCodec, RawCodec, TopicField, TopicKey};
pub use slip::{slip_encode, SlipState, SlipStep};
pub use text::{LineSplitter, TextEncoding};
