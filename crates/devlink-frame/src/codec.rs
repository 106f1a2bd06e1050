use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{FrameError, Result};

/// Length prefix: 2-byte big-endian unsigned.
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Largest payload a 2-byte prefix can describe.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// Number of bytes shown in hex previews of discarded or outbound data.
pub const PREVIEW_BYTES: usize = 16;

/// Length-prefixed framing parameters for one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinaryFraming {
    /// Fixed magic bytes in front of every frame. Empty means frames start
    /// directly with the length prefix.
    pub header: Vec<u8>,
    /// Largest declared length accepted. Anything above is treated as a
    /// false header match. Default: 65535.
    pub max_payload: usize,
}

impl Default for BinaryFraming {
    fn default() -> Self {
        Self {
            header: Vec::new(),
            max_payload: MAX_PAYLOAD,
        }
    }
}

impl BinaryFraming {
    /// Framing with a magic header.
    pub fn with_header(header: impl Into<Vec<u8>>) -> Self {
        Self {
            header: header.into(),
            ..Self::default()
        }
    }

    /// Header plus length prefix.
    pub fn overhead(&self) -> usize {
        self.header.len() + LENGTH_PREFIX_SIZE
    }
}

/// Encode a payload into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬──────────────┬─────────────────┐
/// │ Header (N B) │ Length (2B)  │ Payload          │
/// │ optional     │ big-endian   │ (Length bytes)   │
/// └──────────────┴──────────────┴─────────────────┘
/// ```
pub fn wrap_frame(header: &[u8], payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let Ok(len) = u16::try_from(payload.len()) else {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        });
    };
    dst.reserve(header.len() + LENGTH_PREFIX_SIZE + payload.len());
    dst.put_slice(header);
    dst.put_u16(len);
    dst.put_slice(payload);
    Ok(())
}

/// Where the first header occurrence sits in a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderScan {
    /// All header bytes match starting at this offset.
    Found(usize),
    /// The buffer ends in the middle of a possible header starting here.
    Partial(usize),
    /// No position can start a header.
    Absent,
}

/// Slide a window over `buf` looking for `header`.
///
/// An empty header matches at offset 0.
pub fn find_header(buf: &[u8], header: &[u8]) -> HeaderScan {
    if header.is_empty() {
        return HeaderScan::Found(0);
    }
    for start in 0..buf.len() {
        let end = (start + header.len()).min(buf.len());
        let window = &buf[start..end];
        if window == &header[..window.len()] {
            return if window.len() == header.len() {
                HeaderScan::Found(start)
            } else {
                HeaderScan::Partial(start)
            };
        }
    }
    HeaderScan::Absent
}

/// Read the big-endian length that follows a header of `header_len` bytes at
/// the start of `buf`. `None` if the prefix is not fully buffered yet.
pub fn declared_length(buf: &[u8], header_len: usize) -> Option<usize> {
    let prefix = buf.get(header_len..header_len + LENGTH_PREFIX_SIZE)?;
    Some(u16::from_be_bytes([prefix[0], prefix[1]]) as usize)
}

/// Lowercase, space-separated hex of at most `limit` bytes.
pub fn hex_preview(bytes: &[u8], limit: usize) -> String {
    let shown = &bytes[..bytes.len().min(limit)];
    let mut out = String::with_capacity(shown.len() * 3);
    for (i, byte) in shown.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{byte:02x}"));
    }
    if bytes.len() > limit {
        out.push_str(" ..");
    }
    out
}
