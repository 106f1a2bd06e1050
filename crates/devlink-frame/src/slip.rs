//! SLIP byte stuffing.
//!
//! ```text
//! END      0xC0   frame boundary
//! ESC      0xDB   escape introducer
//! ESC_END  0xDC   after ESC: literal 0xC0
//! ESC_ESC  0xDD   after ESC: literal 0xDB
//! ```
//!
//! Any other byte after ESC is a framing error and the frame is discarded.

use bytes::{BufMut, Bytes, BytesMut};

pub const END: u8 = 0xC0;
pub const ESC: u8 = 0xDB;
pub const ESC_END: u8 = 0xDC;
pub const ESC_ESC: u8 = 0xDD;

/// Outcome of pushing one byte into an open SLIP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlipStep {
    /// Byte absorbed, frame still open.
    Pending,
    /// `END` closed a non-empty frame.
    Frame(Bytes),
    /// `ESC` followed by `byte`. The partial frame was dropped.
    Violation { byte: u8, discarded: usize },
    /// The partial frame grew past the size cap and was dropped.
    Overflow { discarded: usize },
}

impl SlipStep {
    /// Whether the pushed byte was used up.
    ///
    /// An `END` that follows a bad escape is left in the input so it can open
    /// the next frame.
    pub fn consumes_input(&self) -> bool {
        !matches!(self, SlipStep::Violation { byte: END, .. })
    }
}

/// Per-connection SLIP receive state.
#[derive(Debug, Default, Clone)]
pub struct SlipState {
    in_frame: bool,
    escape_next: bool,
    partial: BytesMut,
}

impl SlipState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an `END` has opened a frame that has not closed yet.
    pub fn in_frame(&self) -> bool {
        self.in_frame
    }

    /// Bytes accumulated in the open frame.
    pub fn partial(&self) -> &[u8] {
        &self.partial
    }

    /// Open a frame after an `END` seen outside any frame.
    pub fn begin(&mut self) {
        self.in_frame = true;
        self.escape_next = false;
        self.partial.clear();
    }

    /// Drop all state.
    pub fn reset(&mut self) {
        self.in_frame = false;
        self.escape_next = false;
        self.partial.clear();
    }

    /// Feed one byte of an open frame.
    pub fn push(&mut self, byte: u8, max_len: usize) -> SlipStep {
        if self.escape_next {
            self.escape_next = false;
            let literal = match byte {
                ESC_END => END,
                ESC_ESC => ESC,
                other => {
                    // +1 for the ESC already absorbed.
                    let discarded = self.partial.len() + 1;
                    self.reset();
                    return SlipStep::Violation {
                        byte: other,
                        discarded,
                    };
                }
            };
            return self.append(literal, max_len);
        }

        match byte {
            END if self.partial.is_empty() => SlipStep::Pending,
            END => {
                let frame = self.partial.split().freeze();
                self.reset();
                SlipStep::Frame(frame)
            }
            ESC => {
                self.escape_next = true;
                SlipStep::Pending
            }
            other => self.append(other, max_len),
        }
    }

    fn append(&mut self, byte: u8, max_len: usize) -> SlipStep {
        if self.partial.len() >= max_len {
            let discarded = self.partial.len() + 1;
            self.reset();
            return SlipStep::Overflow { discarded };
        }
        self.partial.put_u8(byte);
        SlipStep::Pending
    }
}

/// Encode `payload` as one SLIP frame: `END`, escaped payload, `END`.
pub fn slip_encode(payload: &[u8], dst: &mut BytesMut) {
    dst.reserve(payload.len() + 2);
    dst.put_u8(END);
    for &byte in payload {
        match byte {
            END => dst.put_slice(&[ESC, ESC_END]),
            ESC => dst.put_slice(&[ESC, ESC_ESC]),
            other => dst.put_u8(other),
        }
    }
    dst.put_u8(END);
}
