//! Per-connection byte stream decoder.
//!
//! Bytes arrive in chunks of any size. Each [`FrameDecoder::feed`] appends
//! the chunk to the receive buffer and extracts as many items as the buffer
//! allows. For a given byte sequence the emitted items are the same however
//! the sequence was split into chunks.
//!
//! Extraction order on every iteration:
//! 1. An open SLIP frame consumes bytes until it closes or fails.
//! 2. Otherwise the earliest construct in the buffer wins: a SLIP `END`, a
//!    length-prefixed header, or a newline-terminated text line. A newline
//!    only wins if it precedes every header candidate, including a header
//!    prefix still waiting for more bytes.
//! 3. Bytes in front of a SLIP or header candidate with no line in between
//!    are skipped as garbage and reported once.
//! 4. Otherwise wait for more input. The buffer keeps every unconsumed byte.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::codec::{
    declared_length, find_header, hex_preview, BinaryFraming, HeaderScan, LENGTH_PREFIX_SIZE,
    MAX_PAYLOAD, PREVIEW_BYTES,
};
use crate::message::MessageCodec;
use crate::slip::{SlipState, SlipStep, END};
use crate::text::{LineSplitter, TextEncoding};

const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;

/// Which framings a connection speaks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Recognize SLIP frames.
    pub slip: bool,
    /// Recognize length-prefixed frames. `None` disables binary framing.
    ///
    /// With an empty header a frame is assumed at the buffer start, so a
    /// headerless framing cannot share the stream with text.
    pub binary: Option<BinaryFraming>,
    /// Fall back to newline-delimited text.
    pub text: bool,
    /// Encoding for text lines.
    pub text_encoding: TextEncoding,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            slip: false,
            binary: None,
            text: true,
            text_encoding: TextEncoding::Utf8,
        }
    }
}

impl DecoderConfig {
    /// Cap on any single frame, SLIP or length-prefixed.
    pub fn max_frame(&self) -> usize {
        self.binary
            .as_ref()
            .map_or(MAX_PAYLOAD, |framing| framing.max_payload)
    }

    /// Whether a headerless length prefix would swallow every text line.
    pub fn text_is_unreachable(&self) -> bool {
        self.text
            && self
                .binary
                .as_ref()
                .is_some_and(|framing| framing.header.is_empty())
    }
}

/// One item extracted from the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeEvent<M> {
    /// A length-prefixed payload the codec accepted.
    Message(M),
    /// A complete SLIP frame.
    Binary(Bytes),
    /// A trimmed, non-empty text line.
    Text(String),
    /// Garbage removed in front of a frame candidate.
    Skipped { count: usize, preview: String },
    /// Bytes dropped because a frame could not be decoded.
    Rejected { reason: String, dropped: usize },
}

impl<M> DecodeEvent<M> {
    /// Whether this is a diagnostic rather than received data.
    pub fn is_diagnostic(&self) -> bool {
        matches!(self, DecodeEvent::Skipped { .. } | DecodeEvent::Rejected { .. })
    }
}

/// Buffer offsets below which an earlier scan found nothing.
///
/// Bytes only leave from the front and arrive at the back, so a scan that
/// came up empty stays empty for the same bytes and can resume at the mark.
#[derive(Debug, Default, Clone, Copy)]
struct ScanMarks {
    end: usize,
    header: usize,
    newline: usize,
}

impl ScanMarks {
    fn shift(&mut self, consumed: usize) {
        self.end = self.end.saturating_sub(consumed);
        self.header = self.header.saturating_sub(consumed);
        self.newline = self.newline.saturating_sub(consumed);
    }
}

/// First `needle` at or after `*mark`. Moves the mark to the hit, or to the
/// buffer end on a miss.
fn scan_byte(buf: &[u8], needle: u8, mark: &mut usize) -> Option<usize> {
    let from = (*mark).min(buf.len());
    match buf[from..].iter().position(|&b| b == needle) {
        Some(offset) => {
            *mark = from + offset;
            Some(from + offset)
        }
        None => {
            *mark = buf.len();
            None
        }
    }
}

/// Receive-side state machine for one connection.
pub struct FrameDecoder<C: MessageCodec> {
    codec: Arc<C>,
    config: DecoderConfig,
    buf: BytesMut,
    marks: ScanMarks,
    slip: SlipState,
    lines: LineSplitter,
}

impl<C: MessageCodec> FrameDecoder<C> {
    pub fn new(codec: Arc<C>, config: DecoderConfig) -> Self {
        Self {
            codec,
            config,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            marks: ScanMarks::default(),
            slip: SlipState::new(),
            lines: LineSplitter::new(),
        }
    }

    /// Append a raw chunk and extract everything that is complete.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<DecodeEvent<C::Message>> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while self.step(&mut out) {}
        out
    }

    /// Accept text from a transport that delivers text natively.
    pub fn feed_text(&mut self, text: &str) -> Vec<DecodeEvent<C::Message>> {
        self.lines
            .push(text)
            .into_iter()
            .map(DecodeEvent::Text)
            .collect()
    }

    /// Bytes received but not decoded yet.
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    /// Whether a SLIP frame is open.
    pub fn in_slip_frame(&self) -> bool {
        self.slip.in_frame()
    }

    /// Partial text line from [`FrameDecoder::feed_text`].
    pub fn text_leftover(&self) -> &str {
        self.lines.leftover()
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Forget all buffered and in-progress state. Only for a fresh link.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.marks = ScanMarks::default();
        self.slip.reset();
        self.lines.reset();
    }

    /// One extraction attempt. Returns false when more input is needed.
    fn step(&mut self, out: &mut Vec<DecodeEvent<C::Message>>) -> bool {
        if self.buf.is_empty() {
            return false;
        }
        if self.slip.in_frame() {
            return self.step_slip(out);
        }

        let slip_at = if self.config.slip {
            scan_byte(&self.buf, END, &mut self.marks.end)
        } else {
            None
        };
        let (header_at, header_pending) = match &self.config.binary {
            Some(framing) => {
                let from = self.marks.header.min(self.buf.len());
                match find_header(&self.buf[from..], &framing.header) {
                    HeaderScan::Found(offset) => {
                        self.marks.header = from + offset;
                        (Some(from + offset), None)
                    }
                    HeaderScan::Partial(offset) => {
                        self.marks.header = from + offset;
                        (None, Some(from + offset))
                    }
                    HeaderScan::Absent => {
                        self.marks.header = self.buf.len();
                        (None, None)
                    }
                }
            }
            None => (None, None),
        };
        let frame_at = match (slip_at, header_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        if self.config.text {
            if let Some(newline) = scan_byte(&self.buf, b'\n', &mut self.marks.newline) {
                let before_frame = frame_at.is_none_or(|at| newline < at);
                let before_pending = header_pending.is_none_or(|at| newline < at);
                if before_frame && before_pending {
                    self.take_line(newline, out);
                    return true;
                }
            }
        }

        match frame_at {
            None => false,
            Some(at) if at > 0 => {
                let garbage = self.consume(at);
                trace!(count = garbage.len(), "skipping bytes before frame candidate");
                out.push(DecodeEvent::Skipped {
                    count: garbage.len(),
                    preview: hex_preview(&garbage, PREVIEW_BYTES),
                });
                true
            }
            Some(_) if slip_at == Some(0) => {
                self.consume(1);
                self.slip.begin();
                true
            }
            Some(_) => self.step_binary(out),
        }
    }

    /// Remove `n` bytes from the buffer front.
    fn consume(&mut self, n: usize) -> BytesMut {
        self.marks.shift(n);
        self.buf.split_to(n)
    }

    fn take_line(&mut self, newline: usize, out: &mut Vec<DecodeEvent<C::Message>>) {
        let line = self.consume(newline + 1);
        let text = self.config.text_encoding.decode(&line[..newline]);
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            out.push(DecodeEvent::Text(trimmed.to_string()));
        }
    }

    fn step_slip(&mut self, out: &mut Vec<DecodeEvent<C::Message>>) -> bool {
        let max = self.config.max_frame();
        while let Some(&byte) = self.buf.first() {
            let step = self.slip.push(byte, max);
            if step.consumes_input() {
                self.consume(1);
            }
            match step {
                SlipStep::Pending => continue,
                SlipStep::Frame(frame) => out.push(DecodeEvent::Binary(frame)),
                SlipStep::Violation { byte, discarded } => out.push(DecodeEvent::Rejected {
                    reason: format!("invalid SLIP escape 0x{byte:02x}"),
                    dropped: discarded,
                }),
                SlipStep::Overflow { discarded } => out.push(DecodeEvent::Rejected {
                    reason: format!("SLIP frame exceeds {max} bytes"),
                    dropped: discarded,
                }),
            }
            return true;
        }
        // Whole buffer absorbed into the open frame.
        true
    }

    /// Decode a length-prefixed frame sitting at the buffer start.
    fn step_binary(&mut self, out: &mut Vec<DecodeEvent<C::Message>>) -> bool {
        let Some((header_len, max)) = self
            .config
            .binary
            .as_ref()
            .map(|framing| (framing.header.len(), framing.max_payload))
        else {
            return false;
        };
        let Some(len) = declared_length(&self.buf, header_len) else {
            return false;
        };
        if len > max {
            self.reject_one(format!("declared length {len} exceeds max {max}"), out);
            return true;
        }

        let start = header_len + LENGTH_PREFIX_SIZE;
        let total = start + len;
        if self.buf.len() < total {
            return false;
        }

        match self.codec.decode(&self.buf[start..total]) {
            Ok(message) => {
                self.consume(total);
                out.push(DecodeEvent::Message(message));
            }
            Err(err) => self.reject_one(err.to_string(), out),
        }
        true
    }

    /// Drop exactly one byte so the next scan starts past a false header.
    fn reject_one(&mut self, reason: String, out: &mut Vec<DecodeEvent<C::Message>>) {
        trace!(%reason, buffered = self.buf.len(), "dropping one byte to resync");
        self.consume(1);
        out.push(DecodeEvent::Rejected { reason, dropped: 1 });
    }
}

impl<C: MessageCodec> std::fmt::Debug for FrameDecoder<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDecoder")
            .field("config", &self.config)
            .field("buffered", &self.buf.len())
            .field("in_slip_frame", &self.slip.in_frame())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use bytes::BufMut;
    use serde_json::json;

    use super::*;
    use crate::codec::wrap_frame;
    use crate::message::{JsonCodec, RawCodec};
    use crate::slip::slip_encode;

    const HEADER: [u8; 2] = [0xAA, 0x55];

    fn raw_decoder(config: DecoderConfig) -> FrameDecoder<RawCodec> {
        FrameDecoder::new(Arc::new(RawCodec), config)
    }

    fn header_config() -> DecoderConfig {
        DecoderConfig {
            binary: Some(BinaryFraming::with_header(HEADER)),
            ..DecoderConfig::default()
        }
    }

    fn framed(payload: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        wrap_frame(&HEADER, payload, &mut buf).unwrap();
        buf.to_vec()
    }

    fn data_events<M>(events: Vec<DecodeEvent<M>>) -> Vec<DecodeEvent<M>> {
        events.into_iter().filter(|e| !e.is_diagnostic()).collect()
    }

    #[test]
    fn garbage_before_header_is_skipped_once() {
        let mut decoder = raw_decoder(header_config());
        let mut input = vec![0x11; 10];
        input.extend(framed(&[1, 2, 3]));

        let events = decoder.feed(&input);

        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            DecodeEvent::Skipped { count: 10, preview } if preview.starts_with("11 11")
        ));
        assert_eq!(
            events[1],
            DecodeEvent::Message(Bytes::from_static(&[1, 2, 3]))
        );
        assert!(decoder.buffered().is_empty());
    }

    #[test]
    fn slip_frame_with_escape() {
        let mut decoder = raw_decoder(DecoderConfig {
            slip: true,
            binary: None,
            ..DecoderConfig::default()
        });
        let events = decoder.feed(&[0xC0, 0x61, 0x62, 0xDB, 0xDC, 0x63, 0xC0]);
        assert_eq!(
            events,
            vec![DecodeEvent::Binary(Bytes::from_static(&[0x61, 0x62, 0xC0, 0x63]))]
        );
        assert!(decoder.buffered().is_empty());
        assert!(!decoder.in_slip_frame());
    }

    #[test]
    fn slip_bytes_are_never_read_as_text() {
        let mut decoder = raw_decoder(DecoderConfig {
            slip: true,
            binary: None,
            ..DecoderConfig::default()
        });
        let mut events = decoder.feed(&[0xC0, b'h', b'i', b'\n']);
        assert!(events.is_empty());
        assert!(decoder.in_slip_frame());

        events = decoder.feed(&[b'!', 0xC0]);
        assert_eq!(
            events,
            vec![DecodeEvent::Binary(Bytes::from_static(b"hi\n!"))]
        );
    }

    #[test]
    fn slip_violation_drops_frame_and_resyncs() {
        let mut decoder = raw_decoder(DecoderConfig {
            slip: true,
            binary: None,
            text: false,
            ..DecoderConfig::default()
        });
        let events = decoder.feed(&[0xC0, 0x01, 0xDB, 0x41, 0xC0, 0x02, 0xC0]);
        assert_eq!(
            events,
            vec![
                DecodeEvent::Rejected {
                    reason: "invalid SLIP escape 0x41".to_string(),
                    dropped: 2,
                },
                DecodeEvent::Binary(Bytes::from_static(&[0x02])),
            ]
        );
    }

    #[test]
    fn slip_violation_on_end_opens_next_frame() {
        let mut decoder = raw_decoder(DecoderConfig {
            slip: true,
            binary: None,
            text: false,
            ..DecoderConfig::default()
        });
        let events = decoder.feed(&[0xC0, 0x01, 0xDB, 0xC0, 0x07, 0xC0]);
        assert_eq!(
            data_events(events),
            vec![DecodeEvent::Binary(Bytes::from_static(&[0x07]))]
        );
    }

    #[test]
    fn text_lines_are_trimmed_and_empty_lines_dropped() {
        let mut decoder = raw_decoder(DecoderConfig {
            binary: None,
            ..DecoderConfig::default()
        });
        let events = decoder.feed(b"  hello \r\n\r\n\nworld\npart");
        assert_eq!(
            events,
            vec![
                DecodeEvent::Text("hello".to_string()),
                DecodeEvent::Text("world".to_string()),
            ]
        );
        assert_eq!(decoder.buffered(), b"part");
    }

    #[test]
    fn text_before_header_is_emitted_first() {
        let mut decoder = raw_decoder(header_config());
        let mut input = b"boot ok\n".to_vec();
        input.extend(framed(b"xyz"));
        let events = decoder.feed(&input);
        assert_eq!(
            events,
            vec![
                DecodeEvent::Text("boot ok".to_string()),
                DecodeEvent::Message(Bytes::from_static(b"xyz")),
            ]
        );
    }

    #[test]
    fn newline_inside_binary_payload_is_not_text() {
        let mut decoder = raw_decoder(header_config());
        let wire = framed(b"a\nb");
        let first = decoder.feed(&wire[..4]);
        assert!(first.is_empty());
        let rest = decoder.feed(&wire[4..]);
        assert_eq!(rest, vec![DecodeEvent::Message(Bytes::from_static(b"a\nb"))]);
    }

    #[test]
    fn partial_header_holds_back_text() {
        // Header starting with '\n' must not be mistaken for a line end.
        let header = [b'\n', 0x7E];
        let mut decoder = raw_decoder(DecoderConfig {
            binary: Some(BinaryFraming::with_header(header)),
            ..DecoderConfig::default()
        });
        assert!(decoder.feed(b"abc\n").is_empty());

        let events = decoder.feed(&[0x7E, 0x00, 0x01, 0x09]);
        assert_eq!(
            events,
            vec![
                DecodeEvent::Skipped {
                    count: 3,
                    preview: "61 62 63".to_string(),
                },
                DecodeEvent::Message(Bytes::from_static(&[0x09])),
            ]
        );
    }

    #[test]
    fn waits_for_missing_header_without_error() {
        let mut decoder = raw_decoder(DecoderConfig {
            text: false,
            ..header_config()
        });
        assert!(decoder.feed(&[0x01, 0x02, 0xAA]).is_empty());
        assert_eq!(decoder.buffered(), &[0x01, 0x02, 0xAA]);
    }

    #[test]
    fn incomplete_payload_waits() {
        let mut decoder = raw_decoder(header_config());
        let wire = framed(&[9, 9, 9, 9]);
        assert!(decoder.feed(&wire[..wire.len() - 1]).is_empty());
        assert_eq!(decoder.buffered().len(), wire.len() - 1);
        assert_eq!(
            decoder.feed(&wire[wire.len() - 1..]),
            vec![DecodeEvent::Message(Bytes::from_static(&[9, 9, 9, 9]))]
        );
    }

    #[test]
    fn decode_failure_drops_one_byte_and_recovers() {
        let mut decoder = FrameDecoder::new(
            Arc::new(JsonCodec),
            DecoderConfig {
                text: false,
                ..header_config()
            },
        );
        let mut input = framed(b"not json");
        input.extend(framed(br#"{"type":"ok"}"#));

        let events = decoder.feed(&input);
        let rejected: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, DecodeEvent::Rejected { dropped: 1, .. }))
            .collect();
        assert_eq!(rejected.len(), 1);
        assert_eq!(
            data_events(events),
            vec![DecodeEvent::Message(json!({"type": "ok"}))]
        );
        assert!(decoder.buffered().is_empty());
    }

    #[test]
    fn oversized_declared_length_is_rejected() {
        let mut decoder = raw_decoder(DecoderConfig {
            binary: Some(BinaryFraming {
                header: HEADER.to_vec(),
                max_payload: 4,
            }),
            text: false,
            ..DecoderConfig::default()
        });
        let mut input = vec![0xAA, 0x55, 0x00, 0x05, 1, 2, 3, 4, 5];
        input.extend(framed(&[7]));
        let events = decoder.feed(&input);
        assert!(matches!(events[0], DecodeEvent::Rejected { dropped: 1, .. }));
        assert_eq!(
            data_events(events),
            vec![DecodeEvent::Message(Bytes::from_static(&[7]))]
        );
    }

    #[test]
    fn default_config_emits_text_lines() {
        let mut decoder = raw_decoder(DecoderConfig::default());
        assert!(!decoder.config().text_is_unreachable());
        assert_eq!(
            decoder.feed(b"ok\n"),
            vec![DecodeEvent::Text("ok".to_string())]
        );
        assert!(decoder.buffered().is_empty());

        let mut json = FrameDecoder::new(Arc::new(JsonCodec), DecoderConfig::default());
        assert_eq!(
            json.feed(b"hello world\n"),
            vec![DecodeEvent::Text("hello world".to_string())]
        );
    }

    #[test]
    fn headerless_framing_with_text_is_flagged() {
        let config = DecoderConfig {
            binary: Some(BinaryFraming::default()),
            ..DecoderConfig::default()
        };
        assert!(config.text_is_unreachable());
        assert!(!DecoderConfig { text: false, ..config }.text_is_unreachable());
        assert!(!header_config().text_is_unreachable());
    }

    #[test]
    fn headerless_length_prefix() {
        let mut decoder = raw_decoder(DecoderConfig {
            binary: Some(BinaryFraming::default()),
            text: false,
            ..DecoderConfig::default()
        });
        let mut wire = BytesMut::new();
        wrap_frame(&[], b"one", &mut wire).unwrap();
        wrap_frame(&[], b"", &mut wire).unwrap();
        wrap_frame(&[], b"three", &mut wire).unwrap();
        let events = decoder.feed(&wire);
        assert_eq!(
            events,
            vec![
                DecodeEvent::Message(Bytes::from_static(b"one")),
                DecodeEvent::Message(Bytes::new()),
                DecodeEvent::Message(Bytes::from_static(b"three")),
            ]
        );
    }

    #[test]
    fn length_prefixed_round_trip_boundaries() {
        for len in [0usize, 1, 255, 256, 4096, MAX_PAYLOAD] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let mut decoder = raw_decoder(DecoderConfig {
                text: false,
                ..header_config()
            });
            let events = decoder.feed(&framed(&payload));
            assert_eq!(events, vec![DecodeEvent::Message(Bytes::from(payload))]);
            assert!(decoder.buffered().is_empty());
        }
    }

    #[test]
    fn chunking_does_not_change_output() {
        let config = DecoderConfig {
            slip: true,
            ..header_config()
        };
        let mut stream = Vec::new();
        stream.extend_from_slice(b"rst:0x1 (POWERON)\r\n");
        stream.extend_from_slice(&[0x13, 0x37]);
        stream.extend(framed(b"\xC0\n\xDB"));
        let mut slip = BytesMut::new();
        slip_encode(&[0xC0, 0x01, b'\n', 0xDB], &mut slip);
        stream.extend_from_slice(&slip);
        stream.extend_from_slice(b"ready\n");
        stream.extend_from_slice(&[0xC0, 0x05, 0xDB, 0x00, 0xC0]);
        stream.extend(framed(&[]));
        stream.put_slice(b"tail");

        let mut whole = raw_decoder(config.clone());
        let expected = whole.feed(&stream);
        assert!(expected.len() >= 6);

        for chunk_size in 1..=stream.len() {
            let mut decoder = raw_decoder(config.clone());
            let mut actual = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                actual.extend(decoder.feed(chunk));
            }
            assert_eq!(actual, expected, "chunk size {chunk_size}");
            assert_eq!(decoder.buffered(), whole.buffered());
        }
    }

    #[test]
    fn irregular_chunking_does_not_change_output() {
        let config = header_config();
        let mut stream = vec![0x01, 0x02, 0x03];
        stream.extend(framed(b"alpha"));
        stream.extend_from_slice(b"log line\n");
        stream.extend(framed(b"beta"));

        let expected = raw_decoder(config.clone()).feed(&stream);

        let total = stream.len();
        let cuts = [1usize, 3, 4, 9, 10, 11, 20, total];
        let mut decoder = raw_decoder(config);
        let mut actual = Vec::new();
        let mut start = 0;
        for cut in cuts {
            let cut = cut.min(total);
            if cut > start {
                actual.extend(decoder.feed(&stream[start..cut]));
                start = cut;
            }
        }
        assert_eq!(actual, expected);
    }

    #[test]
    fn large_text_burst_is_fully_split() {
        let mut decoder = raw_decoder(DecoderConfig {
            slip: true,
            ..header_config()
        });
        let mut burst = Vec::new();
        for i in 0..20_000 {
            burst.extend_from_slice(format!("line {i}\n").as_bytes());
        }
        burst.extend_from_slice(b"tail");

        let events = decoder.feed(&burst);
        assert_eq!(events.len(), 20_000);
        assert_eq!(events[19_999], DecodeEvent::Text("line 19999".to_string()));
        assert_eq!(decoder.buffered(), b"tail");
    }

    #[test]
    fn pending_frame_filled_byte_by_byte() {
        let mut decoder = raw_decoder(DecoderConfig {
            slip: true,
            ..header_config()
        });
        let payload = vec![b'\n'; 4096];
        let wire = framed(&payload);
        let mut events = Vec::new();
        for byte in &wire {
            events.extend(decoder.feed(std::slice::from_ref(byte)));
        }
        assert_eq!(events, vec![DecodeEvent::Message(Bytes::from(payload))]);
        assert!(decoder.buffered().is_empty());
    }

    #[test]
    fn feed_text_uses_leftover() {
        let mut decoder = raw_decoder(DecoderConfig::default());
        assert!(decoder.feed_text("{\"a\":").is_empty());
        assert_eq!(decoder.text_leftover(), "{\"a\":");
        assert_eq!(
            decoder.feed_text("1}\n"),
            vec![DecodeEvent::Text("{\"a\":1}".to_string())]
        );
    }

    #[test]
    fn latin1_lines() {
        let mut decoder = raw_decoder(DecoderConfig {
            binary: None,
            text_encoding: TextEncoding::Latin1,
            ..DecoderConfig::default()
        });
        let events = decoder.feed(&[b'T', 0xE9, b'\n']);
        assert_eq!(events, vec![DecodeEvent::Text("T\u{e9}".to_string())]);
    }

    #[test]
    fn reset_clears_partial_state() {
        let mut decoder = raw_decoder(DecoderConfig {
            slip: true,
            ..header_config()
        });
        decoder.feed(&[0xC0, 0x01]);
        decoder.feed_text("half");
        assert!(decoder.in_slip_frame());

        decoder.reset();
        assert!(!decoder.in_slip_frame());
        assert!(decoder.buffered().is_empty());
        assert_eq!(decoder.text_leftover(), "");
    }

    mod chunking {
        use proptest::collection::vec;
        use proptest::prelude::*;

        use super::*;

        #[derive(Debug, Clone)]
        enum Piece {
            Slip(Vec<u8>),
            Framed(Vec<u8>),
            Line(String),
            Noise(Vec<u8>),
        }

        fn piece() -> impl Strategy<Value = Piece> {
            prop_oneof![
                vec(any::<u8>(), 0..24).prop_map(Piece::Slip),
                vec(any::<u8>(), 0..24).prop_map(Piece::Framed),
                "[a-z0-9 ]{0,16}".prop_map(Piece::Line),
                vec(any::<u8>(), 1..8).prop_map(Piece::Noise),
            ]
        }

        fn render(pieces: &[Piece]) -> Vec<u8> {
            let mut stream = BytesMut::new();
            for piece in pieces {
                match piece {
                    Piece::Slip(payload) => slip_encode(payload, &mut stream),
                    Piece::Framed(payload) => stream.extend_from_slice(&framed(payload)),
                    Piece::Line(line) => {
                        stream.extend_from_slice(line.as_bytes());
                        stream.extend_from_slice(b"\r\n");
                    }
                    Piece::Noise(bytes) => stream.extend_from_slice(bytes),
                }
            }
            stream.to_vec()
        }

        fn all_framings() -> DecoderConfig {
            DecoderConfig {
                slip: true,
                ..header_config()
            }
        }

        proptest! {
            #[test]
            fn any_split_matches_single_feed(
                pieces in vec(piece(), 0..12),
                sizes in vec(1usize..16, 1..8),
            ) {
                let stream = render(&pieces);
                let mut whole = raw_decoder(all_framings());
                let expected = whole.feed(&stream);

                let mut decoder = raw_decoder(all_framings());
                let mut actual = Vec::new();
                let mut start = 0;
                for size in sizes.iter().cycle() {
                    if start >= stream.len() {
                        break;
                    }
                    let end = (start + size).min(stream.len());
                    actual.extend(decoder.feed(&stream[start..end]));
                    start = end;
                }

                prop_assert_eq!(actual, expected);
                prop_assert_eq!(decoder.buffered(), whole.buffered());
                prop_assert_eq!(decoder.in_slip_frame(), whole.in_slip_frame());
            }
        }
    }
}
