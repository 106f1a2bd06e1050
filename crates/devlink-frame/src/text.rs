use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Character encoding used for line-oriented traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextEncoding {
    /// UTF-8; invalid sequences become U+FFFD.
    #[default]
    Utf8,
    /// ISO-8859-1, one byte per char. Common on bootloader consoles.
    Latin1,
}

impl TextEncoding {
    pub fn name(self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf8",
            TextEncoding::Latin1 => "latin1",
        }
    }

    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            TextEncoding::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
        }
    }

    /// Encode text for the wire. Latin-1 maps unrepresentable chars to `?`.
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            TextEncoding::Utf8 => text.as_bytes().to_vec(),
            TextEncoding::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
        }
    }
}

impl FromStr for TextEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(TextEncoding::Utf8),
            "latin1" | "latin-1" | "iso-8859-1" => Ok(TextEncoding::Latin1),
            other => Err(format!("unknown text encoding: {other}")),
        }
    }
}

/// Splits text that arrives in arbitrary pieces into trimmed lines.
///
/// The unterminated tail is kept until the next push.
#[derive(Debug, Default, Clone)]
pub struct LineSplitter {
    leftover: String,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `text` and return every completed, non-empty, trimmed line.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.leftover.push_str(text);
        let mut lines = Vec::new();
        while let Some(pos) = self.leftover.find('\n') {
            let line: String = self.leftover.drain(..=pos).collect();
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                lines.push(trimmed.to_string());
            }
        }
        lines
    }

    /// The partial line waiting for its terminator.
    pub fn leftover(&self) -> &str {
        &self.leftover
    }

    pub fn reset(&mut self) {
        self.leftover.clear();
    }
}
