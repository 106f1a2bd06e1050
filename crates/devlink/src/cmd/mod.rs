use clap::{ArgGroup, Args, Subcommand};
use std::path::PathBuf;

use devlink_frame::{BinaryFraming, DecoderConfig, TextEncoding};

use crate::exit::{CliError, CliResult};
use crate::output::OutputFormat;

pub mod decode;
pub mod monitor;
pub mod version;
pub mod wrap;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Decode a captured byte stream and print every frame and diagnostic.
    Decode(DecodeArgs),
    /// Wrap a payload in a frame and write it to stdout.
    Wrap(WrapArgs),
    /// Attach to a device on a Unix socket and print traffic until Ctrl-C.
    Monitor(MonitorArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Decode(args) => decode::run(args, format),
        Command::Wrap(args) => wrap::run(args),
        Command::Monitor(args) => monitor::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Framing flags shared by commands that decode.
#[derive(Args, Debug, Clone, Default)]
pub struct FramingArgs {
    /// Recognize SLIP frames.
    #[arg(long)]
    pub slip: bool,
    /// Recognize length-prefixed frames with no header. Requires --no-text.
    #[arg(long, conflicts_with = "no_binary")]
    pub binary: bool,
    /// Magic header in front of length-prefixed frames, as hex (e.g. aa55).
    #[arg(long, value_name = "HEX", conflicts_with = "no_binary")]
    pub header: Option<String>,
    /// Disable length-prefixed framing.
    #[arg(long)]
    pub no_binary: bool,
    /// Disable the newline-delimited text fallback.
    #[arg(long)]
    pub no_text: bool,
    /// Text encoding for lines.
    #[arg(long, value_name = "ENCODING", value_parser = parse_encoding)]
    pub encoding: Option<TextEncoding>,
}

impl FramingArgs {
    /// Apply the flags on top of `base`. Unset flags keep `base` values.
    pub fn apply(&self, mut base: DecoderConfig) -> CliResult<DecoderConfig> {
        if self.slip {
            base.slip = true;
        }
        if self.no_text {
            base.text = false;
        }
        if let Some(encoding) = self.encoding {
            base.text_encoding = encoding;
        }
        if self.no_binary {
            base.binary = None;
        } else if let Some(hex) = &self.header {
            let header = parse_hex(hex)?;
            let framing = base.binary.get_or_insert_with(BinaryFraming::default);
            framing.header = header;
        } else if self.binary {
            base.binary.get_or_insert_with(BinaryFraming::default);
        }
        if base.text_is_unreachable() {
            return Err(CliError::usage(
                "length-prefixed framing without --header claims every byte; add --no-text",
            ));
        }
        Ok(base)
    }
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Capture file to decode. Reads stdin when omitted.
    pub file: Option<PathBuf>,
    #[command(flatten)]
    pub framing: FramingArgs,
    /// Feed the decoder in chunks of this many bytes.
    #[arg(long, value_name = "N", default_value = "4096")]
    pub chunk_size: usize,
    /// Message field used to report topics.
    #[arg(long, value_name = "FIELD", default_value = "type")]
    pub topic_field: String,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("payload").required(true).args(["data", "json", "file"])))]
pub struct WrapArgs {
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// JSON payload, re-encoded compactly.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["data", "json"])]
    pub file: Option<PathBuf>,
    /// Magic header in front of the length prefix, as hex.
    #[arg(long, value_name = "HEX", conflicts_with = "slip")]
    pub header: Option<String>,
    /// Emit a SLIP frame instead of a length-prefixed one.
    #[arg(long)]
    pub slip: bool,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Unix socket the device is bridged on.
    pub socket: PathBuf,
    /// Engine configuration (JSON; durations in milliseconds).
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Message field used for topic routing.
    #[arg(long, value_name = "FIELD")]
    pub topic_field: Option<String>,
    #[command(flatten)]
    pub framing: FramingArgs,
    /// Do not reconnect when the link drops.
    #[arg(long)]
    pub no_reconnect: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse hex such as `aa55`, `AA 55` or `0xAA55`.
pub fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let digits: String = input
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    if digits.is_empty() || digits.len() % 2 != 0 {
        return Err(CliError::usage(format!(
            "invalid hex `{input}`: expected an even number of hex digits"
        )));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| CliError::usage(format!("invalid hex `{input}`")))
        })
        .collect()
}

fn parse_encoding(input: &str) -> Result<TextEncoding, String> {
    input.parse()
}
