use std::fs::File;
use std::io::{self, Read};
use std::sync::Arc;

use devlink_frame::{hex_preview, DecoderConfig, FrameDecoder, JsonCodec, PREVIEW_BYTES};
use tracing::warn;

use crate::cmd::DecodeArgs;
use crate::exit::{io_error, CliError, CliResult, SUCCESS};
use crate::output::{emit, OutputFormat, Record};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    if args.chunk_size == 0 {
        return Err(CliError::usage("--chunk-size must be greater than zero"));
    }
    let config = args.framing.apply(DecoderConfig::default())?;
    let mut decoder = FrameDecoder::new(Arc::new(JsonCodec), config);

    let mut input: Box<dyn Read> = match &args.file {
        Some(path) => Box::new(
            File::open(path)
                .map_err(|err| io_error(&format!("failed opening {}", path.display()), err))?,
        ),
        None => Box::new(io::stdin().lock()),
    };

    let mut chunk = vec![0u8; args.chunk_size];
    loop {
        let read = match input.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(io_error("failed reading input", err)),
        };
        for event in decoder.feed(&chunk[..read]) {
            emit(&Record::decoded(&event, &args.topic_field), format);
        }
    }

    let leftover = decoder.buffered();
    if !leftover.is_empty() {
        warn!(
            bytes = leftover.len(),
            preview = %hex_preview(leftover, PREVIEW_BYTES),
            "input ended inside an incomplete frame"
        );
    }

    Ok(SUCCESS)
}
