use std::fs;

use bytes::BytesMut;
use devlink_frame::{slip_encode, wrap_frame, MAX_PAYLOAD};

use crate::cmd::{parse_hex, WrapArgs};
use crate::exit::{frame_error, io_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::print_raw;

pub fn run(args: WrapArgs) -> CliResult<i32> {
    let payload = resolve_payload(&args)?;
    let mut frame = BytesMut::with_capacity(payload.len() + 8);

    if args.slip {
        if payload.len() > MAX_PAYLOAD {
            return Err(CliError::new(
                DATA_INVALID,
                format!("payload too large ({} bytes, max {MAX_PAYLOAD})", payload.len()),
            ));
        }
        slip_encode(&payload, &mut frame);
    } else {
        let header = match &args.header {
            Some(hex) => parse_hex(hex)?,
            None => Vec::new(),
        };
        wrap_frame(&header, &payload, &mut frame).map_err(|err| frame_error("wrap failed", err))?;
    }

    print_raw(&frame).map_err(|err| io_error("failed writing frame", err))?;
    Ok(SUCCESS)
}

fn resolve_payload(args: &WrapArgs) -> CliResult<Vec<u8>> {
    if let Some(json) = &args.json {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|err| CliError::new(DATA_INVALID, format!("--json is not valid JSON: {err}")))?;
        return serde_json::to_vec(&value)
            .map_err(|err| CliError::new(DATA_INVALID, format!("--json could not be encoded: {err}")));
    }
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Err(CliError::usage("one of --data, --json or --file is required"))
}
