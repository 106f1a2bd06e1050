//! A simulated device on an in-memory link.
//!
//! Feeds a mixed byte stream (garbage, a header-framed JSON message, a
//! boot log line), answers a `ping` from a handler and prints the
//! connection's log ring.
//!
//! Run with:
//!   cargo run --example memory-device

use std::time::Duration;

use devlink::engine::{ConnectionOptions, Engine, EngineConfig, LogLevel};
use devlink::frame::{BinaryFraming, DecoderConfig, JsonCodec};
use devlink::transport::MemoryTransport;
use serde_json::{json, Value};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig {
        decoder: DecoderConfig {
            binary: Some(BinaryFraming::with_header([0xAA, 0x55])),
            ..DecoderConfig::default()
        },
        ..EngineConfig::default()
    };

    let dispatcher = config
        .dispatcher::<Value>()
        .on("ping", |msg: &Value, ctx| {
            eprintln!("[{}] ping {msg}", ctx.uuid());
            ctx.reply(&b"\xAA\x55\x00\x0F{\"type\":\"pong\"}"[..])
        })
        .on("status", |msg: &Value, ctx| {
            ctx.log(LogLevel::Info, format!("battery at {}%", msg["battery"]));
            Ok(())
        })
        .on_text(|line, ctx| {
            eprintln!("[{}] console: {line}", ctx.uuid());
            Ok(())
        })
        .build();

    let engine = Engine::new(config, JsonCodec, dispatcher)?;
    let (device, events) = MemoryTransport::new("bench-unit", 64);
    let uuid = engine
        .attach(device.clone(), events, ConnectionOptions::new().label("bench unit"))
        .await?;

    let mut stream = vec![0x13, 0x37];
    stream.extend_from_slice(&[0xAA, 0x55, 0x00, 0x0F]);
    stream.extend_from_slice(br#"{"type":"ping"}"#);
    stream.extend_from_slice(b"U-Boot 2024.01 ready\r\n");
    // Split mid-frame, as a serial driver would.
    device.deliver(stream[..5].to_vec()).await?;
    device.deliver(stream[5..].to_vec()).await?;

    let mut status = serde_json::to_vec(&json!({"type": "status", "battery": 87}))?;
    let mut framed = vec![0xAA, 0x55];
    framed.extend_from_slice(&u16::try_from(status.len())?.to_be_bytes());
    framed.append(&mut status);
    device.deliver(framed).await?;

    engine.send_text(&uuid, "AT+INFO").await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    eprintln!("health: {:?}", engine.health(&uuid));
    eprintln!("device received {} write(s)", device.sent().len());
    for entry in engine.logs(&uuid).unwrap_or_default() {
        eprintln!("{:<12} {}", entry.level.name(), entry.message);
    }

    engine.shutdown().await;
    Ok(())
}
