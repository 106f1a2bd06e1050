//! End-to-end behaviour of the engine over in-memory transports.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use devlink_engine::{
    ConnectionEvent, ConnectionOptions, DispatchContext, Engine, EngineConfig, EngineError,
    Health, LivenessConfig, LogLevel,
};
use devlink_frame::{wrap_frame, BinaryFraming, DecoderConfig, JsonCodec};
use devlink_transport::{
    event_channel, MemoryTransport, Transport, TransportError, TransportKind,
};
use parking_lot::Mutex;
use serde_json::{json, Value};

const HEADER: [u8; 2] = [0xAA, 0x55];

fn framed(value: &Value) -> Vec<u8> {
    let payload = serde_json::to_vec(value).unwrap();
    let mut out = BytesMut::new();
    wrap_frame(&HEADER, &payload, &mut out).unwrap();
    out.to_vec()
}

fn config() -> EngineConfig {
    EngineConfig {
        decoder: DecoderConfig {
            binary: Some(BinaryFraming::with_header(HEADER)),
            ..DecoderConfig::default()
        },
        ..EngineConfig::default()
    }
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

fn has_log(engine: &Engine<JsonCodec>, uuid: &str, level: LogLevel, needle: &str) -> bool {
    engine
        .logs(uuid)
        .unwrap_or_default()
        .iter()
        .any(|entry| entry.level == level && entry.message.contains(needle))
}

type Seen = Arc<Mutex<Vec<(String, i64)>>>;

fn recording_engine(config: EngineConfig) -> (Engine<JsonCodec>, Seen, Arc<Mutex<Vec<String>>>) {
    let seen: Seen = Arc::default();
    let lines: Arc<Mutex<Vec<String>>> = Arc::default();
    let dispatcher = {
        let seen = seen.clone();
        let lines = lines.clone();
        config
            .dispatcher()
            .on("status", move |msg: &Value, ctx: &DispatchContext| {
                let v = msg["v"].as_i64().ok_or("missing v")?;
                seen.lock().push((ctx.uuid().to_string(), v));
                Ok(())
            })
            .on("boom", |_: &Value, _: &DispatchContext| panic!("handler blew up"))
            .on("ping", |_: &Value, ctx: &DispatchContext| ctx.reply(Bytes::from_static(b"pong")))
            .on_text(move |line: &str, _: &DispatchContext| {
                lines.lock().push(line.to_string());
                Ok(())
            })
            .build()
    };
    let engine = Engine::new(config, JsonCodec, dispatcher).unwrap();
    (engine, seen, lines)
}

#[tokio::test]
async fn mixed_stream_is_dispatched_in_order() {
    let (engine, seen, lines) = recording_engine(config());
    let (transport, events) = MemoryTransport::new("board", 64);
    let uuid = engine
        .attach(transport.clone(), events, ConnectionOptions::new().uuid("board"))
        .await
        .unwrap();
    assert_eq!(uuid, "board");

    let mut stream = vec![0x01, 0x02, 0x03];
    stream.extend(framed(&json!({"type": "status", "v": 1})));
    stream.extend_from_slice(b"boot ok\r\n");
    stream.extend(framed(&json!({"type": "status", "v": 2})));
    let (first, second) = stream.split_at(7);
    transport.deliver(first.to_vec()).await.unwrap();
    transport.deliver(second.to_vec()).await.unwrap();

    eventually("two status messages", || seen.lock().len() == 2).await;
    assert_eq!(
        *seen.lock(),
        vec![("board".to_string(), 1), ("board".to_string(), 2)]
    );
    assert_eq!(*lines.lock(), vec!["boot ok".to_string()]);
    assert!(has_log(&engine, &uuid, LogLevel::Warning, "skipped 3 byte(s)"));
    assert!(has_log(&engine, &uuid, LogLevel::Info, "boot ok"));
    assert_eq!(engine.health(&uuid), Some(Health::Connected));
}

#[tokio::test]
async fn handler_failure_is_isolated_per_connection() {
    let (engine, seen, _) = recording_engine(config());
    let (a, events_a) = MemoryTransport::new("a", 64);
    let (b, events_b) = MemoryTransport::new("b", 64);
    let ua = engine.attach(a.clone(), events_a, ConnectionOptions::new()).await.unwrap();
    let ub = engine.attach(b.clone(), events_b, ConnectionOptions::new()).await.unwrap();

    let mut burst = framed(&json!({"type": "boom"}));
    burst.extend(framed(&json!({"type": "status"})));
    burst.extend(framed(&json!({"type": "status", "v": 7})));
    a.deliver(burst).await.unwrap();
    b.deliver(framed(&json!({"type": "status", "v": 9}))).await.unwrap();

    eventually("both connections dispatched", || seen.lock().len() == 2).await;
    let seen = seen.lock().clone();
    assert!(seen.contains(&(ua.clone(), 7)));
    assert!(seen.contains(&(ub.clone(), 9)));

    assert!(has_log(&engine, &ua, LogLevel::Error, "handler blew up"));
    assert!(has_log(&engine, &ua, LogLevel::Error, "missing v"));
    assert!(!has_log(&engine, &ub, LogLevel::Error, ""));
    assert_eq!(engine.health(&ua), Some(Health::Connected));
    assert_eq!(engine.health(&ub), Some(Health::Connected));
}

#[tokio::test]
async fn unknown_topic_logs_warning() {
    let (engine, _, _) = recording_engine(config());
    let (transport, events) = MemoryTransport::new("dev", 64);
    let uuid = engine.attach(transport.clone(), events, ConnectionOptions::new()).await.unwrap();

    transport.deliver(framed(&json!({"type": "telemetry"}))).await.unwrap();
    eventually("unknown topic warning", || {
        has_log(&engine, &uuid, LogLevel::Warning, "telemetry")
    })
    .await;
}

#[tokio::test]
async fn handler_reply_is_written() {
    let (engine, _, _) = recording_engine(config());
    let (transport, events) = MemoryTransport::new("dev", 64);
    let uuid = engine.attach(transport.clone(), events, ConnectionOptions::new()).await.unwrap();

    transport.deliver(framed(&json!({"type": "ping"}))).await.unwrap();
    eventually("reply on the wire", || !transport.sent().is_empty()).await;
    assert_eq!(transport.sent(), vec![Bytes::from_static(b"pong")]);
    eventually("reply logged", || {
        has_log(&engine, &uuid, LogLevel::OutboundRaw, "reply 4 byte(s)")
    })
    .await;
}

#[tokio::test]
async fn replies_go_out_before_next_event() {
    let config = config();
    let (transport, events) = MemoryTransport::new("dev", 64);
    let observed: Arc<Mutex<Vec<usize>>> = Arc::default();
    let dispatcher = {
        let wire = transport.clone();
        let observed = observed.clone();
        config
            .dispatcher()
            .on("ping", move |_: &Value, ctx: &DispatchContext| {
                observed.lock().push(wire.sent().len());
                ctx.reply(Bytes::from_static(b"pong"))
            })
            .build()
    };
    let engine = Engine::new(config, JsonCodec, dispatcher).unwrap();
    engine.attach(transport.clone(), events, ConnectionOptions::new()).await.unwrap();

    for _ in 0..5 {
        transport.deliver(framed(&json!({"type": "ping"}))).await.unwrap();
    }
    eventually("five replies", || transport.sent().len() == 5).await;
    assert_eq!(*observed.lock(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn outbound_paths_frame_and_log() {
    let (engine, _, _) = recording_engine(config());
    let (transport, events) = MemoryTransport::new("dev", 64);
    let uuid = engine.attach(transport.clone(), events, ConnectionOptions::new()).await.unwrap();

    let message = json!({"type": "cmd", "led": true});
    engine.send(&uuid, &message).await.unwrap();
    engine.send_text(&uuid, "AT+RST\r\n").await.unwrap();
    engine.send_slip(&uuid, &[0x01, 0xC0]).await.unwrap();

    let sent = transport.sent();
    assert_eq!(sent[0].as_ref(), framed(&message).as_slice());
    assert_eq!(sent[1].as_ref(), b"AT+RST\n");
    assert_eq!(sent[2].as_ref(), &[0xC0, 0x01, 0xDB, 0xDC, 0xC0]);

    let logs = engine.logs(&uuid).unwrap();
    let outbound: Vec<_> = logs
        .iter()
        .filter(|e| e.level >= LogLevel::Outbound)
        .map(|e| (e.level, e.message.clone()))
        .collect();
    assert_eq!(outbound.len(), 3);
    assert_eq!(outbound[0].0, LogLevel::OutboundRaw);
    assert_eq!(outbound[1], (LogLevel::Outbound, "AT+RST".to_string()));
    assert_eq!(outbound[2].0, LogLevel::OutboundRaw);
}

#[tokio::test]
async fn oversized_message_is_refused() {
    let mut config = config();
    if let Some(framing) = config.decoder.binary.as_mut() {
        framing.max_payload = 8;
    }
    let (engine, _, _) = recording_engine(config);
    let (transport, events) = MemoryTransport::new("dev", 64);
    let uuid = engine.attach(transport.clone(), events, ConnectionOptions::new()).await.unwrap();

    let err = engine
        .send(&uuid, &json!({"type": "too long for eight bytes"}))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Frame(_)));
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn send_failure_marks_link_down() {
    let (engine, _, _) = recording_engine(config());
    let (transport, events) = MemoryTransport::new("dev", 64);
    let uuid = engine.attach(transport.clone(), events, ConnectionOptions::new()).await.unwrap();
    engine.disconnect(&uuid).await.unwrap();

    let err = engine.send_text(&uuid, "hello").await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Transport(TransportError::NotConnected)
    ));
    assert_eq!(engine.health(&uuid), Some(Health::Disconnected));
    assert!(has_log(&engine, &uuid, LogLevel::Error, "write failed"));
}

#[tokio::test]
async fn text_transport_lines_use_leftover() {
    let (engine, _, lines) = recording_engine(config());
    let (transport, events) = MemoryTransport::new("ws", 64);
    engine.attach(transport.clone(), events, ConnectionOptions::new()).await.unwrap();

    transport.deliver_text("hel").await.unwrap();
    transport.deliver_text("lo\nworld\n").await.unwrap();
    eventually("two lines", || lines.lock().len() == 2).await;
    assert_eq!(*lines.lock(), vec!["hello".to_string(), "world".to_string()]);
}

#[tokio::test]
async fn attach_rejects_invalid_override() {
    let (engine, _, _) = recording_engine(config());
    let (transport, events) = MemoryTransport::new("dev", 64);
    let options = ConnectionOptions::new().uuid("bad").liveness(LivenessConfig {
        ping_interval: Duration::from_secs(10),
        warn_after: Duration::from_secs(5),
        fail_after: Duration::from_secs(1),
        ..LivenessConfig::default()
    });

    let err = engine.attach(transport.clone(), events, options).await.unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
    assert!(engine.connection("bad").is_none());
    assert_eq!(transport.connect_attempts(), 0);
}

#[tokio::test]
async fn attach_is_idempotent_per_uuid() {
    let (engine, _, _) = recording_engine(config());
    let (first, events) = MemoryTransport::new("first", 64);
    let (second, events_2) = MemoryTransport::new("second", 64);
    let a = engine
        .attach(first.clone(), events, ConnectionOptions::new().uuid("dev-1"))
        .await
        .unwrap();
    let b = engine
        .attach(second.clone(), events_2, ConnectionOptions::new().uuid("dev-1"))
        .await
        .unwrap();
    assert_eq!(a, b);
    assert_eq!(engine.connections().len(), 1);
    assert_eq!(second.connect_attempts(), 0);
    assert_eq!(first.connect_count(), 1);
}

#[tokio::test]
async fn remove_halts_session_and_drops_record() {
    let (engine, _, _) = recording_engine(config());
    let (transport, events) = MemoryTransport::new("dev", 64);
    let uuid = engine.attach(transport.clone(), events, ConnectionOptions::new()).await.unwrap();
    let mut notifications = engine.subscribe();

    engine.remove(&uuid).await.unwrap();
    assert!(engine.connection(&uuid).is_none());
    assert!(engine.connections().is_empty());
    assert_eq!(transport.disconnect_count(), 1);
    assert!(transport.deliver(&b"late"[..]).await.is_err());
    assert!(matches!(
        engine.remove(&uuid).await,
        Err(EngineError::UnknownConnection(_))
    ));

    let mut removed = false;
    while let Ok(event) = notifications.try_recv() {
        removed |= event == ConnectionEvent::Removed { uuid: uuid.clone() };
    }
    assert!(removed);
}

#[tokio::test(start_paused = true)]
async fn unexpected_close_reconnects_after_delay() {
    let (engine, _, _) = recording_engine(config());
    let (transport, events) = MemoryTransport::new("dev", 64);
    let uuid = engine.attach(transport.clone(), events, ConnectionOptions::new()).await.unwrap();

    let start = tokio::time::Instant::now();
    transport.drop_link("usb unplugged").await.unwrap();
    eventually("link down", || engine.health(&uuid) == Some(Health::Disconnected)).await;
    eventually("link back", || transport.connect_count() == 2).await;
    assert!(start.elapsed() >= Duration::from_millis(2000));
    eventually("health restored", || engine.health(&uuid) == Some(Health::Connected)).await;
    assert_eq!(engine.connection(&uuid).unwrap().reconnect_attempts, 1);
    assert!(has_log(&engine, &uuid, LogLevel::Warning, "usb unplugged"));
}

#[tokio::test(start_paused = true)]
async fn failed_first_connect_is_retried() {
    let (engine, _, _) = recording_engine(config());
    let (transport, events) = MemoryTransport::new("dev", 64);
    transport.fail_next_connects(1);

    let uuid = engine.attach(transport.clone(), events, ConnectionOptions::new()).await.unwrap();
    assert_eq!(engine.health(&uuid), Some(Health::Disconnected));
    assert!(has_log(&engine, &uuid, LogLevel::Error, "connect failed"));

    eventually("retry succeeded", || engine.health(&uuid) == Some(Health::Connected)).await;
    assert_eq!(transport.connect_attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_expiry_recycles_link() {
    let (engine, _, _) = recording_engine(config());
    let (transport, events) = MemoryTransport::new("dev", 64);
    let uuid = engine.attach(transport.clone(), events, ConnectionOptions::new()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(30_500)).await;
    assert_eq!(transport.probe_count(), 1);
    assert_eq!(engine.health(&uuid), Some(Health::Degraded));

    tokio::time::sleep(Duration::from_millis(30_000)).await;
    eventually("link recycled", || transport.connect_count() == 2).await;
    assert_eq!(transport.disconnect_count(), 1);
    assert!(has_log(&engine, &uuid, LogLevel::Error, "heartbeat expired"));
    eventually("healthy again", || engine.health(&uuid) == Some(Health::Connected)).await;
}

#[tokio::test(start_paused = true)]
async fn traffic_keeps_link_healthy() {
    let (engine, _, _) = recording_engine(config());
    let (transport, events) = MemoryTransport::new("dev", 64);
    let uuid = engine.attach(transport.clone(), events, ConnectionOptions::new()).await.unwrap();

    for _ in 0..6 {
        tokio::time::sleep(Duration::from_secs(20)).await;
        transport.deliver(&b"tick\n"[..]).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(engine.health(&uuid), Some(Health::Connected));
    assert_eq!(transport.probe_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn explicit_disconnect_is_not_retried() {
    let (engine, _, _) = recording_engine(config());
    let (transport, events) = MemoryTransport::new("dev", 64);
    let uuid = engine.attach(transport.clone(), events, ConnectionOptions::new()).await.unwrap();

    engine.disconnect(&uuid).await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(transport.connect_count(), 1);
    assert_eq!(engine.health(&uuid), Some(Health::Disconnected));
    assert!(!engine.connection(&uuid).unwrap().auto_reconnect);

    engine.reconnect(&uuid).await.unwrap();
    assert!(transport.is_connected());
    assert_eq!(engine.health(&uuid), Some(Health::Connected));
}

/// Opens without announcing itself and never produces traffic.
#[derive(Default)]
struct SilentLink {
    connected: AtomicBool,
}

#[async_trait]
impl Transport for SilentLink {
    fn kind(&self) -> TransportKind {
        TransportKind::Memory
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> devlink_transport::Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> devlink_transport::Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, _bytes: Bytes) -> devlink_transport::Result<()> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn silent_link_degrades_then_expires() {
    let (engine, _, _) = recording_engine(config());
    let (_device, events) = event_channel(8);
    let link = Arc::new(SilentLink::default());
    let uuid = engine
        .attach(link.clone(), events, ConnectionOptions::new().auto_reconnect(false))
        .await
        .unwrap();
    assert_eq!(engine.health(&uuid), Some(Health::Connected));

    tokio::time::sleep(Duration::from_millis(30_500)).await;
    assert_eq!(engine.health(&uuid), Some(Health::Degraded));

    tokio::time::sleep(Duration::from_millis(30_000)).await;
    assert_eq!(engine.health(&uuid), Some(Health::Disconnected));
    assert!(has_log(&engine, &uuid, LogLevel::Error, "heartbeat expired"));
}
