use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use bytes::{Bytes, BytesMut};
use devlink_frame::{
    hex_preview, slip_encode, wrap_frame, FrameDecoder, FrameError, MessageCodec, TopicField,
    PREVIEW_BYTES,
};
use devlink_transport::{EventReceiver, Transport};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{ConnectionOptions, EngineConfig};
use crate::connection::{Connection, ConnectionSeed, Health, LogEntry, LogLevel};
use crate::dispatch::{DispatchContext, Outbox, TopicDispatcher};
use crate::error::{EngineError, Result};
use crate::liveness::LivenessMonitor;
use crate::reconnect::ReconnectionCoordinator;
use crate::registry::{ConnectionEvent, ConnectionRegistry};
use crate::session::{record_send_failure, Session};

struct SessionHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    outbox: Outbox,
}

struct Inner<C: MessageCodec> {
    config: EngineConfig,
    codec: Arc<C>,
    dispatcher: Arc<TopicDispatcher<C::Message>>,
    registry: ConnectionRegistry,
    liveness: LivenessMonitor,
    coordinator: ReconnectionCoordinator,
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

/// Multi-connection device link engine.
///
/// Owns the connection registry and one session task per attached
/// transport. Cloning yields another handle to the same engine.
///
/// ```no_run
/// # async fn demo() -> devlink_engine::Result<()> {
/// use devlink_engine::{ConnectionOptions, Engine, EngineConfig};
/// use devlink_frame::JsonCodec;
/// use devlink_transport::MemoryTransport;
///
/// let config = EngineConfig::default();
/// let dispatcher = config
///     .dispatcher()
///     .on("status", |msg: &serde_json::Value, ctx| {
///         tracing::info!(uuid = ctx.uuid(), "status {msg}");
///         Ok(())
///     })
///     .build();
/// let engine = Engine::new(config, JsonCodec, dispatcher)?;
///
/// let (transport, events) = MemoryTransport::new("bench", 64);
/// let uuid = engine.attach(transport, events, ConnectionOptions::new()).await?;
/// # let _ = uuid;
/// # Ok(())
/// # }
/// ```
pub struct Engine<C: MessageCodec> {
    inner: Arc<Inner<C>>,
}

impl<C: MessageCodec> Clone for Engine<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> Engine<C>
where
    C: MessageCodec,
    C::Message: TopicField,
{
    /// Build an engine. Heartbeat expiry is wired to the reconnection path.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(config: EngineConfig, codec: C, dispatcher: TopicDispatcher<C::Message>) -> Result<Self> {
        config.validate()?;
        if dispatcher.topic_field() != config.topic_field {
            debug!(
                dispatcher = dispatcher.topic_field(),
                config = %config.topic_field,
                "dispatcher routes on a different field than the engine default"
            );
        }
        let registry = ConnectionRegistry::new(config.event_capacity);
        // The watchdog's expiry hook and the coordinator refer to each other;
        // the hook holds the engine weakly.
        let inner = Arc::new_cyclic(|weak: &Weak<Inner<C>>| {
            let weak = weak.clone();
            let liveness = LivenessMonitor::new(registry.clone()).with_expiry_hook(move |uuid| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let uuid = uuid.to_string();
                tokio::spawn(async move {
                    if let Err(err) = inner.coordinator.drop_stale(&uuid).await {
                        debug!(uuid = %uuid, error = %err, "could not drop stale link");
                    }
                });
            });
            let coordinator = ReconnectionCoordinator::new(registry.clone(), liveness.clone());
            Inner {
                config,
                codec: Arc::new(codec),
                dispatcher: Arc::new(dispatcher),
                registry,
                liveness,
                coordinator,
                sessions: Mutex::new(HashMap::new()),
            }
        });
        Ok(Self { inner })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    /// Register a transport, start its session and open the link.
    ///
    /// Attaching an already registered uuid returns it without side effects.
    /// Invalid per-connection overrides fail with [`EngineError::Config`]
    /// before anything is registered.
    /// A failed first connect is logged against the connection and handed to
    /// the retry path; the uuid is still returned.
    pub async fn attach(
        &self,
        transport: Arc<dyn Transport>,
        events: EventReceiver,
        options: ConnectionOptions,
    ) -> Result<String> {
        let inner = &self.inner;
        let resolved = inner.config.resolve(&options);
        resolved.validate()?;
        let decoder = FrameDecoder::new(Arc::clone(&inner.codec), resolved.decoder.clone());
        let auto_reconnect = resolved.auto_reconnect;
        let seed = ConnectionSeed::new(resolved).with_transport(Arc::clone(&transport));
        let (uuid, created) = inner.registry.insert(options.uuid, seed);
        if !created {
            debug!(uuid = %uuid, "already attached");
            return Ok(uuid);
        }

        let (outbox, outbox_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let session = Session {
            uuid: uuid.clone(),
            transport: Arc::clone(&transport),
            events,
            outbox: outbox_rx,
            decoder,
            dispatcher: Arc::clone(&inner.dispatcher),
            context: DispatchContext::new(uuid.clone(), inner.registry.clone(), Some(outbox.clone())),
            registry: inner.registry.clone(),
            liveness: inner.liveness.clone(),
            coordinator: inner.coordinator.clone(),
            cancel: cancel.clone(),
            epoch: 0,
        };
        let task = tokio::spawn(session.run());
        inner
            .sessions
            .lock()
            .insert(uuid.clone(), SessionHandle { cancel, task, outbox });
        inner.registry.log(
            &uuid,
            LogLevel::Info,
            format!("attached {}", transport.describe()),
        );

        if let Err(err) = inner.coordinator.establish(&uuid).await {
            warn!(uuid = %uuid, error = %err, "initial connect failed");
            if auto_reconnect {
                let coordinator = inner.coordinator.clone();
                let uuid = uuid.clone();
                tokio::spawn(async move {
                    coordinator.on_unexpected_close(&uuid).await;
                });
            }
        }
        Ok(uuid)
    }

    /// Tear a connection down: stop its session, cancel its timers, close
    /// the link, then drop the record.
    pub async fn remove(&self, uuid: &str) -> Result<()> {
        let inner = &self.inner;
        let transport = inner
            .registry
            .update(uuid, |conn| {
                conn.auto_reconnect = false;
                conn.transport.clone()
            })
            .ok_or_else(|| EngineError::UnknownConnection(uuid.to_string()))?;

        let handle = inner.sessions.lock().remove(uuid);
        if let Some(handle) = handle {
            handle.cancel.cancel();
            if let Err(err) = handle.task.await {
                warn!(uuid = %uuid, error = %err, "session task ended abnormally");
            }
        }
        inner.liveness.cancel(uuid);

        if let Some(transport) = transport.filter(|t| t.is_connected()) {
            if let Err(err) = transport.disconnect().await {
                debug!(uuid = %uuid, error = %err, "disconnect during removal failed");
            }
        }
        inner.registry.remove(uuid);
        Ok(())
    }

    /// Remove every connection.
    pub async fn shutdown(&self) {
        for uuid in self.inner.registry.uuids() {
            if let Err(err) = self.remove(&uuid).await {
                debug!(uuid = %uuid, error = %err, "remove during shutdown failed");
            }
        }
    }

    pub async fn disconnect(&self, uuid: &str) -> Result<()> {
        self.inner.coordinator.disconnect(uuid).await
    }

    pub async fn reconnect(&self, uuid: &str) -> Result<()> {
        self.inner.coordinator.reconnect(uuid).await
    }

    pub async fn reconnect_all(&self) -> Vec<(String, Result<()>)> {
        self.inner.coordinator.reconnect_all().await
    }

    /// Treat the connection as alive now.
    pub fn touch(&self, uuid: &str) -> bool {
        self.inner.liveness.touch(uuid)
    }

    /// Encode `message` and write it in the connection's binary framing:
    /// length-prefixed if configured, else SLIP if enabled, else bare.
    pub async fn send(&self, uuid: &str, message: &C::Message) -> Result<()> {
        let record = self.record(uuid)?;
        let payload = self.inner.codec.encode(message)?;
        let mut frame = BytesMut::new();
        if let Some(framing) = &record.decoder.binary {
            if payload.len() > framing.max_payload {
                return Err(FrameError::PayloadTooLarge {
                    size: payload.len(),
                    max: framing.max_payload,
                }
                .into());
            }
            wrap_frame(&framing.header, &payload, &mut frame)?;
        } else if record.decoder.slip {
            slip_encode(&payload, &mut frame);
        } else {
            frame.extend_from_slice(&payload);
        }
        let frame = frame.freeze();
        let note = format!("sent {} byte(s): {}", frame.len(), hex_preview(&frame, PREVIEW_BYTES));
        self.write(&record, frame, LogLevel::OutboundRaw, note).await
    }

    /// Write one line of text, newline-terminated, in the connection's text encoding.
    pub async fn send_text(&self, uuid: &str, line: &str) -> Result<()> {
        let record = self.record(uuid)?;
        let line = line.trim_end_matches(['\r', '\n']);
        let mut bytes = record.decoder.text_encoding.encode(line);
        bytes.push(b'\n');
        self.write(&record, Bytes::from(bytes), LogLevel::Outbound, line.to_string())
            .await
    }

    /// SLIP-encode and write a raw payload.
    pub async fn send_slip(&self, uuid: &str, payload: &[u8]) -> Result<()> {
        let record = self.record(uuid)?;
        let mut frame = BytesMut::new();
        slip_encode(payload, &mut frame);
        let note = format!("sent SLIP frame: {}", hex_preview(payload, PREVIEW_BYTES));
        self.write(&record, frame.freeze(), LogLevel::OutboundRaw, note)
            .await
    }

    /// Write bytes exactly as given.
    pub async fn send_raw(&self, uuid: &str, bytes: impl Into<Bytes>) -> Result<()> {
        let record = self.record(uuid)?;
        let bytes = bytes.into();
        let note = format!("sent {} raw byte(s): {}", bytes.len(), hex_preview(&bytes, PREVIEW_BYTES));
        self.write(&record, bytes, LogLevel::OutboundRaw, note).await
    }

    async fn write(&self, record: &Connection, bytes: Bytes, level: LogLevel, note: String) -> Result<()> {
        let transport = record
            .transport
            .clone()
            .ok_or_else(|| EngineError::NoTransport(record.uuid.clone()))?;
        match transport.send(bytes).await {
            Ok(()) => {
                self.inner.registry.log(&record.uuid, level, note);
                Ok(())
            }
            Err(err) => {
                record_send_failure(&self.inner.registry, &record.uuid, &err);
                Err(err.into())
            }
        }
    }

    fn record(&self, uuid: &str) -> Result<Connection> {
        self.inner
            .registry
            .get(uuid)
            .ok_or_else(|| EngineError::UnknownConnection(uuid.to_string()))
    }

    /// Queue bytes on the session outbox, as a handler reply would.
    pub fn enqueue(&self, uuid: &str, bytes: impl Into<Bytes>) -> Result<()> {
        let sessions = self.inner.sessions.lock();
        let handle = sessions
            .get(uuid)
            .ok_or_else(|| EngineError::UnknownConnection(uuid.to_string()))?;
        handle
            .outbox
            .send(bytes.into())
            .map_err(|_| EngineError::UnknownConnection(uuid.to_string()))
    }

    pub fn connection(&self, uuid: &str) -> Option<Connection> {
        self.inner.registry.get(uuid)
    }

    /// Snapshot of every connection, in attach order.
    pub fn connections(&self) -> Vec<Connection> {
        self.inner.registry.list()
    }

    pub fn health(&self, uuid: &str) -> Option<Health> {
        self.inner.registry.get(uuid).map(|conn| conn.health)
    }

    /// Log ring of one connection, oldest first.
    pub fn logs(&self, uuid: &str) -> Option<Vec<LogEntry>> {
        self.inner.registry.get(uuid).map(|conn| conn.logs.to_vec())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.registry.subscribe()
    }
}

impl<C: MessageCodec> fmt::Debug for Engine<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("connections", &self.inner.registry.len())
            .field("sessions", &self.inner.sessions.lock().len())
            .finish()
    }
}
