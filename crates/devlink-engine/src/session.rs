//! Per-connection event loop.
//!
//! One task per connection owns the decoder and processes that connection's
//! transport events strictly in arrival order. Handler replies queued while
//! an event is processed are written before the next event is taken.

use std::sync::Arc;

use bytes::Bytes;
use devlink_frame::{hex_preview, DecodeEvent, FrameDecoder, MessageCodec, TopicField, PREVIEW_BYTES};
use devlink_transport::{EventReceiver, Transport, TransportError, TransportEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::connection::{Health, LogLevel};
use crate::dispatch::{DispatchContext, TopicDispatcher};
use crate::liveness::LivenessMonitor;
use crate::reconnect::ReconnectionCoordinator;
use crate::registry::ConnectionRegistry;

/// Log a failed write and mark the link down.
pub(crate) fn record_send_failure(registry: &ConnectionRegistry, uuid: &str, err: &TransportError) {
    registry.log(uuid, LogLevel::Error, format!("write failed: {err}"));
    registry.set_health(uuid, Health::Disconnected);
}

pub(crate) struct Session<C: MessageCodec> {
    pub(crate) uuid: String,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) events: EventReceiver,
    pub(crate) outbox: mpsc::UnboundedReceiver<Bytes>,
    pub(crate) decoder: FrameDecoder<C>,
    pub(crate) dispatcher: Arc<TopicDispatcher<C::Message>>,
    pub(crate) context: DispatchContext,
    pub(crate) registry: ConnectionRegistry,
    pub(crate) liveness: LivenessMonitor,
    pub(crate) coordinator: ReconnectionCoordinator,
    pub(crate) cancel: CancellationToken,
    pub(crate) epoch: u64,
}

impl<C> Session<C>
where
    C: MessageCodec,
    C::Message: TopicField,
{
    pub(crate) async fn run(mut self) {
        debug!(uuid = %self.uuid, "session started");
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                event = self.events.recv() => match event {
                    Some(event) => {
                        self.on_event(event).await;
                        self.flush_outbox().await;
                    }
                    None => {
                        debug!(uuid = %self.uuid, "transport event stream ended");
                        break;
                    }
                },
                Some(bytes) = self.outbox.recv() => self.write_reply(bytes).await,
            }
        }
        debug!(uuid = %self.uuid, "session stopped");
    }

    async fn on_event(&mut self, event: TransportEvent) {
        self.sync_epoch();
        match event {
            TransportEvent::Opened => {
                self.registry
                    .update_health(&self.uuid, |conn| (!conn.health.is_up()).then_some(Health::Connected));
                self.liveness.touch(&self.uuid);
            }
            TransportEvent::Data(bytes) => {
                self.liveness.touch(&self.uuid);
                let decoded = self.decoder.feed(&bytes);
                self.route(decoded);
            }
            TransportEvent::Text(text) => {
                self.liveness.touch(&self.uuid);
                let decoded = self.decoder.feed_text(&text);
                self.route(decoded);
            }
            TransportEvent::Closed { reason } => self.on_closed(reason),
        }
    }

    /// Reset partial framing state after a manual reconnect.
    fn sync_epoch(&mut self) {
        let Some(epoch) = self.registry.update(&self.uuid, |conn| conn.link_epoch) else {
            return;
        };
        if epoch != self.epoch {
            self.epoch = epoch;
            self.decoder.reset();
            debug!(uuid = %self.uuid, epoch, "decoder reset after manual reconnect");
        }
    }

    fn route(&self, decoded: Vec<DecodeEvent<C::Message>>) {
        for event in decoded {
            match event {
                DecodeEvent::Message(message) => {
                    self.dispatcher.dispatch(&message, &self.context);
                }
                DecodeEvent::Binary(frame) => {
                    self.dispatcher.dispatch_binary(&frame, &self.context);
                }
                DecodeEvent::Text(line) => {
                    self.dispatcher.dispatch_text(&line, &self.context);
                }
                DecodeEvent::Skipped { count, preview } => {
                    self.registry.log(
                        &self.uuid,
                        LogLevel::Warning,
                        format!("skipped {count} byte(s) before frame: {preview}"),
                    );
                }
                DecodeEvent::Rejected { reason, dropped } => {
                    self.registry.log(
                        &self.uuid,
                        LogLevel::Warning,
                        format!("dropped {dropped} byte(s): {reason}"),
                    );
                }
            }
        }
    }

    fn on_closed(&mut self, reason: Option<String>) {
        if self.transport.is_connected() {
            debug!(uuid = %self.uuid, "ignoring close from a previous link");
            return;
        }
        self.liveness.cancel(&self.uuid);
        self.registry.set_health(&self.uuid, Health::Disconnected);
        let auto = self
            .registry
            .get(&self.uuid)
            .is_some_and(|conn| conn.auto_reconnect);
        let reason = reason.unwrap_or_else(|| "no reason given".to_string());
        let level = if auto { LogLevel::Warning } else { LogLevel::Info };
        self.registry.log(&self.uuid, level, format!("link closed: {reason}"));
        if auto {
            let coordinator = self.coordinator.clone();
            let uuid = self.uuid.clone();
            tokio::spawn(async move {
                coordinator.on_unexpected_close(&uuid).await;
            });
        }
    }

    async fn flush_outbox(&mut self) {
        while let Ok(bytes) = self.outbox.try_recv() {
            self.write_reply(bytes).await;
        }
    }

    async fn write_reply(&mut self, bytes: Bytes) {
        let preview = hex_preview(&bytes, PREVIEW_BYTES);
        let len = bytes.len();
        match self.transport.send(bytes).await {
            Ok(()) => {
                self.registry.log(
                    &self.uuid,
                    LogLevel::OutboundRaw,
                    format!("reply {len} byte(s): {preview}"),
                );
            }
            Err(err) => record_send_failure(&self.registry, &self.uuid, &err),
        }
    }
}
