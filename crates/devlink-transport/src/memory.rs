//! In-process transport: the device side is driven by the caller.
//!
//! Used as a test double and for demos. Inbound bytes are injected with
//! [`MemoryTransport::deliver`], outbound writes are recorded and can be
//! inspected with [`MemoryTransport::sent`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{event_channel, EventReceiver, EventSender, Transport, TransportEvent, TransportKind};

#[derive(Debug, Default)]
struct MemoryState {
    connected: bool,
    connects: usize,
    connect_attempts: usize,
    disconnects: usize,
    probes: usize,
    failing_connects: usize,
    sent: Vec<Bytes>,
}

/// A transport whose remote end lives in the same process.
#[derive(Debug)]
pub struct MemoryTransport {
    name: String,
    kind: TransportKind,
    events: EventSender,
    state: Mutex<MemoryState>,
}

impl MemoryTransport {
    /// Create a disconnected memory transport and its event stream.
    pub fn new(name: impl Into<String>, capacity: usize) -> (Arc<Self>, EventReceiver) {
        Self::with_kind(name, TransportKind::Memory, capacity)
    }

    /// Create a memory transport that reports itself as another link family.
    pub fn with_kind(
        name: impl Into<String>,
        kind: TransportKind,
        capacity: usize,
    ) -> (Arc<Self>, EventReceiver) {
        let (events, rx) = event_channel(capacity);
        let transport = Arc::new(Self {
            name: name.into(),
            kind,
            events,
            state: Mutex::new(MemoryState::default()),
        });
        (transport, rx)
    }

    /// Inject bytes as if the device had written them.
    pub async fn deliver(&self, bytes: impl Into<Bytes>) -> Result<()> {
        self.emit(TransportEvent::Data(bytes.into())).await
    }

    /// Inject text as if a text-native transport had received it.
    pub async fn deliver_text(&self, text: impl Into<String>) -> Result<()> {
        self.emit(TransportEvent::Text(text.into())).await
    }

    /// Drop the link from the device side (unexpected close).
    pub async fn drop_link(&self, reason: &str) -> Result<()> {
        self.state.lock().connected = false;
        self.emit(TransportEvent::Closed {
            reason: Some(reason.to_string()),
        })
        .await
    }

    /// Make the next `count` connect attempts fail.
    pub fn fail_next_connects(&self, count: usize) {
        self.state.lock().failing_connects = count;
    }

    /// Every buffer written so far, in order.
    pub fn sent(&self) -> Vec<Bytes> {
        self.state.lock().sent.clone()
    }

    /// Number of successful connects.
    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    /// Number of connect calls, successful or not.
    pub fn connect_attempts(&self) -> usize {
        self.state.lock().connect_attempts
    }

    pub fn disconnect_count(&self) -> usize {
        self.state.lock().disconnects
    }

    pub fn probe_count(&self) -> usize {
        self.state.lock().probes
    }

    async fn emit(&self, event: TransportEvent) -> Result<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.kind, self.name)
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    async fn connect(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.connect_attempts += 1;
            if state.failing_connects > 0 {
                state.failing_connects -= 1;
                return Err(TransportError::Connect {
                    target: self.name.clone(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::ConnectionRefused,
                        "memory link refused",
                    ),
                });
            }
            state.connected = true;
            state.connects += 1;
        }
        debug!(name = %self.name, "memory transport connected");
        // Nobody listening is fine: the link is still open.
        let _ = self.emit(TransportEvent::Opened).await;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.connected = false;
            state.disconnects += 1;
        }
        debug!(name = %self.name, "memory transport disconnected");
        let _ = self
            .emit(TransportEvent::Closed {
                reason: Some("disconnect requested".to_string()),
            })
            .await;
        Ok(())
    }

    async fn send(&self, bytes: Bytes) -> Result<()> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.sent.push(bytes);
        Ok(())
    }

    async fn probe(&self) -> Result<()> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.probes += 1;
        Ok(())
    }
}
