use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;

/// Default capacity of a transport event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Physical link family a transport speaks over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Serial,
    WebSocket,
    Mqtt,
    UsbCdc,
    UnixSocket,
    Memory,
}

impl TransportKind {
    /// Short lowercase name used in logs and CLI output.
    pub fn name(self) -> &'static str {
        match self {
            TransportKind::Serial => "serial",
            TransportKind::WebSocket => "websocket",
            TransportKind::Mqtt => "mqtt",
            TransportKind::UsbCdc => "usb-cdc",
            TransportKind::UnixSocket => "unix-socket",
            TransportKind::Memory => "memory",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Something a transport observed, delivered exactly once and in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The link finished opening.
    Opened,
    /// A raw chunk of bytes. Chunk boundaries carry no meaning.
    Data(Bytes),
    /// A chunk of text, for transports that deliver text natively.
    Text(String),
    /// The link closed, expectedly or not.
    Closed { reason: Option<String> },
}

/// Producer half of a transport event stream.
pub type EventSender = mpsc::Sender<TransportEvent>;

/// Consumer half of a transport event stream, owned by one session task.
pub type EventReceiver = mpsc::Receiver<TransportEvent>;

/// Create a bounded event channel. A full channel applies backpressure to
/// the transport's reader.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(capacity.max(1))
}

/// The contract every device transport fulfils.
///
/// Implementations use interior mutability so one handle can be shared
/// between a session's receive loop, its outbox writer, the watchdog probe
/// and the reconnection coordinator.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Link family, for diagnostics.
    fn kind(&self) -> TransportKind;

    /// Human-readable target (port name, URL, socket path).
    fn describe(&self) -> String {
        self.kind().name().to_string()
    }

    /// Whether the link is currently open.
    fn is_connected(&self) -> bool;

    /// Open the link. Emits [`TransportEvent::Opened`] on success.
    async fn connect(&self) -> Result<()>;

    /// Close the link. Emits [`TransportEvent::Closed`].
    async fn disconnect(&self) -> Result<()>;

    /// Write one buffer to the device.
    async fn send(&self, bytes: Bytes) -> Result<()>;

    /// Actively solicit traffic from the device (keep-alive ping).
    ///
    /// Transports without a native probe leave this as a no-op.
    async fn probe(&self) -> Result<()> {
        Ok(())
    }
}
