//! Device transport contract.
//!
//! The engine never opens a serial port, a WebSocket or an MQTT session
//! itself. It consumes anything implementing [`Transport`] plus the ordered
//! [`TransportEvent`] stream that transport feeds:
//! - `connect` / `disconnect` / `send` / `probe` on a shared handle
//! - `Opened`, `Data`, `Text`, `Closed` events, exactly once and in order
//!
//! Two implementations ship here: [`MemoryTransport`] (in-process, for tests
//! and demos) and, on Unix, [`UnixSocketTransport`].

pub mod error;
pub mod memory;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use memory::MemoryTransport;
pub use traits::{
    event_channel, EventReceiver, EventSender, Transport, TransportEvent, TransportKind,
    DEFAULT_EVENT_CAPACITY,
};

#[cfg(unix)]
pub use uds::UnixSocketTransport;
