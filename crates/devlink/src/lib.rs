//! Framing, dispatch and liveness for fleets of device links.
//!
//! devlink sits between raw device transports (serial, USB-CDC, WebSocket,
//! MQTT, Unix sockets) and application code. It extracts SLIP,
//! length-prefixed and text frames from arbitrarily chunked byte streams,
//! routes decoded messages to handlers by topic, and tracks per-connection
//! health with heartbeat timers and bounded automatic reconnection.
//!
//! # Crate Structure
//!
//! - [`transport`]: transport contract, in-memory and Unix socket transports
//! - [`frame`]: SLIP and length-prefixed codecs, text splitting, the frame decoder
//! - [`engine`]: connection registry, dispatcher, liveness, reconnection, engine

/// Re-export transport types.
pub mod transport {
    pub use devlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use devlink_frame::*;
}

/// Re-export engine types.
pub mod engine {
    pub use devlink_engine::*;
}
