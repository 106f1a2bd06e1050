//! Connection engine for device links.
//!
//! Ties transports, framing and application handlers together:
//! - [`ConnectionRegistry`]: per-connection state, atomic per-key updates
//! - [`TopicDispatcher`]: routes decoded messages to handlers by topic
//! - [`LivenessMonitor`]: ping / warn / fail heartbeat timers
//! - [`ReconnectionCoordinator`]: bounded automatic reconnection
//! - [`Engine`]: one decode session per attached transport
//!
//! A failure on one connection (transport error, bad frame, handler error
//! or panic) is logged against that connection and never affects another.

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod liveness;
pub mod reconnect;
pub mod registry;

mod session;

pub use config::{ConnectionConfig, ConnectionOptions, EngineConfig, LivenessConfig, ReconnectConfig};
pub use connection::{
    Connection, ConnectionSeed, Health, LogEntry, LogLevel, LogRing, WatchdogTimers,
    DEFAULT_LOG_CAPACITY,
};
pub use dispatch::{
    DispatchContext, DispatchOutcome, DispatcherBuilder, HandlerError, HandlerResult, Outbox,
    TopicDispatcher, TopicHandler,
};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use liveness::{ExpiryHook, LivenessMonitor};
pub use reconnect::{ReconnectOutcome, ReconnectionCoordinator};
pub use registry::{ConnectionEvent, ConnectionRegistry};
