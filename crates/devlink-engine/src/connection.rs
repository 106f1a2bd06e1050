use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use devlink_frame::DecoderConfig;
use devlink_transport::{Transport, TransportKind};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{ConnectionConfig, LivenessConfig, ReconnectConfig};

/// Default number of log entries retained per connection.
pub const DEFAULT_LOG_CAPACITY: usize = 200;

/// Link health as seen by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Disconnected,
    Connecting,
    Connected,
    /// Link is up but has been silent past the warn timer.
    Degraded,
}

impl Health {
    pub fn name(self) -> &'static str {
        match self {
            Health::Disconnected => "disconnected",
            Health::Connecting => "connecting",
            Health::Connected => "connected",
            Health::Degraded => "degraded",
        }
    }

    /// `Connected` or `Degraded`.
    pub fn is_up(self) -> bool {
        matches!(self, Health::Connected | Health::Degraded)
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Severity of a connection log entry. Numeric codes are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Error = 0,
    Warning = 1,
    Info = 2,
    /// Outbound text.
    Outbound = 3,
    /// Outbound binary frames.
    OutboundRaw = 5,
}

impl LogLevel {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warning => "warning",
            LogLevel::Info => "info",
            LogLevel::Outbound => "outbound",
            LogLevel::OutboundRaw => "outbound_raw",
        }
    }
}

/// One entry of a connection's log ring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: SystemTime,
}

/// Bounded log: appending past capacity evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct LogRing {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY)),
            capacity,
        }
    }

    pub fn push(&mut self, level: LogLevel, message: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            level,
            message: message.into(),
            timestamp: SystemTime::now(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.back()
    }

    pub fn to_vec(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

/// Cancellation handles for the three heartbeat timers.
#[derive(Debug, Clone, Default)]
pub struct WatchdogTimers {
    pub ping: Option<CancellationToken>,
    pub warn: Option<CancellationToken>,
    pub fail: Option<CancellationToken>,
}

impl WatchdogTimers {
    pub fn is_armed(&self) -> bool {
        self.ping.is_some() || self.warn.is_some() || self.fail.is_some()
    }

    /// Cancel and forget every armed timer.
    pub fn cancel_all(&mut self) {
        for token in [self.ping.take(), self.warn.take(), self.fail.take()]
            .into_iter()
            .flatten()
        {
            token.cancel();
        }
    }
}

/// Everything needed to register a new connection.
#[derive(Clone)]
pub struct ConnectionSeed {
    pub transport: Option<Arc<dyn Transport>>,
    pub config: ConnectionConfig,
    pub health: Health,
}

impl ConnectionSeed {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            transport: None,
            config,
            health: Health::Disconnected,
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }
}

/// Per-link record held in the registry.
#[derive(Clone)]
pub struct Connection {
    pub uuid: String,
    pub label: Option<String>,
    pub transport: Option<Arc<dyn Transport>>,
    pub health: Health,
    pub auto_reconnect: bool,
    pub reconnect_attempts: u32,
    /// A retry loop currently owns this connection.
    pub reconnecting: bool,
    /// Bumped by every manual reconnect; the session resets its decoder when it changes.
    pub link_epoch: u64,
    pub decoder: DecoderConfig,
    pub liveness: LivenessConfig,
    pub reconnect: ReconnectConfig,
    pub logs: LogRing,
    pub watchdog: WatchdogTimers,
    pub last_seen: Option<Instant>,
    /// Cancelled when the connection is removed.
    pub lifecycle: CancellationToken,
    pub(crate) removed: bool,
}

impl Connection {
    pub(crate) fn from_seed(uuid: String, seed: ConnectionSeed) -> Self {
        let ConnectionSeed {
            transport,
            config,
            health,
        } = seed;
        Self {
            uuid,
            label: config.label,
            transport,
            health,
            auto_reconnect: config.auto_reconnect,
            reconnect_attempts: 0,
            reconnecting: false,
            link_epoch: 0,
            decoder: config.decoder,
            liveness: config.liveness,
            reconnect: config.reconnect,
            logs: LogRing::new(config.log_capacity),
            watchdog: WatchdogTimers::default(),
            last_seen: None,
            lifecycle: CancellationToken::new(),
            removed: false,
        }
    }

    pub fn kind(&self) -> Option<TransportKind> {
        self.transport.as_ref().map(|t| t.kind())
    }

    /// Label if set, otherwise the transport description, otherwise the uuid.
    pub fn display_name(&self) -> String {
        if let Some(label) = &self.label {
            return label.clone();
        }
        match &self.transport {
            Some(transport) => transport.describe(),
            None => self.uuid.clone(),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("uuid", &self.uuid)
            .field("label", &self.label)
            .field("transport", &self.transport.as_ref().map(|t| t.describe()))
            .field("health", &self.health)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("reconnect_attempts", &self.reconnect_attempts)
            .field("logs", &self.logs.len())
            .field("watchdog_armed", &self.watchdog.is_armed())
            .finish()
    }
}
