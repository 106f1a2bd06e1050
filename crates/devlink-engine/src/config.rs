use std::path::Path;
use std::time::Duration;

use devlink_frame::{DecoderConfig, TopicField};
use serde::{Deserialize, Serialize};

use crate::connection::DEFAULT_LOG_CAPACITY;
use crate::dispatch::DispatcherBuilder;
use crate::error::{EngineError, Result};

/// Heartbeat timers, all measured from the last observed traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// Arm the watchdog at all.
    pub enabled: bool,
    /// Quiet time before the transport probe is invoked. Default: 25s.
    #[serde(with = "duration_ms")]
    pub ping_interval: Duration,
    /// Quiet time before health drops to `Degraded`. Default: 30s.
    #[serde(with = "duration_ms")]
    pub warn_after: Duration,
    /// Quiet time before health drops to `Disconnected`. Default: 60s.
    #[serde(with = "duration_ms")]
    pub fail_after: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ping_interval: Duration::from_secs(25),
            warn_after: Duration::from_secs(30),
            fail_after: Duration::from_secs(60),
        }
    }
}

/// Automatic reconnection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Automatic attempts before giving up. Default: 5.
    pub max_retries: u32,
    /// Fixed wait before each attempt. Default: 2000ms.
    #[serde(with = "duration_ms")]
    pub retry_delay: Duration,
    /// Pause after each disconnect in a drain-and-reconnect-all. Default: 250ms.
    #[serde(with = "duration_ms")]
    pub quiescence: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay: Duration::from_millis(2000),
            quiescence: Duration::from_millis(250),
        }
    }
}

/// Engine-wide defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub decoder: DecoderConfig,
    pub liveness: LivenessConfig,
    pub reconnect: ReconnectConfig,
    /// Message field whose value selects the handler. Default: `type`.
    pub topic_field: String,
    /// Log ring capacity per connection. Default: 200.
    pub log_capacity: usize,
    /// Whether new connections reconnect on unexpected close.
    pub auto_reconnect: bool,
    /// Capacity of the connection event broadcast.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            decoder: DecoderConfig::default(),
            liveness: LivenessConfig::default(),
            reconnect: ReconnectConfig::default(),
            topic_field: "type".to_string(),
            log_capacity: DEFAULT_LOG_CAPACITY,
            auto_reconnect: true,
            event_capacity: 64,
        }
    }
}

/// Per-connection overrides. Unset fields fall back to [`EngineConfig`].
#[derive(Debug, Clone, Default)]
pub struct ConnectionOptions {
    pub uuid: Option<String>,
    pub label: Option<String>,
    pub decoder: Option<DecoderConfig>,
    pub liveness: Option<LivenessConfig>,
    pub reconnect: Option<ReconnectConfig>,
    pub auto_reconnect: Option<bool>,
}

impl ConnectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn decoder(mut self, decoder: DecoderConfig) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn liveness(mut self, liveness: LivenessConfig) -> Self {
        self.liveness = Some(liveness);
        self
    }

    pub fn reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = Some(reconnect);
        self
    }

    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = Some(enabled);
        self
    }
}

/// Effective configuration of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub label: Option<String>,
    pub decoder: DecoderConfig,
    pub liveness: LivenessConfig,
    pub reconnect: ReconnectConfig,
    pub auto_reconnect: bool,
    pub log_capacity: usize,
}

impl EngineConfig {
    /// Merge per-connection overrides over the engine defaults.
    pub fn resolve(&self, options: &ConnectionOptions) -> ConnectionConfig {
        ConnectionConfig {
            label: options.label.clone(),
            decoder: options
                .decoder
                .clone()
                .unwrap_or_else(|| self.decoder.clone()),
            liveness: options.liveness.unwrap_or(self.liveness),
            reconnect: options.reconnect.unwrap_or(self.reconnect),
            auto_reconnect: options.auto_reconnect.unwrap_or(self.auto_reconnect),
            log_capacity: self.log_capacity,
        }
    }

    /// Dispatcher builder routing on [`topic_field`](Self::topic_field).
    pub fn dispatcher<M: TopicField>(&self) -> DispatcherBuilder<M> {
        DispatcherBuilder::new(self.topic_field.clone())
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.topic_field.is_empty() {
            return Err(EngineError::Config("topic_field must not be empty".into()));
        }
        if self.log_capacity == 0 {
            return Err(EngineError::Config("log_capacity must be at least 1".into()));
        }
        check_liveness(&self.liveness)?;
        check_decoder(&self.decoder)
    }

    /// Load and validate a JSON config file. Missing fields keep defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|err| EngineError::Config(format!("{}: {err}", path.display())))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|err| EngineError::Config(format!("{}: {err}", path.display())))?;
        config.validate()?;
        Ok(config)
    }
}

impl ConnectionConfig {
    /// Check the merged config before a connection is registered.
    pub fn validate(&self) -> Result<()> {
        if self.log_capacity == 0 {
            return Err(EngineError::Config("log_capacity must be at least 1".into()));
        }
        check_liveness(&self.liveness)?;
        check_decoder(&self.decoder)
    }
}

fn check_liveness(live: &LivenessConfig) -> Result<()> {
    if live.enabled && !(live.ping_interval <= live.warn_after && live.warn_after <= live.fail_after) {
        return Err(EngineError::Config(format!(
            "liveness timers must escalate (ping {:?} <= warn {:?} <= fail {:?})",
            live.ping_interval, live.warn_after, live.fail_after
        )));
    }
    Ok(())
}

fn check_decoder(decoder: &DecoderConfig) -> Result<()> {
    if decoder.text_is_unreachable() {
        return Err(EngineError::Config(
            "length-prefixed framing without a header leaves text unreachable; set a header or disable text"
                .into(),
        ));
    }
    Ok(())
}

/// Durations as integer milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
