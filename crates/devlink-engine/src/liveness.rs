//! Per-connection heartbeat watchdog.
//!
//! Every observed inbound unit calls [`LivenessMonitor::touch`], which
//! cancels and re-arms three one-shot timers measured from that moment:
//! - ping: invoke the transport probe to solicit traffic
//! - warn: `Connected` drops to `Degraded`
//! - fail: health drops to `Disconnected` and the expiry hook runs
//!
//! Timers are cancelled and re-armed under the connection's record lock and
//! a firing timer re-checks its own token under that same lock, so a timer
//! that lost the race against a touch or a removal does nothing.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::connection::{Health, LogLevel, WatchdogTimers};
use crate::registry::ConnectionRegistry;

/// Called with the uuid of a connection whose fail timer fired.
pub type ExpiryHook = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Ping,
    Warn,
    Fail,
}

/// Arms and fires watchdog timers for registry entries.
#[derive(Clone)]
pub struct LivenessMonitor {
    registry: ConnectionRegistry,
    on_expiry: Option<ExpiryHook>,
}

impl LivenessMonitor {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self {
            registry,
            on_expiry: None,
        }
    }

    /// Run `hook` after a fail timer has moved a connection to `Disconnected`.
    pub fn with_expiry_hook(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_expiry = Some(Arc::new(hook));
        self
    }

    /// Record traffic and restart all three timers.
    ///
    /// A `Degraded` connection returns to `Connected`. Must be called from
    /// within a Tokio runtime. Returns false if the uuid is unknown.
    pub fn touch(&self, uuid: &str) -> bool {
        let armed = self.registry.update(uuid, |conn| {
            conn.watchdog.cancel_all();
            conn.last_seen = Some(Instant::now());
            if !conn.liveness.enabled {
                return;
            }
            let cfg = conn.liveness;
            conn.watchdog = WatchdogTimers {
                ping: Some(self.arm(uuid, cfg.ping_interval, Stage::Ping)),
                warn: Some(self.arm(uuid, cfg.warn_after, Stage::Warn)),
                fail: Some(self.arm(uuid, cfg.fail_after, Stage::Fail)),
            };
        });
        if armed.is_none() {
            return false;
        }
        self.registry
            .update_health(uuid, |conn| (conn.health == Health::Degraded).then_some(Health::Connected));
        true
    }

    /// Cancel all timers of a connection without touching its health.
    pub fn cancel(&self, uuid: &str) {
        self.registry.update(uuid, |conn| conn.watchdog.cancel_all());
    }

    fn arm(&self, uuid: &str, delay: Duration, stage: Stage) -> CancellationToken {
        let token = CancellationToken::new();
        let guard = token.clone();
        let monitor = self.clone();
        let uuid = uuid.to_string();
        tokio::spawn(async move {
            tokio::select! {
                () = guard.cancelled() => {}
                () = tokio::time::sleep(delay) => monitor.fire(&uuid, stage, &guard).await,
            }
        });
        token
    }

    async fn fire(&self, uuid: &str, stage: Stage, token: &CancellationToken) {
        match stage {
            Stage::Ping => {
                let transport = self
                    .registry
                    .update(uuid, |conn| {
                        if token.is_cancelled() {
                            return None;
                        }
                        conn.watchdog.ping = None;
                        conn.transport.clone()
                    })
                    .flatten();
                let Some(transport) = transport else {
                    return;
                };
                debug!(uuid = %uuid, "link quiet, probing");
                if let Err(err) = transport.probe().await {
                    self.registry
                        .log(uuid, LogLevel::Warning, format!("heartbeat probe failed: {err}"));
                }
            }
            Stage::Warn => {
                let mut quiet = Duration::ZERO;
                let before = self.registry.update(uuid, |conn| {
                    quiet = conn.last_seen.map(|t| t.elapsed()).unwrap_or_default();
                    conn.health
                });
                let after = self.registry.update_health(uuid, |conn| {
                    (!token.is_cancelled() && conn.health == Health::Connected)
                        .then_some(Health::Degraded)
                });
                if before == Some(Health::Connected) && after == Some(Health::Degraded) {
                    self.registry.log(
                        uuid,
                        LogLevel::Warning,
                        format!("no traffic for {}ms, link degraded", quiet.as_millis()),
                    );
                }
            }
            Stage::Fail => {
                let mut expired = false;
                self.registry.update_health(uuid, |conn| {
                    if token.is_cancelled() || conn.health == Health::Disconnected {
                        return None;
                    }
                    expired = true;
                    Some(Health::Disconnected)
                });
                if !expired {
                    return;
                }
                self.registry.update(uuid, |conn| conn.watchdog.cancel_all());
                self.registry
                    .log(uuid, LogLevel::Error, "heartbeat expired, link considered lost");
                if let Some(hook) = &self.on_expiry {
                    hook(uuid);
                }
            }
        }
    }
}

impl fmt::Debug for LivenessMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LivenessMonitor")
            .field("expiry_hook", &self.on_expiry.is_some())
            .finish()
    }
}
