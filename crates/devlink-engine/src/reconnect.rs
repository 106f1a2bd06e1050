//! Bounded automatic reconnection and explicit link control.
//!
//! The retry budget is a per-connection counter incremented by each
//! automatic attempt and reset only by a manual [`reconnect`]. The check and
//! increment happen in one registry update, so concurrent close signals for
//! the same connection cannot exceed the budget.
//!
//! [`reconnect`]: ReconnectionCoordinator::reconnect

use std::sync::Arc;

use devlink_transport::Transport;
use tracing::{debug, info};

use crate::connection::{Health, LogLevel};
use crate::error::{EngineError, Result};
use crate::liveness::LivenessMonitor;
use crate::registry::ConnectionRegistry;

/// How an automatic reconnection sequence ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// The link is up again; `attempt` is the value of the retry counter.
    Reconnected { attempt: u32 },
    /// The retry budget is used up.
    Exhausted { attempts: u32 },
    /// Automatic reconnection is off for this connection.
    Disabled,
    /// Another retry loop already owns this connection.
    InProgress,
    /// The connection was removed while waiting.
    Removed,
}

enum Gate {
    Attempt {
        attempt: u32,
        delay: std::time::Duration,
        transport: Arc<dyn Transport>,
    },
    Stop(ReconnectOutcome),
}

/// Drives connect / disconnect on behalf of the engine.
///
/// Every successful connect arms the heartbeat watchdog, so a link that
/// opens and then stays silent still degrades and expires.
#[derive(Debug, Clone)]
pub struct ReconnectionCoordinator {
    registry: ConnectionRegistry,
    liveness: LivenessMonitor,
}

impl ReconnectionCoordinator {
    pub fn new(registry: ConnectionRegistry, liveness: LivenessMonitor) -> Self {
        Self { registry, liveness }
    }

    fn transport(&self, uuid: &str) -> Result<Arc<dyn Transport>> {
        let record = self
            .registry
            .get(uuid)
            .ok_or_else(|| EngineError::UnknownConnection(uuid.to_string()))?;
        record
            .transport
            .ok_or_else(|| EngineError::NoTransport(uuid.to_string()))
    }

    /// Open the link: `Connecting`, then `Connected` or `Disconnected`.
    pub async fn establish(&self, uuid: &str) -> Result<()> {
        let transport = self.transport(uuid)?;
        self.registry.set_health(uuid, Health::Connecting);
        match transport.connect().await {
            Ok(()) => {
                self.registry.set_health(uuid, Health::Connected);
                self.liveness.touch(uuid);
                self.registry
                    .log(uuid, LogLevel::Info, format!("connected via {}", transport.describe()));
                Ok(())
            }
            Err(err) => {
                self.registry.set_health(uuid, Health::Disconnected);
                self.registry
                    .log(uuid, LogLevel::Error, format!("connect failed: {err}"));
                Err(err.into())
            }
        }
    }

    /// Explicit disconnect. Disables automatic reconnection.
    pub async fn disconnect(&self, uuid: &str) -> Result<()> {
        self.registry
            .update(uuid, |conn| conn.auto_reconnect = false)
            .ok_or_else(|| EngineError::UnknownConnection(uuid.to_string()))?;
        let transport = self.transport(uuid)?;
        let result = transport.disconnect().await;
        self.registry.set_health(uuid, Health::Disconnected);
        match result {
            Ok(()) => {
                self.registry.log(uuid, LogLevel::Info, "disconnected");
                Ok(())
            }
            Err(err) => {
                self.registry
                    .log(uuid, LogLevel::Error, format!("disconnect failed: {err}"));
                Err(err.into())
            }
        }
    }

    /// Manual reconnect: re-enables automatic reconnection, resets the retry
    /// budget and asks the session to clear partial decoder state.
    pub async fn reconnect(&self, uuid: &str) -> Result<()> {
        self.registry
            .update(uuid, |conn| {
                conn.auto_reconnect = true;
                conn.reconnect_attempts = 0;
                conn.link_epoch += 1;
            })
            .ok_or_else(|| EngineError::UnknownConnection(uuid.to_string()))?;
        self.establish(uuid).await
    }

    /// Hand a connection whose heartbeat expired to the retry path.
    ///
    /// A link the transport still reports as open is closed first and the
    /// resulting close event drives the retry. Does nothing when automatic
    /// reconnection is off.
    pub async fn drop_stale(&self, uuid: &str) -> Result<()> {
        let auto = self
            .registry
            .get(uuid)
            .map(|conn| conn.auto_reconnect)
            .ok_or_else(|| EngineError::UnknownConnection(uuid.to_string()))?;
        if !auto {
            return Ok(());
        }
        let transport = self.transport(uuid)?;
        if transport.is_connected() {
            transport.disconnect().await?;
        } else {
            self.on_unexpected_close(uuid).await;
        }
        Ok(())
    }

    /// React to a close nobody asked for: retry with a fixed delay until the
    /// link is back or the budget is spent.
    pub async fn on_unexpected_close(&self, uuid: &str) -> ReconnectOutcome {
        let claimed = self.registry.update(uuid, |conn| {
            if conn.reconnecting {
                return false;
            }
            conn.reconnecting = true;
            true
        });
        match claimed {
            None => return ReconnectOutcome::Removed,
            Some(false) => return ReconnectOutcome::InProgress,
            Some(true) => {}
        }
        let outcome = self.retry_loop(uuid).await;
        self.registry.update(uuid, |conn| conn.reconnecting = false);
        debug!(uuid = %uuid, ?outcome, "reconnection finished");
        outcome
    }

    async fn retry_loop(&self, uuid: &str) -> ReconnectOutcome {
        loop {
            let gate = self.registry.update(uuid, |conn| {
                if !conn.auto_reconnect {
                    return Gate::Stop(ReconnectOutcome::Disabled);
                }
                let Some(transport) = conn.transport.clone() else {
                    return Gate::Stop(ReconnectOutcome::Disabled);
                };
                if conn.reconnect_attempts >= conn.reconnect.max_retries {
                    return Gate::Stop(ReconnectOutcome::Exhausted {
                        attempts: conn.reconnect_attempts,
                    });
                }
                conn.reconnect_attempts += 1;
                Gate::Attempt {
                    attempt: conn.reconnect_attempts,
                    delay: conn.reconnect.retry_delay,
                    transport,
                }
            });
            let (attempt, delay, transport) = match gate {
                None => return ReconnectOutcome::Removed,
                Some(Gate::Stop(outcome)) => {
                    if let ReconnectOutcome::Exhausted { attempts } = outcome {
                        self.registry.log(
                            uuid,
                            LogLevel::Error,
                            format!("giving up after {attempts} reconnect attempts"),
                        );
                    }
                    return outcome;
                }
                Some(Gate::Attempt {
                    attempt,
                    delay,
                    transport,
                }) => (attempt, delay, transport),
            };

            let Some(lifecycle) = self.registry.update(uuid, |conn| conn.lifecycle.clone()) else {
                return ReconnectOutcome::Removed;
            };
            tokio::select! {
                () = lifecycle.cancelled() => return ReconnectOutcome::Removed,
                () = tokio::time::sleep(delay) => {}
            }

            let still_wanted = self.registry.get(uuid).map(|conn| conn.auto_reconnect);
            match still_wanted {
                None => return ReconnectOutcome::Removed,
                Some(false) => return ReconnectOutcome::Disabled,
                Some(true) => {}
            }
            if transport.is_connected() {
                return ReconnectOutcome::Reconnected { attempt };
            }

            self.registry.log(
                uuid,
                LogLevel::Info,
                format!("reconnect attempt {attempt} via {}", transport.describe()),
            );
            self.registry.set_health(uuid, Health::Connecting);
            match transport.connect().await {
                Ok(()) => {
                    self.registry.set_health(uuid, Health::Connected);
                    self.liveness.touch(uuid);
                    info!(uuid = %uuid, attempt, "link restored");
                    return ReconnectOutcome::Reconnected { attempt };
                }
                Err(err) => {
                    self.registry.set_health(uuid, Health::Disconnected);
                    self.registry.log(
                        uuid,
                        LogLevel::Error,
                        format!("reconnect attempt {attempt} failed: {err}"),
                    );
                }
            }
        }
    }

    /// Disconnect every current connection, pausing after each, then
    /// reconnect them all. Connections added meanwhile are left alone.
    pub async fn reconnect_all(&self) -> Vec<(String, Result<()>)> {
        let snapshot = self.registry.uuids();
        for uuid in &snapshot {
            let Some(quiescence) = self.registry.get(uuid).map(|c| c.reconnect.quiescence) else {
                continue;
            };
            if let Err(err) = self.disconnect(uuid).await {
                debug!(uuid = %uuid, error = %err, "disconnect during drain failed");
            }
            tokio::time::sleep(quiescence).await;
        }
        let mut results = Vec::with_capacity(snapshot.len());
        for uuid in snapshot {
            let result = self.reconnect(&uuid).await;
            results.push((uuid, result));
        }
        results
    }
}
