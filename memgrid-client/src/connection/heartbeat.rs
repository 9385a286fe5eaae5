//! Periodic liveness checks on open connections.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use memgrid_core::GridError;

use super::registry::ConnectionRegistry;
use crate::cluster::LifecycleService;
use crate::codec::ClientPingCodec;
use crate::invocation::{InvocationService, InvocationTarget};

/// Closes silent connections and pings idle ones.
#[derive(Debug, Clone)]
pub struct HeartbeatManager {
    interval: Duration,
    timeout: Duration,
    registry: Arc<ConnectionRegistry>,
    invocations: Arc<InvocationService>,
    lifecycle: Arc<LifecycleService>,
}

impl HeartbeatManager {
    /// Creates a manager checking every `interval` and closing connections
    /// that read nothing for `timeout`.
    pub fn new(
        interval: Duration,
        timeout: Duration,
        registry: Arc<ConnectionRegistry>,
        invocations: Arc<InvocationService>,
        lifecycle: Arc<LifecycleService>,
    ) -> Self {
        Self {
            interval,
            timeout,
            registry,
            invocations,
            lifecycle,
        }
    }

    /// Runs the check every interval until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::debug!("heartbeat task shutting down");
                        return;
                    }
                    _ = ticker.tick() => self.check_connections(),
                }
            }
        })
    }

    /// Checks every registered connection once.
    pub fn check_connections(&self) {
        if !self.lifecycle.is_running() {
            return;
        }

        let now = Instant::now();
        for connection in self.registry.connections() {
            if !connection.is_alive() {
                continue;
            }

            if now.saturating_duration_since(connection.last_read()) > self.timeout {
                tracing::warn!(
                    id = %connection.id(),
                    address = %connection.remote_address(),
                    timeout = ?self.timeout,
                    "heartbeat failed, no message read within timeout"
                );
                connection.close(
                    "heartbeat timed out",
                    Some(GridError::TargetDisconnected(format!(
                        "heartbeat timed out to {}",
                        connection.remote_address()
                    ))),
                );
                continue;
            }

            if now.saturating_duration_since(connection.last_write()) > self.interval {
                tracing::trace!(id = %connection.id(), "sending heartbeat ping");
                let invocations = Arc::clone(&self.invocations);
                tokio::spawn(async move {
                    let _ = invocations
                        .invoke_urgent(
                            ClientPingCodec::encode_request(),
                            InvocationTarget::Connection(connection),
                        )
                        .await;
                });
            }
        }
    }
}
