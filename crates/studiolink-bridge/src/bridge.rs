//! The bridge: pending calls, dispatch, retries, and metrics behind one handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use studiolink_core::{Command, CommandResult, Params};
use tokio::sync::{Mutex, RwLock};
use tokio::time::{self, Instant};

use crate::config::{BridgeConfig, DisconnectPolicy};
use crate::dispatch::{Dispatcher, PollMark, PollOutcome};
use crate::error::BridgeError;
use crate::metrics::{CommandMetric, MetricsCollector, MetricsSnapshot};
use crate::now_millis;
use crate::pending::{Outcome, PendingCalls, PendingEntry};
use crate::registry::{Connection, ConnectionInfo, Outbox, TransportSummary};

/// Shared handle to a bridge instance. Cloning is cheap.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<Inner>,
}

struct Inner {
    config: BridgeConfig,
    peers: RwLock<Dispatcher>,
    pending: Mutex<PendingCalls>,
    metrics: Mutex<MetricsCollector>,
    next_command: AtomicU64,
    next_connection: AtomicU64,
    started_at: Instant,
    shut_down: AtomicBool,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        let metrics = MetricsCollector::new(config.metrics_capacity, config.recent_commands);
        Self {
            inner: Arc::new(Inner {
                config,
                peers: RwLock::new(Dispatcher::default()),
                pending: Mutex::new(PendingCalls::default()),
                metrics: Mutex::new(metrics),
                next_command: AtomicU64::new(1),
                next_connection: AtomicU64::new(1),
                started_at: Instant::now(),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn server_version(&self) -> &str {
        &self.inner.config.server_version
    }

    /// Call `method` on the connected peer with the configured retry budget.
    pub async fn execute(
        &self,
        method: &str,
        params: Params,
    ) -> Result<serde_json::Value, BridgeError> {
        self.execute_with_retries(method, params, self.inner.config.max_retries)
            .await
    }

    /// Call `method`, retrying up to `max_retries` more times after a timeout.
    ///
    /// Execution failures reported by the peer are returned immediately.
    pub async fn execute_with_retries(
        &self,
        method: &str,
        params: Params,
        max_retries: u32,
    ) -> Result<serde_json::Value, BridgeError> {
        let mut attempt = 1;
        loop {
            match self.attempt(method, &params, attempt).await {
                Err(e) if e.is_timeout() && attempt <= max_retries => {
                    tracing::warn!(method, attempt, "{}; retrying", e);
                    time::sleep(self.inner.config.retry_delay()).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn attempt(
        &self,
        method: &str,
        params: &Params,
        attempt: u32,
    ) -> Result<serde_json::Value, BridgeError> {
        let id = self.next_command_id();
        let mut rx = {
            // Checked under the lock so shutdown's drain cannot miss this entry.
            let mut pending = self.inner.pending.lock().await;
            if self.is_shut_down() {
                return Err(BridgeError::Shutdown);
            }
            pending.insert(&id, method)
        };
        self.inner
            .peers
            .write()
            .await
            .enqueue(Command::new(id.clone(), method, params.clone()));

        let outcome = match time::timeout(self.inner.config.timeout(), &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                self.inner.peers.write().await.withdraw(&id);
                return Err(BridgeError::Shutdown);
            }
            Err(_) => {
                let expired = self.inner.pending.lock().await.take(&id);
                match expired {
                    Some(entry) => return Err(self.expire(&id, entry, attempt).await),
                    // A result claimed the entry while the deadline fired.
                    None => rx.await.map_err(|_| BridgeError::Shutdown)?,
                }
            }
        };

        match outcome {
            Outcome::Completed(result) if result.success => Ok(result.data),
            Outcome::Completed(result) => Err(BridgeError::Execution {
                message: result.error_message().to_string(),
                method: method.to_string(),
                params: params.clone(),
            }),
            Outcome::Disconnected => Err(BridgeError::NotConnected {
                method: method.to_string(),
                attempt,
            }),
        }
    }

    async fn expire(&self, id: &str, entry: PendingEntry, attempt: u32) -> BridgeError {
        self.inner.peers.write().await.withdraw(id);
        self.record(&entry, false, Some("Timeout".to_string())).await;

        let method = entry.method;
        if self.is_connected().await {
            let timeout_ms = self.inner.config.timeout_ms;
            tracing::warn!(id, %method, attempt, timeout_ms, "command timed out");
            BridgeError::TimedOut {
                method,
                timeout_ms,
                attempt,
            }
        } else {
            tracing::warn!(id, %method, attempt, "command timed out with no peer connected");
            BridgeError::NotConnected { method, attempt }
        }
    }

    /// Apply a peer's result to the matching pending call.
    ///
    /// Returns false when no call with that id is pending; such results are
    /// ignored.
    pub async fn handle_result(&self, result: CommandResult) -> bool {
        let Some(entry) = self.inner.pending.lock().await.take(&result.id) else {
            tracing::debug!(id = %result.id, "result for unknown command ignored");
            return false;
        };

        let error = (!result.success).then(|| result.error_message().to_string());
        self.record(&entry, result.success, error).await;
        tracing::debug!(id = %result.id, method = %entry.method, success = result.success, "command completed");
        entry.resolve(Outcome::Completed(result));
        true
    }

    async fn record(&self, entry: &PendingEntry, success: bool, error: Option<String>) {
        let metric = CommandMetric {
            method: entry.method.clone(),
            timestamp: now_millis(),
            duration_ms: entry.elapsed_ms(),
            success,
            error,
        };
        self.inner.metrics.lock().await.record(metric);
    }

    /// Register a freshly accepted transport and return its connection id.
    ///
    /// Refused with [`BridgeError::Shutdown`] once the bridge has shut down.
    pub async fn connect(&self, outbox: Outbox) -> Result<String, BridgeError> {
        let mut peers = self.inner.peers.write().await;
        if self.is_shut_down() {
            return Err(BridgeError::Shutdown);
        }
        let n = self.inner.next_connection.fetch_add(1, Ordering::Relaxed);
        let id = format!("peer-{n}");
        peers.add(Connection::new(id.clone(), now_millis(), outbox));
        tracing::info!(%id, "peer connected");
        Ok(id)
    }

    /// Wait for the next command batch on behalf of an HTTP poller.
    ///
    /// Anything already queued is returned at once. Otherwise waits for up to
    /// the configured poll timeout and returns an empty batch if nothing
    /// arrives. Concurrent pollers all receive the same batch.
    pub async fn long_poll(&self) -> Vec<Command> {
        let outcome = {
            let mut peers = self.inner.peers.write().await;
            if self.is_shut_down() {
                return Vec::new();
            }
            peers.poll(PollMark::now())
        };
        let mut rx = match outcome {
            PollOutcome::Batch(batch) => {
                tracing::debug!(commands = batch.len(), "poll took queued commands");
                return batch;
            }
            PollOutcome::Wait(rx) => rx,
        };

        let batch = match time::timeout(self.inner.config.poll_timeout(), &mut rx).await {
            Ok(Ok(batch)) => batch,
            // Dropped by shutdown.
            Ok(Err(_)) => Vec::new(),
            Err(_) => {
                // Seal the channel; a batch sent just before the deadline still counts.
                rx.close();
                rx.try_recv().unwrap_or_default()
            }
        };
        self.inner.peers.write().await.touch_poll(PollMark::now());
        batch
    }

    /// Mark a connection as having passed the handshake and flush queued
    /// commands to it.
    pub async fn mark_ready(&self, id: &str, version: String) -> bool {
        let marked = self.inner.peers.write().await.mark_ready(id, version.clone());
        if marked {
            tracing::info!(%id, %version, "peer ready");
        }
        marked
    }

    /// Forget a closed connection.
    pub async fn disconnect(&self, id: &str) {
        let still_connected = {
            let mut peers = self.inner.peers.write().await;
            if peers.remove(id).is_none() {
                return;
            }
            peers.is_connected(self.inner.config.poll_presence())
        };
        tracing::info!(%id, "peer disconnected");

        if !still_connected && self.inner.config.disconnect_policy == DisconnectPolicy::FailPending {
            self.fail_pending().await;
        }
    }

    async fn fail_pending(&self) {
        let drained = self.inner.pending.lock().await.drain();
        if drained.is_empty() {
            return;
        }
        tracing::warn!(count = drained.len(), "failing pending commands after last peer left");
        for (id, entry) in drained {
            self.inner.peers.write().await.withdraw(&id);
            self.record(&entry, false, Some("Disconnected".to_string())).await;
            entry.resolve(Outcome::Disconnected);
        }
    }

    /// Fail every waiting call, close every connection, and refuse new calls.
    pub async fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::Release);
        let connections = self.inner.peers.write().await.clear();
        for conn in &connections {
            conn.close();
        }
        let dropped = self.inner.pending.lock().await.drain();
        tracing::info!(
            connections = connections.len(),
            pending = dropped.len(),
            "bridge shut down"
        );
    }

    /// True iff a connection has completed the handshake or an HTTP poller
    /// is waiting or polled recently.
    pub async fn is_connected(&self) -> bool {
        self.inner
            .peers
            .read()
            .await
            .is_connected(self.inner.config.poll_presence())
    }

    pub async fn transport_summary(&self) -> TransportSummary {
        self.inner
            .peers
            .read()
            .await
            .summary(self.inner.config.poll_presence())
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.peers.read().await.registry().count()
    }

    pub async fn ready_count(&self) -> usize {
        self.inner.peers.read().await.registry().ready_count()
    }

    pub async fn connection_info(&self) -> Vec<ConnectionInfo> {
        self.inner.peers.read().await.registry().infos()
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.pending.lock().await.len()
    }

    pub async fn queued_count(&self) -> usize {
        self.inner.peers.read().await.queued()
    }

    pub async fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.lock().await.snapshot()
    }

    pub async fn reset_metrics(&self) {
        self.inner.metrics.lock().await.clear();
    }

    /// Time since this bridge was created.
    pub fn uptime(&self) -> std::time::Duration {
        self.inner.started_at.elapsed()
    }

    fn next_command_id(&self) -> String {
        let n = self.inner.next_command.fetch_add(1, Ordering::Relaxed);
        format!("cmd-{n:08x}")
    }
}
