//! Lease expiry monitor.
//!
//! Runs on the heartbeat interval and evicts every instance whose last
//! heartbeat is older than the lease. Eviction is best effort: an instance
//! cut off by a partition is evicted even though it is alive, and recovers
//! by registering again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::config::RegistryConfig;
use super::store::{InstanceRecord, RegistryStore};
use crate::worker::{BackgroundRunnable, BackgroundWorker};

/// On-demand work accepted by the monitor besides its periodic sweep.
#[derive(Debug)]
pub enum MonitorTask {
    /// Sweep immediately; the evicted records are sent back if a reply
    /// channel is given.
    SweepNow(Option<oneshot::Sender<Vec<InstanceRecord>>>),
}

/// Evicts lapsed instances from a [`RegistryStore`].
pub struct ExpiryMonitor {
    store: Arc<RegistryStore>,
    lease: Duration,
    sweeps: u64,
}

impl ExpiryMonitor {
    #[must_use]
    pub fn new(store: Arc<RegistryStore>, lease: Duration) -> Self {
        Self {
            store,
            lease,
            sweeps: 0,
        }
    }

    /// Runs one sweep and returns the evicted records.
    pub fn sweep(&mut self) -> Vec<InstanceRecord> {
        self.sweeps += 1;
        let expired = self.store.expire_lapsed(self.lease);
        if expired.is_empty() {
            tracing::trace!(sweep = self.sweeps, "expiry sweep found nothing to evict");
        } else {
            tracing::info!(
                sweep = self.sweeps,
                evicted = expired.len(),
                remaining = self.store.len(),
                "expiry sweep evicted instances"
            );
        }
        expired
    }

    /// Starts the monitor on the configured heartbeat interval.
    #[must_use]
    pub fn spawn(store: Arc<RegistryStore>, config: &RegistryConfig) -> MonitorHandle {
        tracing::info!(
            interval_ms = config.heartbeat_interval.as_millis() as u64,
            lease_ms = config.lease_duration.as_millis() as u64,
            "starting expiry monitor"
        );
        let monitor = Self::new(store, config.lease_duration);
        MonitorHandle {
            worker: BackgroundWorker::start(monitor, config.heartbeat_interval),
        }
    }
}

#[async_trait]
impl BackgroundRunnable for ExpiryMonitor {
    type Task = MonitorTask;

    fn name(&self) -> &'static str {
        "expiry-monitor"
    }

    async fn run(&mut self, task: MonitorTask) {
        match task {
            MonitorTask::SweepNow(reply) => {
                let expired = self.sweep();
                if let Some(reply) = reply {
                    let _ = reply.send(expired);
                }
            }
        }
    }

    async fn on_tick(&mut self) {
        self.sweep();
    }

    async fn shutdown(&mut self) {
        tracing::info!(sweeps = self.sweeps, "expiry monitor stopped");
    }
}

/// Lifecycle handle for a running [`ExpiryMonitor`].
pub struct MonitorHandle {
    worker: BackgroundWorker<ExpiryMonitor>,
}

impl MonitorHandle {
    /// Forces a sweep now and waits for its result.
    ///
    /// # Errors
    ///
    /// Returns an error if the monitor has been stopped.
    pub async fn sweep_now(&self) -> anyhow::Result<Vec<InstanceRecord>> {
        let (tx, rx) = oneshot::channel();
        self.worker.submit(MonitorTask::SweepNow(Some(tx))).await?;
        rx.await
            .map_err(|_| anyhow::anyhow!("expiry monitor dropped the sweep request"))
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    /// Stops the monitor and waits for the loop to exit.
    pub async fn stop(&mut self) {
        self.worker.stop().await;
    }
}
