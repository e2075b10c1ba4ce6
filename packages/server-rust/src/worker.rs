//! Background worker for periodic and on-demand tasks.
//!
//! Provides a generic `BackgroundWorker<R>` that processes tasks from an mpsc channel
//! via a `BackgroundRunnable` implementation, with a fixed-interval tick callback.
//! A panic inside `run` or `on_tick` is logged and the loop keeps going, so one
//! bad tick never takes the worker down.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Trait for task handlers executed by `BackgroundWorker`.
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    /// The type of task this runnable processes.
    type Task: Send + 'static;

    /// Name used in log lines.
    fn name(&self) -> &'static str;

    /// Process a single submitted task.
    async fn run(&mut self, task: Self::Task);

    /// Called on each tick interval. Default is a no-op.
    async fn on_tick(&mut self) {}

    /// Called once when the worker is shutting down. Default is a no-op.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Generic background worker with an explicit start/stop lifecycle.
///
/// The spawned tokio task:
/// 1. Calls `BackgroundRunnable::run()` for each submitted task
/// 2. Calls `BackgroundRunnable::on_tick()` every `tick_interval`
/// 3. Calls `BackgroundRunnable::shutdown()` once when stopped
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: Option<mpsc::Sender<R::Task>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Starts the worker. Must be called inside a tokio runtime.
    ///
    /// The first tick fires one full interval after start. Ticks missed
    /// because a previous tick overran are delayed, not bunched up.
    pub fn start(mut runnable: R, tick_interval: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<R::Task>(64);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let name = runnable.name();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(
                tokio::time::Instant::now() + tick_interval,
                tick_interval,
            );
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::debug!(worker = name, interval_ms = tick_interval.as_millis() as u64, "worker started");

            loop {
                tokio::select! {
                    task = rx.recv() => {
                        let Some(task) = task else { break };
                        if AssertUnwindSafe(runnable.run(task)).catch_unwind().await.is_err() {
                            tracing::error!(worker = name, "task panicked; worker continues");
                        }
                    }
                    _ = ticker.tick() => {
                        if AssertUnwindSafe(runnable.on_tick()).catch_unwind().await.is_err() {
                            tracing::error!(worker = name, "tick panicked; retrying next interval");
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }

            runnable.shutdown().await;
            tracing::debug!(worker = name, "worker stopped");
        });

        Self {
            tx: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Submit a task to the worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has been stopped.
    pub async fn submit(&self, task: R::Task) -> anyhow::Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(task)
                .await
                .map_err(|_| anyhow::anyhow!("worker channel closed")),
            None => Err(anyhow::anyhow!("worker not running")),
        }
    }

    /// Whether `stop` has not been called yet and the task is still alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops the worker and waits for its task to finish.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl<R: BackgroundRunnable> Drop for BackgroundWorker<R> {
    fn drop(&mut self) {
        // Dropped without `stop()`: cancel rather than leak the loop.
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
