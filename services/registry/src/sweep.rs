//! Periodic reclamation of abandoned uploads.

use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::uploads::UploadManager;

/// Background task calling [`UploadManager::reclaim_expired`] on a fixed interval.
#[derive(Debug, Clone)]
pub struct ExpirySweeper {
    uploads: UploadManager,
    interval: Duration,
    timeout: Duration,
}

impl ExpirySweeper {
    /// A sweeper using the manager's configured interval and timeout.
    pub fn new(uploads: UploadManager) -> Self {
        let config = *uploads.config();
        Self {
            uploads,
            interval: config.cleanup_interval(),
            timeout: config.session_timeout(),
        }
    }

    /// Override the sweep interval.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Override the session timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run one sweep, logging rather than returning failures.
    pub async fn sweep(&self) -> usize {
        match self.uploads.reclaim_expired(Utc::now(), self.timeout).await {
            Ok(count) => {
                tracing::debug!(count, "Expiry sweep finished");
                count
            }
            Err(error) => {
                tracing::error!(%error, "Expiry sweep failed");
                0
            }
        }
    }

    /// Sweep every interval until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        tracing::info!(interval = ?self.interval, timeout = ?self.timeout, "Expiry sweeper started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }
        tracing::info!("Expiry sweeper stopped");
    }

    /// Spawn [`run`](Self::run) onto the current runtime.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
