//! Retention and optimization sweeper
//!
//! Runs [`StorageEngine::optimize`] for every stream once per interval. The
//! first pass happens one interval after start, not immediately.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::framework::{Service, ServiceError, ServiceStatus};
use crate::config::MAX_OPTIMIZATION_INTERVAL_MINUTES;
use crate::storage::StorageEngine;

/// Periodic retention/optimization service
pub struct RetentionSweeper {
    engine: Arc<StorageEngine>,
    period: Duration,
    status: RwLock<ServiceStatus>,
    passes: AtomicU64,
}

impl RetentionSweeper {
    /// Create a sweeper over `engine` running every `period`
    ///
    /// Periods are clamped to between one millisecond and one year.
    pub fn new(engine: Arc<StorageEngine>, period: Duration) -> Self {
        let max = Duration::from_secs(MAX_OPTIMIZATION_INTERVAL_MINUTES * 60);
        Self {
            engine,
            period: period.clamp(Duration::from_millis(1), max),
            status: RwLock::new(ServiceStatus::Starting),
            passes: AtomicU64::new(0),
        }
    }

    /// Completed passes, including rejected overlapping ones
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    async fn sweep(&self) {
        let result = self.engine.optimize(None).await;
        self.passes.fetch_add(1, Ordering::Relaxed);

        if result.success {
            for action in &result.optimization_actions {
                tracing::debug!(action = %action, "Sweep action");
            }
        } else {
            tracing::warn!(
                error = result.error_message.as_deref().unwrap_or("unknown"),
                "Sweep pass did not run"
            );
        }
    }
}

#[async_trait::async_trait]
impl Service for RetentionSweeper {
    async fn start(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ServiceError> {
        *self.status.write() = ServiceStatus::Running;
        tracing::info!(period_secs = self.period.as_secs(), "Retention sweeper started");

        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                result = shutdown.recv() => {
                    match result {
                        Ok(()) | Err(broadcast::error::RecvError::Closed) => {
                            tracing::debug!("Retention sweeper received shutdown signal");
                            break;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::debug!(missed = n, "Retention sweeper broadcast receiver lagged");
                        }
                    }
                }

                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }

        *self.status.write() = ServiceStatus::Stopped;
        tracing::info!(passes = self.passes(), "Retention sweeper stopped");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "retention_sweeper"
    }

    fn status(&self) -> ServiceStatus {
        self.status.read().clone()
    }
}
