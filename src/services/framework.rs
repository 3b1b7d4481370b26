//! Service Framework
//!
//! Background services run as spawned tasks that listen on a broadcast
//! shutdown channel. A [`ServiceHandle`] owns the task and the sender, so
//! dropping or shutting down the handle stops the service.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

// ============================================================================
// Service Trait
// ============================================================================

/// Trait for implementing background services
#[async_trait::async_trait]
pub trait Service: Send + Sync {
    /// Run the service until the shutdown signal fires
    async fn start(&self, shutdown: broadcast::Receiver<()>) -> Result<(), ServiceError>;

    /// Service name for logging and identification
    fn name(&self) -> &'static str;

    /// Current status of the service
    fn status(&self) -> ServiceStatus;
}

// ============================================================================
// Service Status
// ============================================================================

/// Status of a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceStatus {
    /// Service is initializing
    Starting,

    /// Service is running normally
    Running,

    /// Service has stopped
    Stopped,

    /// Service failed with an error
    Failed(String),
}

impl ServiceStatus {
    /// Check if the service is in a healthy state
    pub fn is_healthy(&self) -> bool {
        matches!(self, ServiceStatus::Running)
    }

    /// Check if the service has stopped (normally or due to failure)
    pub fn is_stopped(&self) -> bool {
        matches!(self, ServiceStatus::Stopped | ServiceStatus::Failed(_))
    }
}

// ============================================================================
// Service Error
// ============================================================================

/// Errors that can occur in services
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Service encountered an error during execution
    #[error("Service runtime error: {0}")]
    RuntimeError(String),

    /// Service failed to shut down cleanly
    #[error("Service shutdown error: {0}")]
    ShutdownError(String),

    /// Shutdown was requested twice
    #[error("Service already stopped")]
    AlreadyStopped,
}

// ============================================================================
// Service Handle
// ============================================================================

/// Handle for a running service
pub struct ServiceHandle {
    service: Arc<dyn Service>,
    shutdown_tx: broadcast::Sender<()>,
    task: Option<JoinHandle<Result<(), ServiceError>>>,
    started_at: Instant,
}

impl ServiceHandle {
    /// Spawn a service on the current runtime
    pub fn spawn(service: Arc<dyn Service>) -> Self {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let runner = Arc::clone(&service);
        let task = tokio::spawn(async move { runner.start(shutdown_rx).await });

        tracing::debug!(service = service.name(), "Service started");
        Self {
            service,
            shutdown_tx,
            task: Some(task),
            started_at: Instant::now(),
        }
    }

    /// Name of the wrapped service
    pub fn name(&self) -> &'static str {
        self.service.name()
    }

    /// Current status of the wrapped service
    pub fn status(&self) -> ServiceStatus {
        self.service.status()
    }

    /// Time since the service was spawned
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Signal shutdown and wait for the task, aborting it after `timeout`
    pub async fn shutdown(&mut self, timeout: Duration) -> Result<(), ServiceError> {
        let Some(mut task) = self.task.take() else {
            return Err(ServiceError::AlreadyStopped);
        };
        let name = self.service.name();

        // No receiver left means the task already returned
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(Ok(()))) => {
                tracing::debug!(service = name, "Service stopped gracefully");
                Ok(())
            },
            Ok(Ok(Err(e))) => {
                tracing::warn!(service = name, error = %e, "Service stopped with error");
                Err(e)
            },
            Ok(Err(e)) => {
                tracing::error!(service = name, error = %e, "Service task panicked");
                Err(ServiceError::ShutdownError(e.to_string()))
            },
            Err(_) => {
                tracing::warn!(service = name, "Service shutdown timed out, aborting");
                task.abort();
                Err(ServiceError::ShutdownError(format!(
                    "{} did not stop within {:?}",
                    name, timeout
                )))
            },
        }
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = self.shutdown_tx.send(());
            task.abort();
        }
    }
}
