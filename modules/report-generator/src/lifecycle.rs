//! Process lifecycle around the report request consumer
//!
//! The consumer runs in its own task. [`supervise`] waits for whichever comes
//! first:
//!
//! - a shutdown signal: the consumer is told to stop and given `drain_timeout`
//!   to settle in-flight deliveries
//! - the consumer task ending by itself: the subscription failed, the
//!   delivery stream ended or the task panicked, and the process must exit

use event_bus::BusResult;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How the consumer task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerExit {
    /// Stopped on request and drained in time
    Graceful,
    /// Stopped on request but did not drain within the timeout
    TimedOut,
    /// Returned an error or panicked
    Failed,
    /// Returned cleanly without being asked to stop
    Unexpected,
}

impl ConsumerExit {
    /// Whether the process should exit with a success code
    pub fn is_success(&self) -> bool {
        matches!(self, ConsumerExit::Graceful)
    }
}

/// Wait for `signal` or for the consumer to end on its own, whichever is first.
pub async fn supervise<S>(
    mut handle: JoinHandle<BusResult<()>>,
    shutdown_tx: watch::Sender<bool>,
    signal: S,
    drain_timeout: Duration,
) -> ConsumerExit
where
    S: Future<Output = ()>,
{
    tokio::select! {
        finished = &mut handle => {
            match finished {
                Ok(Ok(())) => {
                    tracing::error!("Report consumer stopped without a shutdown request");
                    ConsumerExit::Unexpected
                }
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Report consumer failed");
                    ConsumerExit::Failed
                }
                Err(e) => {
                    tracing::error!(error = %e, "Report consumer task panicked");
                    ConsumerExit::Failed
                }
            }
        }
        _ = signal => {
            tracing::info!("Shutdown signal received, draining in-flight reports");
            let _ = shutdown_tx.send(true);

            match tokio::time::timeout(drain_timeout, handle).await {
                Ok(Ok(Ok(()))) => {
                    tracing::info!("Report generator stopped gracefully");
                    ConsumerExit::Graceful
                }
                Ok(Ok(Err(e))) => {
                    tracing::error!(error = %e, "Report consumer failed during shutdown");
                    ConsumerExit::Failed
                }
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Report consumer task panicked");
                    ConsumerExit::Failed
                }
                Err(_) => {
                    tracing::warn!("Report consumer shutdown timed out");
                    ConsumerExit::TimedOut
                }
            }
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
