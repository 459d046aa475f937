//! Signal handling for graceful shutdown.
//!
//! SIGINT and SIGTERM cancel a [`ShutdownToken`] shared by the decision
//! stream and the event loop.

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A token that can be shared across tasks to observe shutdown.
#[derive(Clone, Default)]
pub struct ShutdownToken {
    inner: CancellationToken,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if shutdown has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Request shutdown of every holder of this token.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Resolves once shutdown has been requested.
    pub async fn cancelled(&self) {
        self.inner.cancelled().await;
    }
}

/// Listens for SIGINT and SIGTERM and cancels its token on either.
///
/// Dropping the guard stops listening.
pub struct ShutdownGuard {
    token: ShutdownToken,
    task: tokio::task::JoinHandle<()>,
}

impl ShutdownGuard {
    /// Start listening for signals.
    ///
    /// If signal handlers cannot be registered (e.g., in restricted environments),
    /// the guard is still created but only [`ShutdownToken::cancel`] stops the bouncer.
    pub fn new() -> Self {
        let token = ShutdownToken::new();
        let trigger = token.clone();

        let task = tokio::spawn(async move {
            let sigint = match signal(SignalKind::interrupt()) {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!("Failed to register SIGINT handler: {}", e);
                    None
                }
            };

            let sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!("Failed to register SIGTERM handler: {}", e);
                    None
                }
            };

            match (sigint, sigterm) {
                (Some(mut int), Some(mut term)) => {
                    tokio::select! {
                        _ = int.recv() => info!("Received SIGINT, initiating graceful shutdown..."),
                        _ = term.recv() => info!("Received SIGTERM, initiating graceful shutdown..."),
                    }
                }
                (Some(mut int), None) => {
                    int.recv().await;
                    info!("Received SIGINT, initiating graceful shutdown...");
                }
                (None, Some(mut term)) => {
                    term.recv().await;
                    info!("Received SIGTERM, initiating graceful shutdown...");
                }
                (None, None) => {
                    warn!("No signal handlers registered - graceful shutdown disabled");
                    return;
                }
            }
            trigger.cancel();
        });

        Self { token, task }
    }

    /// Token cancelled when a signal arrives.
    pub fn token(&self) -> ShutdownToken {
        self.token.clone()
    }
}

impl Default for ShutdownGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}
