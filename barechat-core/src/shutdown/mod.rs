//! Session teardown coordination
//!
//! The host loop and every front-end task subscribe to one coordinator. The
//! first shutdown request moves it out of `Running` and wakes all
//! subscribers; later requests are ignored.

use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info, warn};

/// Shutdown signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Leave the room politely, then release the swarm
    Graceful,
    /// Stop without sending a leave envelope
    Immediate,
}

/// Shutdown state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    ShuttingDown,
    Shutdown,
}

/// Broadcasts a single shutdown signal to every subscriber
pub struct ShutdownCoordinator {
    state: Arc<RwLock<ShutdownState>>,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);

        Self {
            state: Arc::new(RwLock::new(ShutdownState::Running)),
            shutdown_tx,
        }
    }

    /// Subscribe to shutdown notifications
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.shutdown_tx.subscribe()
    }

    /// Ask every subscriber to wind down gracefully
    pub async fn shutdown(&self) {
        self.signal(ShutdownSignal::Graceful).await;
    }

    /// Ask every subscriber to stop without a farewell
    pub async fn shutdown_immediately(&self) {
        self.signal(ShutdownSignal::Immediate).await;
    }

    async fn signal(&self, signal: ShutdownSignal) {
        let mut state = self.state.write().await;
        if *state != ShutdownState::Running {
            warn!("Shutdown already in progress");
            return;
        }
        *state = ShutdownState::ShuttingDown;
        drop(state);

        info!(?signal, "Initiating shutdown");
        if let Err(e) = self.shutdown_tx.send(signal) {
            // No subscribers left; nothing is running that needs telling.
            error!("Failed to send shutdown signal: {}", e);
        }
    }

    /// Record that teardown has finished
    pub async fn mark_complete(&self) {
        *self.state.write().await = ShutdownState::Shutdown;
        info!("Shutdown complete");
    }

    pub async fn is_shutting_down(&self) -> bool {
        *self.state.read().await != ShutdownState::Running
    }

    pub async fn state(&self) -> ShutdownState {
        *self.state.read().await
    }
}

/// Trigger a graceful shutdown on Ctrl+C (and SIGTERM on unix)
pub fn install_signal_handlers(coordinator: Arc<ShutdownCoordinator>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = sigterm.recv() => info!("Received SIGTERM"),
                        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C"),
                    }
                }
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Failed to listen for Ctrl+C: {}", e);
                        return;
                    }
                    info!("Received Ctrl+C");
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                return;
            }
            info!("Received Ctrl+C");
        }

        coordinator.shutdown().await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_coordinator() {
        let coordinator = ShutdownCoordinator::new();
        let mut rx = coordinator.subscribe();

        assert_eq!(coordinator.state().await, ShutdownState::Running);
        assert!(!coordinator.is_shutting_down().await);

        coordinator.shutdown().await;

        assert_eq!(rx.recv().await.unwrap(), ShutdownSignal::Graceful);
        assert_eq!(coordinator.state().await, ShutdownState::ShuttingDown);

        coordinator.mark_complete().await;
        assert_eq!(coordinator.state().await, ShutdownState::Shutdown);
    }

    #[tokio::test]
    async fn test_second_shutdown_is_ignored() {
        let coordinator = ShutdownCoordinator::new();
        let mut rx = coordinator.subscribe();

        coordinator.shutdown_immediately().await;
        coordinator.shutdown().await;

        assert_eq!(rx.recv().await.unwrap(), ShutdownSignal::Immediate);
        assert!(rx.try_recv().is_err());
    }
}
