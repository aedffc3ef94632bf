//! Service lifecycle management.
//!
//! Provides the main service runner with signal handling and graceful shutdown.

use std::sync::Arc;

use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api;
use crate::cloud::CloudClients;
use crate::config::ControlConfig;
use crate::deployment::DeploymentManager;
use crate::error::{ControlError, ControlResult};
use crate::queue::TaskQueue;
use crate::store::{DeploymentStore, MemoryStore};
use crate::worker::TaskWorker;

/// The control service.
///
/// Manages the lifecycle of the orchestrator, including:
/// - Control-plane clients
/// - The task queue and its worker pool
/// - HTTP API server
/// - Signal handling and graceful shutdown
pub struct ControlService {
    config: ControlConfig,
    cancel: CancellationToken,
}

impl ControlService {
    /// Create a new control service with the given configuration.
    #[must_use]
    pub fn new(config: ControlConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Run the control service.
    ///
    /// This will:
    /// 1. Build the control-plane clients for the configured provider
    /// 2. Create the deployment manager and task queue
    /// 3. Start the worker pool
    /// 4. Start the HTTP API server
    /// 5. Wait for shutdown signal, then let in-flight tasks finish
    pub async fn run(&self) -> ControlResult<()> {
        let clients = CloudClients::from_config(&self.config.cloud).await?;
        info!(
            provider = ?self.config.cloud.provider,
            region = %self.config.cloud.region,
            "control-plane clients configured"
        );

        if !self.config.package.base_archive.exists() {
            warn!(
                path = %self.config.package.base_archive.display(),
                "base archive not found, deploys will fail until it is present"
            );
        }

        let store: Arc<dyn DeploymentStore> = Arc::new(MemoryStore::new());
        let manager = Arc::new(DeploymentManager::new(&self.config, clients, store));
        let queue = Arc::new(
            TaskQueue::new(self.config.worker.max_queue_size)
                .with_retention(self.config.worker.task_retention()),
        );
        info!("deployment manager initialised");

        let workers_cancel = CancellationToken::new();
        let mut workers = JoinSet::new();
        for id in 0..self.config.worker.count {
            let worker = TaskWorker::new(id, Arc::clone(&queue), Arc::clone(&manager));
            let cancel = workers_cancel.child_token();
            workers.spawn(async move { worker.run(cancel).await });
        }
        info!(count = self.config.worker.count, "task workers started");

        let app = api::router(api::AppState { manager, queue });

        info!(listen = %self.config.server.listen, "control service listening");

        let served = serve(self.config.server.listen, app, self.cancel.clone()).await;

        workers_cancel.cancel();
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "task worker panicked");
            }
        }

        served?;
        info!("control service shutdown complete");
        Ok(())
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Serve an axum router over TCP with graceful shutdown.
async fn serve(
    addr: std::net::SocketAddr,
    app: axum::Router,
    cancel: CancellationToken,
) -> ControlResult<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ControlError::Config(format!("failed to bind TCP: {e}")))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await
        .map_err(|e| ControlError::internal(format!("server error: {e}")))
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            info!("received SIGTERM, initiating shutdown");
        }
        () = cancel.cancelled() => {
            info!("shutdown requested");
        }
    }
}
