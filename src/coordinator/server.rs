//! Config node server

use crate::common::{BackendKind, Error, NodeConfig, Result};
use crate::coordinator::backend::{ConfigBackend, FileBackend, MemoryBackend};
use crate::coordinator::fleet::HttpFleetProbe;
use crate::coordinator::http::{create_router, ConfigApiState};
use crate::coordinator::rollout::RolloutCoordinator;
use crate::coordinator::store::ConfigStore;
use std::sync::Arc;
use std::time::Duration;

pub struct ConfigServer {
    config: NodeConfig,
}

impl ConfigServer {
    pub fn new(config: NodeConfig) -> Self {
        Self { config }
    }

    pub fn open_backend(&self) -> Result<Arc<dyn ConfigBackend>> {
        match self.config.backend {
            BackendKind::Memory => Ok(Arc::new(MemoryBackend::new())),
            BackendKind::File => {
                let path = self.config.state_path.as_ref().ok_or_else(|| {
                    Error::InvalidConfig("file backend requires state_path".into())
                })?;
                Ok(Arc::new(FileBackend::new(path)?))
            }
        }
    }

    /// Wire store, fleet probe, and rollout coordinator together
    pub fn build_state(&self) -> Result<ConfigApiState> {
        let store = Arc::new(ConfigStore::open(self.open_backend()?)?);
        let probe = Arc::new(HttpFleetProbe::new(&self.config.probe)?);
        let rollout = RolloutCoordinator::new(store, probe, self.config.rollout.clone());
        Ok(ConfigApiState::new(rollout, self.config.hostname.clone()))
    }

    pub async fn serve(self) -> Result<()> {
        self.config.validate()?;

        tracing::info!("Starting fleetconf node: {}", self.config.hostname);
        tracing::info!("  HTTP API: {}", self.config.bind_addr);
        tracing::info!("  Backend: {:?}", self.config.backend);
        if let Some(path) = &self.config.state_path {
            tracing::info!("  State file: {}", path.display());
        }

        let state = self.build_state()?;
        let _refresh = spawn_refresh(
            state.rollout.store().clone(),
            self.config.rollout.poll_interval(),
        );

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!("✓ fleetconf node ready");

        axum::serve(listener, create_router(state))
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("fleetconf node stopped");
        Ok(())
    }
}

/// Periodically pull writes other processes made to a shared backend
pub fn spawn_refresh(store: Arc<ConfigStore>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = store.refresh() {
                tracing::warn!("config refresh failed: {}", e);
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
