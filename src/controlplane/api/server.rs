//! API Server
//!
//! Binds the REST router and runs it until shutdown is requested.

use super::rest::RestRouter;
use crate::controlplane::orchestrator::LifecycleOrchestrator;
use crate::error::{Error, Result};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Request bodies are small JSON documents
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

/// Configuration for the API server
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// REST API bind address
    pub rest_addr: SocketAddr,
    /// Max request body size in bytes
    pub max_body_size: usize,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            rest_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

/// REST API server with broadcast-driven graceful shutdown
pub struct ApiServer {
    config: ApiServerConfig,
    orchestrator: Arc<LifecycleOrchestrator>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, orchestrator: Arc<LifecycleOrchestrator>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            orchestrator,
            shutdown_tx,
        }
    }

    /// Bind and serve until [`ApiServer::shutdown`] is called
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.rest_addr).await.map_err(|e| {
            Error::Configuration(format!("cannot bind {}: {}", self.config.rest_addr, e))
        })?;

        let router = RestRouter::new(self.orchestrator.clone())
            .with_body_limit(self.config.max_body_size)
            .build();

        let result = serve(listener, router, self.shutdown_tx.subscribe()).await;
        if let Err(e) = &result {
            error!("REST server stopped: {}", e);
        }
        result
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Serve `router` on an already bound listener
pub async fn serve(
    listener: TcpListener,
    router: Router,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("REST API listening on {}", addr);
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("REST server shutting down");
        })
        .await
        .map_err(|e| Error::Internal(format!("REST server error: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogSnapshot, CatalogStore};
    use crate::controlplane::backends::BackendFactory;
    use crate::controlplane::orchestrator::OrchestratorConfig;
    use assert_matches::assert_matches;

    fn orchestrator() -> Arc<LifecycleOrchestrator> {
        let (backends, _, _) = BackendFactory::standalone();
        LifecycleOrchestrator::new(
            OrchestratorConfig::default(),
            CatalogStore::from_snapshot(CatalogSnapshot::empty()),
            backends,
            None,
        )
    }

    #[test]
    fn test_default_config() {
        let config = ApiServerConfig::default();
        assert_eq!(config.rest_addr.port(), 8000);
        assert_eq!(config.max_body_size, DEFAULT_MAX_BODY_SIZE);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = ApiServer::new(
            ApiServerConfig {
                rest_addr: taken.local_addr().unwrap(),
                ..Default::default()
            },
            orchestrator(),
        );
        assert_matches!(server.run().await, Err(Error::Configuration(_)));
    }

    #[tokio::test]
    async fn test_shutdown_stops_serving() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let router = RestRouter::new(orchestrator()).build();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(serve(listener, router, shutdown_rx));

        shutdown_tx.send(()).unwrap();
        assert!(handle.await.unwrap().is_ok());
    }
}
