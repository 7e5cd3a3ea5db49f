use std::net::SocketAddr;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, trace, warn};

use crate::services::Service;
use crate::state::{AppState, ServiceStatus};
use crate::web::create_router;

/// HTTP surface: manual triggers, health and status.
pub struct WebService {
    port: u16,
    app_state: AppState,
    shutdown_tx: Option<broadcast::Sender<()>>,
}

impl WebService {
    pub fn new(port: u16, app_state: AppState) -> Self {
        Self {
            port,
            app_state,
            shutdown_tx: None,
        }
    }
}

#[async_trait::async_trait]
impl Service for WebService {
    fn name(&self) -> &'static str {
        "web"
    }

    async fn run(&mut self) -> Result<(), anyhow::Error> {
        let app = create_router(self.app_state.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind web server to {addr}"))?;
        self.app_state
            .service_statuses
            .set(self.name(), ServiceStatus::Active);
        info!(
            service = "web",
            address = %addr,
            link = format!("http://localhost:{}", addr.port()),
            "web server listening"
        );

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                trace!(service = "web", "graceful shutdown signal received");
            })
            .await
            .context("web server failed")?;

        info!(service = "web", "web server stopped");
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), anyhow::Error> {
        self.app_state
            .service_statuses
            .set(self.name(), ServiceStatus::Disabled);
        match self.shutdown_tx.take() {
            Some(shutdown_tx) => {
                let _ = shutdown_tx.send(());
            }
            None => warn!(service = "web", "no shutdown channel found, cannot trigger graceful shutdown"),
        }
        Ok(())
    }
}
