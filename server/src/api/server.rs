//! API server initialization

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use super::routes::health::HealthState;
use super::routes::{buffer, health, quality, rollups};
use super::types::handle_404;
use crate::core::CoreApp;

pub struct ApiServer {
    app: CoreApp,
}

impl ApiServer {
    pub fn new(app: CoreApp) -> Self {
        Self { app }
    }

    /// Serve until shutdown; returns CoreApp for graceful shutdown
    pub async fn start(self) -> Result<CoreApp> {
        let Self { app } = self;

        let shutdown = app.shutdown.clone();

        let host = app.config.server.host.clone();
        let port = app.config.server.port;
        let addr = SocketAddr::new(
            host.parse()
                .with_context(|| format!("Invalid server host: {}", host))?,
            port,
        );

        let health_state = HealthState {
            pipeline: app.pipeline_stats.clone(),
            uploader: app.uploader.clone(),
            rollups: app.rollups.clone(),
            ledger: app.ledger.clone(),
        };

        let router = Router::new()
            .route("/api/v1/health", get(health::health).with_state(health_state))
            .nest("/api/v1/rollups", rollups::routes(app.rollups.clone()))
            .nest("/api/v1/quality", quality::routes(app.quality.clone()))
            .nest("/api/v1/buffer", buffer::routes(app.rotation.clone()))
            .fallback(handle_404)
            .layer(TraceLayer::new_for_http());

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        tracing::info!(addr = %addr, "Query server listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.wait())
            .await?;

        Ok(app)
    }
}
