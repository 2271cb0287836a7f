//! API server — HTTP REST surface and the Prometheus metrics exporter.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use funnel_core::config::AppConfig;
use funnel_core::oplog::OpsLog;
use funnel_orchestrator::FunnelEngine;
use funnel_store::{SnapshotStore, Stores};

use crate::{funnel_rest, rest, webhook};
use rest::AppState;

pub struct ApiServer {
    config: AppConfig,
    engine: Arc<FunnelEngine>,
    stores: Stores,
    oplog: Arc<OpsLog>,
    snapshots: Arc<SnapshotStore>,
}

impl ApiServer {
    pub fn new(
        config: AppConfig,
        engine: Arc<FunnelEngine>,
        stores: Stores,
        oplog: Arc<OpsLog>,
        snapshots: Arc<SnapshotStore>,
    ) -> Self {
        Self {
            config,
            engine,
            stores,
            oplog,
            snapshots,
        }
    }

    /// Start the HTTP REST server. Runs until the process exits.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let state = AppState {
            engine: self.engine.clone(),
            stores: self.stores.clone(),
            oplog: self.oplog.clone(),
            snapshots: self.snapshots.clone(),
            endpoints: self.config.gateway.instances.clone(),
            node_id: self.config.node_id.clone(),
            start_time: Instant::now(),
        };

        let app = Router::new()
            // Gateway intake
            .route("/webhook/evolution", post(webhook::handle_webhook))
            // Operator surface
            .route("/api/dashboard", get(rest::dashboard))
            .route("/api/conversations", get(rest::list_conversations))
            .route(
                "/api/conversation/:contact_key/pause",
                post(rest::pause_conversation),
            )
            .route(
                "/api/conversation/:contact_key/resume",
                post(rest::resume_conversation),
            )
            .route(
                "/api/conversation/:contact_key/select-funnel",
                post(rest::select_funnel),
            )
            .route("/api/logs", get(rest::logs))
            // Funnel CRUD
            .route(
                "/api/funnels",
                get(funnel_rest::list_funnels).post(funnel_rest::upsert_funnel),
            )
            .route(
                "/api/funnels/:funnel_id/move-step",
                post(funnel_rest::move_step),
            )
            .route("/api/funnels/export", get(funnel_rest::export_funnels))
            .route("/api/funnels/import", post(funnel_rest::import_funnels))
            // Operational endpoints
            .route("/health", get(rest::health_check))
            // Middleware
            .layer(CompressionLayer::new())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// Start the metrics exporter on a separate port.
    pub async fn start_metrics(&self) -> anyhow::Result<()> {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        let handle = builder
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install_recorder()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");

        // Keep the handle alive
        std::mem::forget(handle);
        Ok(())
    }
}
