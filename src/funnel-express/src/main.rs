//! Funnel Express — keyword-triggered WhatsApp funnel orchestration server.
//!
//! Main entry point that wires the stores, delivery engine, orchestrator
//! and API server together.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use funnel_api::ApiServer;
use funnel_core::config::AppConfig;
use funnel_core::oplog::OpsLog;
use funnel_delivery::{DeliveryEngine, EvolutionGateway};
use funnel_orchestrator::FunnelEngine;
use funnel_store::{SnapshotStore, Stores};

#[derive(Parser, Debug)]
#[command(name = "funnel-express")]
#[command(about = "Keyword-triggered WhatsApp funnel orchestration server")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "FUNNEL_EXPRESS__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "FUNNEL_EXPRESS__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Snapshot data directory (overrides config)
    #[arg(long, env = "FUNNEL_EXPRESS__STORAGE__DATA_DIR")]
    data_dir: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "funnel_express=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Funnel Express starting up");

    // Load configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        instances = config.gateway.instances.len(),
        data_dir = %config.storage.data_dir,
        "Configuration loaded"
    );

    let stores = Stores::new();
    let oplog = Arc::new(OpsLog::new());
    let snapshots = Arc::new(SnapshotStore::new(config.storage.data_dir.clone()));

    // Restore persisted state; fall back to the built-in funnels.
    if !snapshots.load_funnels(&stores.catalog).await {
        stores.catalog.seed_defaults();
    }
    snapshots
        .load_conversations(&stores.conversations, &stores.routes, &stores.history)
        .await;
    info!(
        funnels = stores.catalog.len(),
        conversations = stores.conversations.len(),
        "State restored"
    );

    let gateway = Arc::new(EvolutionGateway::new(&config.gateway)?);
    let delivery = Arc::new(DeliveryEngine::new(
        gateway,
        stores.routes.clone(),
        config.gateway.instances.clone(),
        &config.engine,
        oplog.clone(),
    ));
    let engine = Arc::new(FunnelEngine::new(
        stores.clone(),
        delivery,
        &config.engine,
        config.keywords.clone(),
        oplog.clone(),
    ));

    // Periodic snapshot flush
    let flush_snapshots = snapshots.clone();
    let flush_stores = stores.clone();
    let flush_interval = Duration::from_secs(config.storage.snapshot_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(flush_interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            flush_snapshots.flush(&flush_stores).await;
        }
    });

    let api_server = ApiServer::new(config, engine, stores, oplog, snapshots);

    // Start metrics exporter
    if let Err(e) = api_server.start_metrics().await {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("Funnel Express is ready to serve traffic");

    // Start HTTP server (blocks until shutdown)
    api_server.start_http().await?;

    Ok(())
}
