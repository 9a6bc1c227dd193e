use std::sync::Arc;

use anyhow::Context;
use clustercore::{
    config::CoordinationConfig,
    core::{logging::init_structured_logging, maintenance::MaintenanceScheduler},
    presentation, DistributedOrchestrator,
};
use dotenv::dotenv;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = CoordinationConfig::from_env().context("failed to load coordination config")?;
    init_structured_logging(&config.logging)?;

    let orchestrator = Arc::new(DistributedOrchestrator::new(config.clone()));
    let scheduler = MaintenanceScheduler::start(orchestrator.clone(), config.maintenance_interval());

    let app = presentation::router(orchestrator.clone());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    info!(
        node_id = %orchestrator.node_id(),
        addr = %addr,
        cluster_size = config.cluster_size,
        "🚀 Coordination node started"
    );
    info!("📊 Health check: http://{}/api/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let ticks = scheduler.stop().await;
    info!(maintenance_ticks = ticks, "🛑 Coordination node stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
