//! Load balancer entry point.

use balancer::{
    create_router, AppState, Config, DockerOrchestrator, HealthMonitor, ReplicaSupervisor,
    Router,
};
use clap::Parser;
use corelib::Topology;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::parse();
    info!(?config, "starting balancer");

    let topology = Arc::new(Topology::new());
    let orchestrator = Arc::new(DockerOrchestrator::new());
    let supervisor = Arc::new(ReplicaSupervisor::new(
        topology.clone(),
        orchestrator.clone(),
        &config,
    ));

    // Bring the pool up. Failures degrade gracefully: whatever came up
    // serves traffic, the next scale request or probe cycle keeps healing.
    if let Err(err) = supervisor
        .scale_to(config.target_replicas, Vec::new())
        .await
    {
        error!(error = %err, "initial provisioning incomplete");
    }

    let (dead_tx, dead_rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let monitor = Arc::new(HealthMonitor::new(
        topology.clone(),
        orchestrator,
        &config,
        dead_tx,
    ));
    let monitor_task = monitor.clone().spawn(shutdown_rx);
    let supervisor_task = supervisor.clone().run(dead_rx);

    let router = Arc::new(Router::new(
        topology.clone(),
        monitor,
        config.forward_timeout(),
    ));
    let app = create_router(AppState::new(topology, supervisor, router));

    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    info!(addr = %config.listen, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // Stop the probe loop; the supervisor loop ends once the death channel
    // drops.
    let _ = shutdown_tx.send(true);
    let _ = monitor_task.await;
    drop(supervisor_task);

    Ok(())
}
