//! Medic Knowledge - keyed hot-state store service.

use std::net::SocketAddr;
use std::sync::Arc;

use medic_core::api::proto::knowledge_service_server::KnowledgeServiceServer;
use medic_core::config::KnowledgeConfig;
use medic_core::knowledge::{KnowledgeRpcService, KnowledgeStore};
use medic_core::observability;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = KnowledgeConfig::load().unwrap_or_else(|e| {
        eprintln!("Warning: could not load config: {}. Using defaults.", e);
        KnowledgeConfig::default()
    });

    observability::init(
        "medic-knowledge",
        config.observability.otlp_endpoint.as_deref(),
    )?;
    observability::metrics::register_metrics();
    let _prometheus = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Medic Knowledge"
    );

    let store = Arc::new(KnowledgeStore::new(
        config.resolved_detection_ttl,
        config.action_retention,
    ));

    // TTL scavenger for resolved detections and aged-out terminal actions.
    let sweeper_store = store.clone();
    let sweep_interval = config.sweep_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            sweeper_store.sweep(chrono::Utc::now());
        }
    });

    let addr: SocketAddr = format!("{}:{}", config.bind_host, config.grpc_port).parse()?;
    tracing::info!(address = %addr, "Serving KnowledgeService");

    tonic::transport::Server::builder()
        .add_service(KnowledgeServiceServer::new(KnowledgeRpcService::new(store)))
        .serve_with_shutdown(addr, shutdown_signal())
        .await?;

    observability::shutdown();
    tracing::info!("Knowledge shutdown complete");
    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
