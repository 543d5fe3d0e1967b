//! Medic Analyser - detection and verification service.

use std::net::SocketAddr;
use std::sync::Arc;

use medic_core::analyser::{Analyser, MetricsRpcService};
use medic_core::api::proto::metrics_service_server::MetricsServiceServer;
use medic_core::bus::RedisEventBus;
use medic_core::config::AnalyserConfig;
use medic_core::knowledge::GrpcKnowledge;
use medic_core::observability;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AnalyserConfig::load().unwrap_or_else(|e| {
        eprintln!("Warning: could not load config: {}. Using defaults.", e);
        AnalyserConfig::default()
    });

    observability::init(
        "medic-analyser",
        config.observability.otlp_endpoint.as_deref(),
    )?;
    observability::metrics::register_metrics();
    let _prometheus = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Medic Analyser"
    );

    let knowledge = Arc::new(
        GrpcKnowledge::connect(&config.knowledge_address, config.rpc_timeout).await?,
    );

    // The bus carries detections to the Executor; without it the analyser has
    // no delivery path, so an unreachable bus is fatal at startup.
    let bus = Arc::new(RedisEventBus::connect(&config.event_bus_url, config.rpc_timeout).await?);
    tracing::info!(url = %config.event_bus_url, "Connected to event bus");

    let analyser = Arc::new(Analyser::new(&config, knowledge, bus));
    analyser.refresh_thresholds(&config.thresholds).await;

    let cancel = CancellationToken::new();

    let subscriber = analyser.clone();
    let subscriber_cancel = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = subscriber.run_completion_subscriber(subscriber_cancel).await {
            tracing::error!(error = %e, "Completion subscriber failed");
        }
    });

    let addr: SocketAddr = format!("0.0.0.0:{}", config.grpc_port).parse()?;
    tracing::info!(address = %addr, "Serving MetricsService");

    let shutdown_cancel = cancel.clone();
    tonic::transport::Server::builder()
        .add_service(MetricsServiceServer::new(MetricsRpcService::new(analyser)))
        .serve_with_shutdown(addr, async move {
            shutdown_signal().await;
            shutdown_cancel.cancel();
        })
        .await?;

    observability::shutdown();
    tracing::info!("Analyser shutdown complete");
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
