//! Medic Collector - sampling and normalisation service.

use std::sync::Arc;

use medic_core::bus::{EventBus, RedisEventBus};
use medic_core::collector::CollectorService;
use medic_core::config::CollectorConfig;
use medic_core::knowledge::GrpcKnowledge;
use medic_core::observability;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CollectorConfig::load().unwrap_or_else(|e| {
        eprintln!("Warning: could not load config: {}. Using defaults.", e);
        CollectorConfig::default()
    });

    observability::init(
        "medic-collector",
        config.observability.otlp_endpoint.as_deref(),
    )?;
    observability::metrics::register_metrics();
    let _prometheus = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Medic Collector"
    );

    let knowledge = Arc::new(
        GrpcKnowledge::connect(&config.knowledge_address, config.rpc_timeout).await?,
    );

    // The Analyser stream is authoritative; the bus is dashboard fanout and
    // the collector degrades gracefully without it.
    let bus: Option<Arc<dyn EventBus>> =
        match RedisEventBus::connect(&config.event_bus_url, config.rpc_timeout).await {
            Ok(bus) => {
                tracing::info!(url = %config.event_bus_url, "Connected to event bus");
                Some(Arc::new(bus))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Event bus unreachable; snapshot fanout disabled");
                None
            }
        };

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    CollectorService::new(config, knowledge, bus)
        .run(cancel)
        .await?;

    observability::shutdown();
    tracing::info!("Collector shutdown complete");
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
