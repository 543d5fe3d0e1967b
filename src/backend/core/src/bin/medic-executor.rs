//! Medic Executor - action dispatch and remediation service.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use medic_core::api::proto::executor_service_server::ExecutorServiceServer;
use medic_core::bus::RedisEventBus;
use medic_core::config::ExecutorConfig;
use medic_core::executor::http::{build_router, HttpState};
use medic_core::executor::{DockerEngine, Executor, ExecutorRpcService, PostgresActionAdapter};
use medic_core::health::{BusHealthChecker, HealthChecker, KnowledgeHealthChecker};
use medic_core::knowledge::{GrpcKnowledge, KnowledgeApi};
use medic_core::observability;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ExecutorConfig::load().unwrap_or_else(|e| {
        eprintln!("Warning: could not load config: {}. Using defaults.", e);
        ExecutorConfig::default()
    });

    observability::init(
        "medic-executor",
        config.observability.otlp_endpoint.as_deref(),
    )?;
    observability::metrics::register_metrics();
    let prometheus = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Medic Executor"
    );

    // The Executor receives all of its work over the bus: unreachable bus
    // means a non-functional service, which is fatal at startup.
    let bus = Arc::new(RedisEventBus::connect(&config.event_bus_url, config.rpc_timeout).await?);
    tracing::info!(url = %config.event_bus_url, "Connected to event bus");

    let knowledge = Arc::new(
        GrpcKnowledge::connect(&config.knowledge_address, config.rpc_timeout).await?,
    );

    // The remediation adapter points at the onboarded target database.
    let target = await_target(knowledge.as_ref()).await;
    let adapter = Arc::new(PostgresActionAdapter::connect(&target).await?);
    tracing::info!("Remediation adapter connected");

    let containers = Arc::new(DockerEngine::new(&config.container_runtime_url)?);

    let executor = Arc::new(Executor::new(
        config.clone(),
        knowledge.clone(),
        bus.clone(),
        adapter,
        containers,
        target,
    ));

    let cancel = CancellationToken::new();

    let loop_executor = executor.clone();
    let loop_cancel = cancel.clone();
    let bus_loop = tokio::spawn(async move { loop_executor.run(loop_cancel).await });

    // REST surface: rollback, approvals, status, health, metrics scrape.
    let checkers: Vec<Arc<dyn HealthChecker>> = vec![
        Arc::new(BusHealthChecker::new(bus)),
        Arc::new(KnowledgeHealthChecker::new(knowledge)),
    ];
    let http_state = HttpState {
        executor: executor.clone(),
        prometheus: Some(prometheus),
        checkers,
    };
    let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let http_cancel = cancel.clone();
    let http = tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(http_addr).await?;
        tracing::info!(address = %http_addr, "Serving HTTP");
        axum::serve(listener, build_router(http_state))
            .with_graceful_shutdown(async move { http_cancel.cancelled().await })
            .await?;
        Ok::<_, anyhow::Error>(())
    });

    let grpc_addr: SocketAddr = format!("0.0.0.0:{}", config.grpc_port).parse()?;
    tracing::info!(address = %grpc_addr, "Serving ExecutorService");

    let shutdown_cancel = cancel.clone();
    tonic::transport::Server::builder()
        .add_service(ExecutorServiceServer::new(ExecutorRpcService::new(executor)))
        .serve_with_shutdown(grpc_addr, async move {
            shutdown_signal().await;
            shutdown_cancel.cancel();
        })
        .await?;

    let _ = bus_loop.await;
    let _ = http.await;

    observability::shutdown();
    tracing::info!("Executor shutdown complete");
    Ok(())
}

/// Poll Knowledge until onboarding delivers the target connection descriptor.
async fn await_target(knowledge: &dyn KnowledgeApi) -> String {
    loop {
        match knowledge.get_system_config().await {
            Ok(config) if config.onboarding_complete => {
                if let Some(target) = config.target {
                    return target.connection_string;
                }
                tracing::warn!("Onboarding complete but no target database configured");
            }
            Ok(_) => tracing::debug!("Waiting for onboarding to complete"),
            Err(e) => tracing::warn!(error = %e, "Knowledge not reachable during bootstrap"),
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
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
