//! Collector: periodic sampling and normalisation.
//!
//! For the registered target database the collector samples at a configured
//! interval, normalises the sample, ships it to the Analyser over a
//! long-lived streaming RPC, and fans it out on the event bus. Per-cycle
//! failures are logged and skipped; only startup errors are fatal.

pub mod adapter;
pub mod breaker;
pub mod fingerprint;
pub mod host;
pub mod normalize;
pub mod postgres;

pub use adapter::{create_adapter, DatabaseAdapter};
pub use breaker::{BreakerState, SamplingBreaker};
pub use normalize::{normaliser_for, Normaliser, ScoreNormaliser};

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::grpc as convert;
use crate::api::proto;
use crate::api::proto::metrics_service_client::MetricsServiceClient;
use crate::bus::{subjects, EventBus, EventBusExt};
use crate::config::CollectorConfig;
use crate::contracts::{DatabaseHealth, RegisteredDatabase, Snapshot, TargetDatabase};
use crate::error::{ErrorCode, MedicError, Result};
use crate::knowledge::KnowledgeApi;
use crate::observability::{metrics, MedicEvent};

// ═══════════════════════════════════════════════════════════════════════════════
// Analyser Stream
// ═══════════════════════════════════════════════════════════════════════════════

/// The long-lived snapshot stream to the Analyser.
///
/// Send failures drop the stream; the next cycle reopens it. Snapshots are
/// never buffered across failures.
struct AnalyserStream {
    address: String,
    sender: Option<mpsc::Sender<proto::MetricSnapshot>>,
}

impl AnalyserStream {
    fn new(address: String) -> Self {
        Self {
            address,
            sender: None,
        }
    }

    async fn open(&mut self) -> Result<()> {
        let mut client = MetricsServiceClient::connect(self.address.clone()).await?;
        let (tx, rx) = mpsc::channel::<proto::MetricSnapshot>(16);

        tokio::spawn(async move {
            match client.stream_metrics(ReceiverStream::new(rx)).await {
                Ok(response) => {
                    let ack = response.into_inner();
                    info!(total = ack.total, status = %ack.status, "Analyser stream closed");
                }
                Err(status) => {
                    warn!(error = %status, "Analyser stream failed");
                }
            }
        });

        self.sender = Some(tx);
        debug!(address = %self.address, "Analyser stream opened");
        Ok(())
    }

    async fn send(&mut self, snapshot: proto::MetricSnapshot) -> Result<()> {
        if self.sender.is_none() {
            self.open().await?;
        }

        match &self.sender {
            Some(sender) if sender.send(snapshot).await.is_ok() => Ok(()),
            _ => {
                self.sender = None;
                Err(MedicError::new(
                    ErrorCode::RpcFailed,
                    "Analyser stream closed; will reopen next cycle",
                ))
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Service
// ═══════════════════════════════════════════════════════════════════════════════

/// The Collector service loop.
pub struct CollectorService {
    config: CollectorConfig,
    knowledge: Arc<dyn KnowledgeApi>,
    bus: Option<Arc<dyn EventBus>>,
}

impl CollectorService {
    pub fn new(
        config: CollectorConfig,
        knowledge: Arc<dyn KnowledgeApi>,
        bus: Option<Arc<dyn EventBus>>,
    ) -> Self {
        Self {
            config,
            knowledge,
            bus,
        }
    }

    /// Run until cancelled. Bootstraps against Knowledge, registers the target
    /// database, opens the adapter, and enters the sampling loop.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let target = self.await_onboarding(&cancel).await?;

        let mut database = RegisteredDatabase::new(
            self.config.database_id.clone(),
            target.connection_string.clone(),
            target.database_type.clone(),
            if target.name.is_empty() {
                self.config.database_name.clone()
            } else {
                target.name.clone()
            },
        );

        let mut adapter = adapter::create_adapter(&database)?;
        adapter.connect().await?;
        match adapter.health_check().await {
            Ok(version) => database.version = version,
            Err(e) => warn!(error = %e, "Initial health check failed"),
        }

        let unavailable = adapter.unavailable_features();
        if !unavailable.is_empty() {
            info!(features = ?unavailable, "Adapter reports unavailable features");
        }

        let database_id = self.knowledge.register_database(&database).await?;
        info!(database_id = %database_id, "Target database registered");

        let mut normaliser = normalize::normaliser_for(&database.database_type);
        let mut stream = AnalyserStream::new(self.config.analyser_address.clone());
        let breaker = SamplingBreaker::new(
            self.config.breaker_threshold,
            self.config.collection_interval * 3,
        );

        let mut ticker = tokio::time::interval(self.config.collection_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Collector shutting down");
                    adapter.close().await;
                    return Ok(());
                }
                _ = ticker.tick() => {
                    self.cycle(
                        &database_id,
                        adapter.as_ref(),
                        normaliser.as_mut(),
                        &mut stream,
                        &breaker,
                    )
                    .await;
                }
            }
        }
    }

    /// Poll Knowledge until onboarding is complete and a target is present.
    async fn await_onboarding(&self, cancel: &CancellationToken) -> Result<TargetDatabase> {
        loop {
            match self.knowledge.get_system_config().await {
                Ok(config) if config.onboarding_complete => {
                    if let Some(target) = config.target {
                        return Ok(target);
                    }
                    warn!("Onboarding complete but no target database configured");
                }
                Ok(_) => debug!("Waiting for onboarding to complete"),
                Err(e) => warn!(error = %e, "Knowledge not reachable during bootstrap"),
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(MedicError::new(
                        ErrorCode::ShuttingDown,
                        "Cancelled during bootstrap",
                    ));
                }
                _ = tokio::time::sleep(self.config.collection_interval) => {}
            }
        }
    }

    /// One sampling cycle. Errors in either sink are logged and never abort
    /// the loop.
    async fn cycle(
        &self,
        database_id: &str,
        adapter: &dyn DatabaseAdapter,
        normaliser: &mut dyn Normaliser,
        stream: &mut AnalyserStream,
        breaker: &SamplingBreaker,
    ) {
        if !breaker.allow_cycle() {
            debug!("Sampling suspended by breaker");
            return;
        }

        let started = Instant::now();
        let collected = tokio::time::timeout(self.config.collection_interval, adapter.collect())
            .await
            .map_err(MedicError::from)
            .and_then(|inner| inner);

        let mut sample = match collected {
            Ok(sample) => sample,
            Err(e) => {
                warn!(error = %e, "Collect failed; cycle skipped");
                metrics::record_snapshot_dropped();
                if breaker.record_failure() {
                    MedicEvent::BreakerTripped {
                        database_id: database_id.to_string(),
                        failure_count: breaker.failure_count(),
                    }
                    .log();
                    self.report_health(database_id, DatabaseHealth::Offline, 0.0)
                        .await;
                }
                return;
            }
        };

        if breaker.record_success() {
            info!(database_id = %database_id, "Database reachable again");
        }

        sample.database_id = database_id.to_string();
        if self.config.host_metrics {
            host::merge_into(&mut sample, host::gather());
        }

        let snapshot = normaliser.normalise(sample);
        let elapsed = started.elapsed();
        metrics::record_snapshot_collected(elapsed.as_secs_f64());
        MedicEvent::SnapshotCollected {
            database_id: database_id.to_string(),
            overall_score: snapshot.overall_score,
            duration_ms: elapsed.as_millis() as u64,
        }
        .log();

        // The Analyser path is authoritative; the bus is best-effort fanout.
        if let Err(e) = stream.send(convert::to_proto_snapshot(&snapshot)).await {
            warn!(error = %e, "Snapshot not delivered to analyser");
        }
        self.publish_snapshot(&snapshot).await;

        let health = DatabaseHealth::from_score(snapshot.overall_score);
        self.report_health(database_id, health, snapshot.overall_score)
            .await;
    }

    async fn publish_snapshot(&self, snapshot: &Snapshot) {
        let Some(bus) = &self.bus else { return };
        if let Err(e) = bus.publish_json(subjects::METRICS, snapshot).await {
            warn!(error = %e, "Snapshot fanout failed");
            metrics::record_bus_publish_failure(subjects::METRICS);
        }
    }

    async fn report_health(&self, database_id: &str, health: DatabaseHealth, score: f64) {
        if let Err(e) = self
            .knowledge
            .update_database_health(database_id, health, score)
            .await
        {
            debug!(error = %e, "Health report failed");
        }
    }
}
