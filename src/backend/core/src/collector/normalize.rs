//! Sample normalisation.
//!
//! A normaliser turns an adapter's raw sample into the adapter-agnostic
//! snapshot, scoring each health dimension and computing positive counter
//! deltas against the previous snapshot of the same database.

use std::collections::HashMap;

use crate::contracts::{
    DatabaseType, Measurements, QuerySample, RawSample, Snapshot, SubScores,
};

/// Normalises raw samples for one engine family.
///
/// Implementations are stateful: delta computation needs the previous
/// snapshot per database.
pub trait Normaliser: Send {
    /// The engine this normaliser handles.
    fn database_type(&self) -> DatabaseType;

    /// Normalise one sample.
    fn normalise(&mut self, sample: RawSample) -> Snapshot;
}

/// Pick the normaliser for a database type. Unknown engines get the generic
/// scorer, which works from whatever sub-groups the adapter filled in.
pub fn normaliser_for(database_type: &DatabaseType) -> Box<dyn Normaliser> {
    Box::new(ScoreNormaliser::new(database_type.clone()))
}

/// The standard scorer.
///
/// Sub-score formulas:
/// - connection: `1 - active/max` when both present and `max > 0`
/// - query: starts at `1.0`; latency contributes `max(0, 1 - latency_ms/1000)`;
///   sequential scans subtract `min(0.5, (scans/100) * 0.1)`
/// - storage: `1 - used/total` when both present and `total > 0`
/// - cache: the hit rate directly
pub struct ScoreNormaliser {
    database_type: DatabaseType,
    previous: HashMap<String, Snapshot>,
}

impl ScoreNormaliser {
    pub fn new(database_type: DatabaseType) -> Self {
        Self {
            database_type,
            previous: HashMap::new(),
        }
    }

    fn connection_score(measurements: &Measurements) -> Option<f64> {
        measurements
            .connection_utilisation()
            .map(|utilisation| (1.0 - utilisation).clamp(0.0, 1.0))
    }

    fn query_score(queries: Option<&QuerySample>) -> Option<f64> {
        let queries = queries?;

        let latency = queries.avg_latency_ms.or(queries.p95_latency_ms);
        if latency.is_none() && queries.sequential_scans.is_none() {
            return None;
        }

        let mut score = match latency {
            Some(ms) => (1.0 - ms / 1000.0).max(0.0),
            None => 1.0,
        };

        if let Some(scans) = queries.sequential_scans {
            let penalty = ((scans as f64 / 100.0) * 0.1).min(0.5);
            score -= penalty;
        }

        Some(score.clamp(0.0, 1.0))
    }

    fn storage_score(measurements: &Measurements) -> Option<f64> {
        match (
            measurements.storage_used_bytes,
            measurements.storage_total_bytes,
        ) {
            (Some(used), Some(total)) if total > 0 => {
                Some((1.0 - used as f64 / total as f64).clamp(0.0, 1.0))
            }
            _ => None,
        }
    }

    fn cache_score(measurements: &Measurements) -> Option<f64> {
        measurements.cache_hit_rate.map(|rate| rate.clamp(0.0, 1.0))
    }

    /// Positive deltas for every counter present in both snapshots. An empty
    /// map when the clock did not advance.
    fn deltas(&self, current: &Snapshot, previous: &Snapshot) -> HashMap<String, f64> {
        use crate::contracts::snapshot::counters;

        let elapsed =
            (current.collected_at - previous.collected_at).num_milliseconds() as f64 / 1000.0;
        if elapsed <= 0.0 {
            return HashMap::new();
        }

        let mut deltas = HashMap::new();
        let mut counter = |name: &str, now: Option<i64>, before: Option<i64>| {
            if let (Some(now), Some(before)) = (now, before) {
                // Counters are assumed monotonic between restarts.
                deltas.insert(name.to_string(), ((now - before).max(0)) as f64);
            }
        };

        counter(
            counters::SEQUENTIAL_SCANS,
            current.measurements.sequential_scans,
            previous.measurements.sequential_scans,
        );
        counter(
            counters::SLOW_QUERIES,
            current.measurements.slow_queries,
            previous.measurements.slow_queries,
        );
        counter(
            counters::CACHE_HITS,
            current.measurements.cache_hits,
            previous.measurements.cache_hits,
        );
        counter(
            counters::CACHE_MISSES,
            current.measurements.cache_misses,
            previous.measurements.cache_misses,
        );

        for (key, now) in &current.extended {
            if let Some(before) = previous.extended.get(key) {
                deltas.insert(key.clone(), (now - before).max(0.0));
            }
        }

        deltas
    }
}

impl Normaliser for ScoreNormaliser {
    fn database_type(&self) -> DatabaseType {
        self.database_type.clone()
    }

    fn normalise(&mut self, sample: RawSample) -> Snapshot {
        let measurements = Measurements {
            active_connections: sample.connections.as_ref().and_then(|c| c.active),
            idle_connections: sample.connections.as_ref().and_then(|c| c.idle),
            max_connections: sample.connections.as_ref().and_then(|c| c.max),
            waiting_connections: sample.connections.as_ref().and_then(|c| c.waiting),
            p50_latency_ms: sample.queries.as_ref().and_then(|q| q.p50_latency_ms),
            p95_latency_ms: sample.queries.as_ref().and_then(|q| q.p95_latency_ms),
            p99_latency_ms: sample.queries.as_ref().and_then(|q| q.p99_latency_ms),
            avg_latency_ms: sample.queries.as_ref().and_then(|q| q.avg_latency_ms),
            sequential_scans: sample.queries.as_ref().and_then(|q| q.sequential_scans),
            slow_queries: sample.queries.as_ref().and_then(|q| q.slow_queries),
            storage_used_bytes: sample.storage.as_ref().and_then(|s| s.used_bytes),
            storage_total_bytes: sample.storage.as_ref().and_then(|s| s.total_bytes),
            cache_hit_rate: sample.cache.as_ref().and_then(|c| c.hit_rate),
            cache_hits: sample.cache.as_ref().and_then(|c| c.hits),
            cache_misses: sample.cache.as_ref().and_then(|c| c.misses),
        };

        let scores = SubScores {
            connection: Self::connection_score(&measurements),
            query: Self::query_score(sample.queries.as_ref()),
            storage: Self::storage_score(&measurements),
            cache: Self::cache_score(&measurements),
        };

        let mut snapshot = Snapshot {
            database_id: sample.database_id,
            database_type: sample.database_type,
            collected_at: sample.collected_at,
            overall_score: scores.overall(),
            scores,
            measurements,
            deltas: HashMap::new(),
            seconds_since_previous: 0.0,
            extended: sample.extended,
            labels: sample.labels,
        };

        if let Some(previous) = self.previous.get(&snapshot.database_id) {
            let elapsed = (snapshot.collected_at - previous.collected_at).num_milliseconds()
                as f64
                / 1000.0;
            snapshot.seconds_since_previous = elapsed.max(0.0);
            snapshot.deltas = self.deltas(&snapshot, previous);
        }

        self.previous
            .insert(snapshot.database_id.clone(), snapshot.clone());
        snapshot
    }
}
