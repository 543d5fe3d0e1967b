//! PostgreSQL adapter.
//!
//! Samples `pg_stat_activity`, `pg_stat_database`, `pg_stat_user_tables`, and
//! (when the extension is installed) `pg_stat_statements`. The connection and
//! capacity queries are required; everything else is best-effort so a partial
//! sample still flows.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

use crate::contracts::snapshot::keys;
use crate::contracts::{
    CacheSample, Capability, ConnectionSample, DatabaseType, QuerySample, RawSample, StorageSample,
};
use crate::error::{ErrorCode, MedicError, Result};

use super::adapter::DatabaseAdapter;
use super::fingerprint::query_hash;

/// Tables smaller than this are ignored by the bloat scan.
const BLOAT_MIN_TUPLES: i64 = 100;
/// Statements slower than this count as slow queries (milliseconds).
const SLOW_QUERY_MS: f64 = 100.0;

const ACTIVITY_QUERY: &str = r#"
SELECT
    count(*) FILTER (WHERE state = 'active')::bigint AS active,
    count(*) FILTER (WHERE state = 'idle')::bigint AS idle,
    count(*) FILTER (WHERE state = 'active' AND wait_event IS NOT NULL)::bigint AS waiting
FROM pg_stat_activity
WHERE backend_type = 'client backend'
"#;

const MAX_CONNECTIONS_QUERY: &str =
    "SELECT setting::bigint AS max FROM pg_settings WHERE name = 'max_connections'";

const CACHE_QUERY: &str = r#"
SELECT blks_hit::bigint AS hits, blks_read::bigint AS misses
FROM pg_stat_database
WHERE datname = current_database()
"#;

const TABLES_QUERY: &str = r#"
SELECT relname, seq_scan::bigint AS seq_scan,
       n_live_tup::bigint AS live, n_dead_tup::bigint AS dead
FROM pg_stat_user_tables
ORDER BY seq_scan DESC
LIMIT 25
"#;

const UNINDEXED_COLUMN_QUERY: &str = r#"
SELECT a.attname
FROM pg_attribute a
WHERE a.attrelid = $1::regclass
  AND a.attnum > 0
  AND NOT a.attisdropped
  AND NOT EXISTS (
      SELECT 1 FROM pg_index i
      WHERE i.indrelid = a.attrelid AND a.attnum = ANY(i.indkey)
  )
ORDER BY a.attnum
LIMIT 1
"#;

const LONGEST_QUERY: &str = r#"
SELECT pid::bigint AS pid,
       extract(epoch FROM (now() - query_start))::float8 AS secs,
       left(query, 200) AS query
FROM pg_stat_activity
WHERE state = 'active'
  AND query_start IS NOT NULL
  AND backend_type = 'client backend'
  AND pid <> pg_backend_pid()
ORDER BY query_start ASC
LIMIT 1
"#;

const IDLE_TXN_QUERY: &str = r#"
SELECT pid::bigint AS pid,
       extract(epoch FROM (now() - state_change))::float8 AS secs
FROM pg_stat_activity
WHERE state = 'idle in transaction'
  AND state_change IS NOT NULL
ORDER BY state_change ASC
LIMIT 1
"#;

const DATABASE_SIZE_QUERY: &str =
    "SELECT pg_database_size(current_database())::bigint AS bytes";

const STATEMENTS_QUERY: &str = r#"
SELECT coalesce(sum(total_exec_time) / nullif(sum(calls), 0), 0)::float8 AS avg_ms,
       count(*) FILTER (WHERE mean_exec_time > $1)::bigint AS slow
FROM pg_stat_statements
"#;

const SLOWEST_STATEMENT_QUERY: &str =
    "SELECT query FROM pg_stat_statements ORDER BY mean_exec_time DESC LIMIT 1";

const VERSION_QUERY: &str = "SELECT version()";

/// Adapter over a PostgreSQL connection pool.
#[derive(Debug)]
pub struct PostgresAdapter {
    database_id: String,
    connection_string: String,
    pool: Option<PgPool>,
    /// Cleared after the first failed probe so cycles stop paying for it.
    statements_available: AtomicBool,
}

impl PostgresAdapter {
    pub fn new(database_id: impl Into<String>, connection_string: impl Into<String>) -> Self {
        Self {
            database_id: database_id.into(),
            connection_string: connection_string.into(),
            pool: None,
            statements_available: AtomicBool::new(true),
        }
    }

    fn pool(&self) -> Result<&PgPool> {
        self.pool.as_ref().ok_or_else(|| {
            MedicError::new(
                ErrorCode::AdapterConnectionFailed,
                "Adapter is not connected",
            )
        })
    }

    async fn sample_connections(&self, sample: &mut RawSample) -> Result<()> {
        let pool = self.pool()?;

        let row = sqlx::query(ACTIVITY_QUERY).fetch_one(pool).await?;
        let mut connections = ConnectionSample {
            active: row.try_get("active").ok(),
            idle: row.try_get("idle").ok(),
            waiting: row.try_get("waiting").ok(),
            max: None,
        };

        let row = sqlx::query(MAX_CONNECTIONS_QUERY).fetch_one(pool).await?;
        connections.max = row.try_get("max").ok();

        sample.connections = Some(connections);
        Ok(())
    }

    async fn sample_cache(&self, sample: &mut RawSample) {
        let Ok(pool) = self.pool() else { return };

        match sqlx::query(CACHE_QUERY).fetch_optional(pool).await {
            Ok(Some(row)) => {
                let hits: i64 = row.try_get("hits").unwrap_or(0);
                let misses: i64 = row.try_get("misses").unwrap_or(0);
                let total = hits + misses;
                sample.cache = Some(CacheSample {
                    // hit / (hit + read); the inverted upstream variant is a bug.
                    hit_rate: (total > 0).then(|| hits as f64 / total as f64),
                    hits: Some(hits),
                    misses: Some(misses),
                });
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Cache sample failed"),
        }
    }

    async fn sample_tables(&self, sample: &mut RawSample) {
        let Ok(pool) = self.pool() else { return };

        let rows = match sqlx::query(TABLES_QUERY).fetch_all(pool).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "Table sample failed");
                return;
            }
        };

        let mut total_seq_scans: i64 = 0;
        let mut worst_scan: Option<(String, i64)> = None;
        let mut worst_bloat: Option<(String, f64)> = None;

        for row in rows {
            let name: String = match row.try_get("relname") {
                Ok(name) => name,
                Err(_) => continue,
            };
            let seq_scan: i64 = row.try_get("seq_scan").unwrap_or(0);
            let live: i64 = row.try_get("live").unwrap_or(0);
            let dead: i64 = row.try_get("dead").unwrap_or(0);

            total_seq_scans += seq_scan;
            sample.extended.insert(
                format!("{}{}{}", keys::TABLE_PREFIX, name, keys::SEQ_SCANS_SUFFIX),
                seq_scan as f64,
            );
            sample.extended.insert(
                format!("{}{}{}", keys::TABLE_PREFIX, name, keys::LIVE_TUPLES_SUFFIX),
                live as f64,
            );
            sample.extended.insert(
                format!("{}{}{}", keys::TABLE_PREFIX, name, keys::DEAD_TUPLES_SUFFIX),
                dead as f64,
            );

            if seq_scan > 0 && worst_scan.as_ref().map(|(_, s)| seq_scan > *s).unwrap_or(true) {
                worst_scan = Some((name.clone(), seq_scan));
            }
            if live + dead >= BLOAT_MIN_TUPLES {
                let ratio = dead as f64 / (live + dead) as f64;
                if worst_bloat.as_ref().map(|(_, r)| ratio > *r).unwrap_or(true) {
                    worst_bloat = Some((name, ratio));
                }
            }
        }

        let queries = sample.queries.get_or_insert_with(QuerySample::default);
        queries.sequential_scans = Some(total_seq_scans);

        if let Some((table, _)) = worst_scan {
            if let Some(column) = self.recommend_index_column(&table).await {
                sample
                    .labels
                    .insert(keys::RECOMMENDED_INDEX_COLUMN.to_string(), column);
            }
            sample
                .labels
                .insert(keys::WORST_SEQ_SCAN_TABLE.to_string(), table);
        }
        if let Some((table, ratio)) = worst_bloat {
            sample
                .extended
                .insert(keys::WORST_BLOAT_RATIO.to_string(), ratio);
            sample
                .labels
                .insert(keys::WORST_BLOAT_TABLE.to_string(), table);
        }
    }

    /// First column of the table without any index coverage.
    async fn recommend_index_column(&self, table: &str) -> Option<String> {
        let pool = self.pool().ok()?;
        match sqlx::query(UNINDEXED_COLUMN_QUERY)
            .bind(table)
            .fetch_optional(pool)
            .await
        {
            Ok(row) => row.and_then(|r| r.try_get("attname").ok()),
            Err(e) => {
                debug!(table = %table, error = %e, "Index column recommendation failed");
                None
            }
        }
    }

    async fn sample_sessions(&self, sample: &mut RawSample) {
        let Ok(pool) = self.pool() else { return };

        match sqlx::query(LONGEST_QUERY).fetch_optional(pool).await {
            Ok(Some(row)) => {
                let pid: i64 = row.try_get("pid").unwrap_or(0);
                let secs: f64 = row.try_get("secs").unwrap_or(0.0);
                let query: String = row.try_get("query").unwrap_or_default();
                if pid > 0 {
                    sample
                        .extended
                        .insert(keys::LONGEST_QUERY_SECS.to_string(), secs);
                    sample
                        .labels
                        .insert(keys::LONGEST_QUERY_PID.to_string(), pid.to_string());
                    sample
                        .labels
                        .insert(keys::LONGEST_QUERY_TEXT.to_string(), query);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Longest query sample failed"),
        }

        match sqlx::query(IDLE_TXN_QUERY).fetch_optional(pool).await {
            Ok(Some(row)) => {
                let pid: i64 = row.try_get("pid").unwrap_or(0);
                let secs: f64 = row.try_get("secs").unwrap_or(0.0);
                if pid > 0 {
                    sample.extended.insert(keys::IDLE_TXN_SECS.to_string(), secs);
                    sample
                        .labels
                        .insert(keys::IDLE_TXN_PID.to_string(), pid.to_string());
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Idle transaction sample failed"),
        }
    }

    async fn sample_storage(&self, sample: &mut RawSample) {
        let Ok(pool) = self.pool() else { return };

        match sqlx::query(DATABASE_SIZE_QUERY).fetch_one(pool).await {
            Ok(row) => {
                sample.storage = Some(StorageSample {
                    used_bytes: row.try_get("bytes").ok(),
                    // Volume capacity comes from host metrics when enabled.
                    total_bytes: None,
                });
            }
            Err(e) => warn!(error = %e, "Database size sample failed"),
        }
    }

    async fn sample_statements(&self, sample: &mut RawSample) {
        if !self.statements_available.load(Ordering::Relaxed) {
            return;
        }
        let Ok(pool) = self.pool() else { return };

        let row = match sqlx::query(STATEMENTS_QUERY)
            .bind(SLOW_QUERY_MS)
            .fetch_one(pool)
            .await
        {
            Ok(row) => row,
            Err(e) => {
                debug!(error = %e, "pg_stat_statements unavailable; disabling probe");
                self.statements_available.store(false, Ordering::Relaxed);
                return;
            }
        };

        let avg_ms: f64 = row.try_get("avg_ms").unwrap_or(0.0);
        let slow: i64 = row.try_get("slow").unwrap_or(0);

        let queries = sample.queries.get_or_insert_with(QuerySample::default);
        if avg_ms > 0.0 {
            queries.avg_latency_ms = Some(avg_ms);
        }
        queries.slow_queries = Some(slow);

        if let Ok(Some(row)) = sqlx::query(SLOWEST_STATEMENT_QUERY)
            .fetch_optional(pool)
            .await
        {
            if let Ok(query) = row.try_get::<String, _>("query") {
                sample
                    .labels
                    .insert(keys::SLOWEST_QUERY_HASH.to_string(), query_hash(&query));
            }
        }
    }
}

#[async_trait]
impl DatabaseAdapter for PostgresAdapter {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    async fn connect(&mut self) -> Result<()> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(&self.connection_string)
            .await?;
        self.pool = Some(pool);
        debug!(database_id = %self.database_id, "Postgres adapter connected");
        Ok(())
    }

    async fn health_check(&self) -> Result<String> {
        let pool = self.pool()?;
        let row = sqlx::query(VERSION_QUERY).fetch_one(pool).await?;
        let version: String = row.try_get("version").unwrap_or_default();
        Ok(version)
    }

    async fn collect(&self) -> Result<RawSample> {
        let mut sample = RawSample::new(
            self.database_id.clone(),
            DatabaseType::Postgres,
            Utc::now(),
        );

        // Connection capacity is the canary: if this fails the cycle is skipped.
        self.sample_connections(&mut sample).await?;

        self.sample_cache(&mut sample).await;
        self.sample_tables(&mut sample).await;
        self.sample_sessions(&mut sample).await;
        self.sample_storage(&mut sample).await;
        self.sample_statements(&mut sample).await;

        Ok(sample)
    }

    async fn close(&self) {
        if let Some(pool) = &self.pool {
            pool.close().await;
        }
    }

    fn unavailable_features(&self) -> Vec<Capability> {
        // Postgres supports the full remediation surface.
        Vec::new()
    }
}
