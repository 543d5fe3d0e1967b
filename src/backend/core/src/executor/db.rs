//! Capability-gated remediation surface over the target database.
//!
//! Actions never speak SQL directly; they go through this adapter, whose
//! declared capabilities gate what `Action::validate` will accept. The
//! in-memory implementation backs tests and drills.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::collections::HashSet;
use tracing::{debug, info};

use crate::contracts::Capability;
use crate::error::{ErrorCode, MedicError, Result};

/// One sampled slow query, returned to the operator by config tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlowQuery {
    pub query: String,
    pub calls: i64,
    pub mean_ms: f64,
}

/// Remediation operations an adapter may expose, gated by capability flags.
#[async_trait]
pub trait ActionAdapter: Send + Sync {
    /// The capabilities this adapter declares.
    fn capabilities(&self) -> &[Capability];

    async fn index_exists(&self, index_name: &str) -> Result<bool>;
    async fn create_index(
        &self,
        index_name: &str,
        table: &str,
        column: &str,
        concurrent: bool,
    ) -> Result<()>;
    async fn drop_index(&self, index_name: &str, concurrent: bool) -> Result<()>;

    async fn vacuum_table(&self, table: &str) -> Result<()>;
    /// Current dead-tuple count for a table.
    async fn dead_tuples(&self, table: &str) -> Result<i64>;

    /// Whether a backend with this pid exists.
    async fn backend_exists(&self, pid: i64) -> Result<bool>;
    /// Cancel the running query; returns whether the signal was delivered.
    async fn cancel_backend(&self, pid: i64) -> Result<bool>;
    /// Terminate the backend; returns whether the signal was delivered.
    async fn terminate_backend(&self, pid: i64) -> Result<bool>;

    /// Current value of a runtime parameter.
    async fn get_config(&self, parameter: &str) -> Result<String>;
    /// Persist a runtime parameter and reload the server config.
    async fn set_config(&self, parameter: &str, value: &str) -> Result<()>;

    /// Sample of the slowest statements, worst first.
    async fn slow_queries(&self, limit: i64) -> Result<Vec<SlowQuery>>;
}

/// Capability check shared by every action's `validate`.
pub fn require_capability(
    adapter: &dyn ActionAdapter,
    action_type: &str,
    capability: Capability,
) -> Result<()> {
    if adapter.capabilities().contains(&capability) {
        Ok(())
    } else {
        Err(MedicError::action_not_supported(
            action_type,
            capability.as_str(),
        ))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Postgres
// ═══════════════════════════════════════════════════════════════════════════════

/// Quote an identifier for interpolation into DDL.
fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// The full-surface Postgres implementation.
pub struct PostgresActionAdapter {
    pool: PgPool,
}

impl PostgresActionAdapter {
    pub async fn connect(connection_string: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(connection_string)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActionAdapter for PostgresActionAdapter {
    fn capabilities(&self) -> &[Capability] {
        Capability::all()
    }

    async fn index_exists(&self, index_name: &str) -> Result<bool> {
        let row = sqlx::query("SELECT count(*)::bigint AS n FROM pg_indexes WHERE indexname = $1")
            .bind(index_name)
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n").unwrap_or(0);
        Ok(n > 0)
    }

    async fn create_index(
        &self,
        index_name: &str,
        table: &str,
        column: &str,
        concurrent: bool,
    ) -> Result<()> {
        let concurrently = if concurrent { "CONCURRENTLY " } else { "" };
        let sql = format!(
            "CREATE INDEX {}{} ON {} ({})",
            concurrently,
            quote_ident(index_name),
            quote_ident(table),
            quote_ident(column),
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        info!(index = %index_name, table = %table, "Index created");
        Ok(())
    }

    async fn drop_index(&self, index_name: &str, concurrent: bool) -> Result<()> {
        let concurrently = if concurrent { "CONCURRENTLY " } else { "" };
        let sql = format!(
            "DROP INDEX {}IF EXISTS {}",
            concurrently,
            quote_ident(index_name)
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        info!(index = %index_name, "Index dropped");
        Ok(())
    }

    async fn vacuum_table(&self, table: &str) -> Result<()> {
        let sql = format!("VACUUM (ANALYZE) {}", quote_ident(table));
        sqlx::query(&sql).execute(&self.pool).await?;
        info!(table = %table, "Vacuum-analyse finished");
        Ok(())
    }

    async fn dead_tuples(&self, table: &str) -> Result<i64> {
        let row = sqlx::query(
            "SELECT coalesce(n_dead_tup, 0)::bigint AS dead FROM pg_stat_user_tables WHERE relname = $1",
        )
        .bind(table)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(|r| r.try_get("dead").ok()).unwrap_or(0))
    }

    async fn backend_exists(&self, pid: i64) -> Result<bool> {
        let row =
            sqlx::query("SELECT count(*)::bigint AS n FROM pg_stat_activity WHERE pid = $1")
                .bind(pid)
                .fetch_one(&self.pool)
                .await?;
        let n: i64 = row.try_get("n").unwrap_or(0);
        Ok(n > 0)
    }

    async fn cancel_backend(&self, pid: i64) -> Result<bool> {
        let row = sqlx::query("SELECT pg_cancel_backend($1) AS ok")
            .bind(pid)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("ok").unwrap_or(false))
    }

    async fn terminate_backend(&self, pid: i64) -> Result<bool> {
        let row = sqlx::query("SELECT pg_terminate_backend($1) AS ok")
            .bind(pid)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("ok").unwrap_or(false))
    }

    async fn get_config(&self, parameter: &str) -> Result<String> {
        let row = sqlx::query("SELECT current_setting($1, true) AS value")
            .bind(parameter)
            .fetch_one(&self.pool)
            .await?;
        let value: Option<String> = row.try_get("value").ok();
        value.ok_or_else(|| {
            MedicError::new(
                ErrorCode::AdapterQueryFailed,
                format!("Unknown configuration parameter: {}", parameter),
            )
        })
    }

    async fn set_config(&self, parameter: &str, value: &str) -> Result<()> {
        // ALTER SYSTEM does not take bind parameters.
        let sql = format!(
            "ALTER SYSTEM SET {} = '{}'",
            quote_ident(parameter),
            value.replace('\'', "''")
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        sqlx::query("SELECT pg_reload_conf()")
            .execute(&self.pool)
            .await?;
        debug!(parameter = %parameter, value = %value, "Configuration updated");
        Ok(())
    }

    async fn slow_queries(&self, limit: i64) -> Result<Vec<SlowQuery>> {
        let rows = sqlx::query(
            r#"
            SELECT left(query, 200) AS query, calls::bigint AS calls,
                   mean_exec_time::float8 AS mean_ms
            FROM pg_stat_statements
            ORDER BY mean_exec_time DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                Some(SlowQuery {
                    query: row.try_get("query").ok()?,
                    calls: row.try_get("calls").unwrap_or(0),
                    mean_ms: row.try_get("mean_ms").unwrap_or(0.0),
                })
            })
            .collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-Memory
// ═══════════════════════════════════════════════════════════════════════════════

/// In-memory adapter for tests and single-process drills.
///
/// Indexes, backends, and config values live in maps; capability sets are
/// configurable so validation gates can be exercised.
pub struct MemoryActionAdapter {
    capabilities: Vec<Capability>,
    indexes: DashMap<String, (String, String)>,
    backends: DashMap<i64, ()>,
    config: DashMap<String, String>,
    dead: DashMap<String, i64>,
    vacuumed: DashMap<String, u32>,
    cancelled: parking_lot::Mutex<HashSet<i64>>,
}

impl MemoryActionAdapter {
    pub fn new() -> Self {
        Self::with_capabilities(Capability::all().to_vec())
    }

    pub fn with_capabilities(capabilities: Vec<Capability>) -> Self {
        Self {
            capabilities,
            indexes: DashMap::new(),
            backends: DashMap::new(),
            config: DashMap::new(),
            dead: DashMap::new(),
            vacuumed: DashMap::new(),
            cancelled: parking_lot::Mutex::new(HashSet::new()),
        }
    }

    pub fn add_backend(&self, pid: i64) {
        self.backends.insert(pid, ());
    }

    pub fn set_dead_tuples(&self, table: &str, dead: i64) {
        self.dead.insert(table.to_string(), dead);
    }

    pub fn set_config_value(&self, parameter: &str, value: &str) {
        self.config
            .insert(parameter.to_string(), value.to_string());
    }

    pub fn vacuum_count(&self, table: &str) -> u32 {
        self.vacuumed.get(table).map(|v| *v).unwrap_or(0)
    }

    pub fn was_cancelled(&self, pid: i64) -> bool {
        self.cancelled.lock().contains(&pid)
    }

    pub fn has_index(&self, index_name: &str) -> bool {
        self.indexes.contains_key(index_name)
    }
}

impl Default for MemoryActionAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionAdapter for MemoryActionAdapter {
    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    async fn index_exists(&self, index_name: &str) -> Result<bool> {
        Ok(self.indexes.contains_key(index_name))
    }

    async fn create_index(
        &self,
        index_name: &str,
        table: &str,
        column: &str,
        _concurrent: bool,
    ) -> Result<()> {
        if self.indexes.contains_key(index_name) {
            return Err(MedicError::index_already_exists(index_name));
        }
        self.indexes.insert(
            index_name.to_string(),
            (table.to_string(), column.to_string()),
        );
        Ok(())
    }

    async fn drop_index(&self, index_name: &str, _concurrent: bool) -> Result<()> {
        self.indexes.remove(index_name);
        Ok(())
    }

    async fn vacuum_table(&self, table: &str) -> Result<()> {
        *self.vacuumed.entry(table.to_string()).or_insert(0) += 1;
        self.dead.insert(table.to_string(), 0);
        Ok(())
    }

    async fn dead_tuples(&self, table: &str) -> Result<i64> {
        Ok(self.dead.get(table).map(|v| *v).unwrap_or(0))
    }

    async fn backend_exists(&self, pid: i64) -> Result<bool> {
        Ok(self.backends.contains_key(&pid))
    }

    async fn cancel_backend(&self, pid: i64) -> Result<bool> {
        if !self.backends.contains_key(&pid) {
            return Ok(false);
        }
        self.cancelled.lock().insert(pid);
        self.backends.remove(&pid);
        Ok(true)
    }

    async fn terminate_backend(&self, pid: i64) -> Result<bool> {
        Ok(self.backends.remove(&pid).is_some())
    }

    async fn get_config(&self, parameter: &str) -> Result<String> {
        self.config
            .get(parameter)
            .map(|v| v.clone())
            .ok_or_else(|| {
                MedicError::new(
                    ErrorCode::AdapterQueryFailed,
                    format!("Unknown configuration parameter: {}", parameter),
                )
            })
    }

    async fn set_config(&self, parameter: &str, value: &str) -> Result<()> {
        self.config
            .insert(parameter.to_string(), value.to_string());
        Ok(())
    }

    async fn slow_queries(&self, _limit: i64) -> Result<Vec<SlowQuery>> {
        Ok(vec![SlowQuery {
            query: "select * from orders where customer_id = ?".to_string(),
            calls: 120,
            mean_ms: 240.0,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_require_capability() {
        let adapter = MemoryActionAdapter::with_capabilities(vec![Capability::SupportsVacuum]);

        assert!(require_capability(&adapter, "vacuum_table", Capability::SupportsVacuum).is_ok());
        let err = require_capability(&adapter, "create_index", Capability::SupportsIndexes)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ActionNotSupported);
    }

    #[tokio::test]
    async fn test_memory_index_lifecycle() {
        let adapter = MemoryActionAdapter::new();

        assert!(!adapter.index_exists("idx_a").await.unwrap());
        adapter
            .create_index("idx_a", "users", "email", true)
            .await
            .unwrap();
        assert!(adapter.index_exists("idx_a").await.unwrap());

        let err = adapter
            .create_index("idx_a", "users", "email", true)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::IndexAlreadyExists);

        adapter.drop_index("idx_a", true).await.unwrap();
        assert!(!adapter.index_exists("idx_a").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_backends() {
        let adapter = MemoryActionAdapter::new();
        adapter.add_backend(42);

        assert!(adapter.backend_exists(42).await.unwrap());
        assert!(adapter.cancel_backend(42).await.unwrap());
        assert!(!adapter.backend_exists(42).await.unwrap());
        assert!(!adapter.terminate_backend(42).await.unwrap());
    }
}
