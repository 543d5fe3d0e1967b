//! Database adapter contract and factory.

use async_trait::async_trait;

use crate::contracts::{Capability, DatabaseType, RawSample, RegisteredDatabase};
use crate::error::{ErrorCode, MedicError, Result};

use super::postgres::PostgresAdapter;

/// One sampling connection to a managed database.
///
/// An adapter populates whichever sub-groups it can measure, plus any
/// adapter-specific extended metrics and labels. `collect` must never block
/// longer than the configured cycle interval; the caller enforces the
/// ceiling with a timeout.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync + std::fmt::Debug {
    /// The engine this adapter samples.
    fn database_type(&self) -> DatabaseType;

    /// Establish the underlying connection (pool).
    async fn connect(&mut self) -> Result<()>;

    /// Cheap liveness probe; also used to fetch the server version.
    async fn health_check(&self) -> Result<String>;

    /// Take one raw sample.
    async fn collect(&self) -> Result<RawSample>;

    /// Release the underlying connection.
    async fn close(&self);

    /// Capability tags downstream consumers must not expect from this
    /// database. Empty means fully featured.
    fn unavailable_features(&self) -> Vec<Capability>;
}

/// Pick the adapter implementation by database type tag.
pub fn create_adapter(database: &RegisteredDatabase) -> Result<Box<dyn DatabaseAdapter>> {
    match &database.database_type {
        DatabaseType::Postgres => Ok(Box::new(PostgresAdapter::new(
            database.id.clone(),
            database.connection_string.clone(),
        ))),
        DatabaseType::Other(tag) => Err(MedicError::new(
            ErrorCode::AdapterUnsupportedDatabase,
            format!("No adapter for database type: {}", tag),
        )),
    }
}
