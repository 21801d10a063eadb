//! Data-access collaborator: a data source handing out per-entity repositories.
//! Rows are JSON objects; `id` is the primary key.

pub mod memory;
pub mod postgres;

pub use memory::MemoryDataSource;
pub use postgres::PgDataSource;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AppError;

#[async_trait]
pub trait Repository: Send + Sync {
    fn entity(&self) -> &str;

    async fn count(&self) -> Result<u64, AppError>;

    /// Rows matching every `(column, value)` pair exactly.
    async fn find(&self, filters: &[(String, Value)]) -> Result<Vec<Value>, AppError>;

    async fn find_one(&self, id: &Value) -> Result<Option<Value>, AppError>;

    async fn find_one_by(&self, filters: &[(String, Value)]) -> Result<Option<Value>, AppError> {
        Ok(self.find(filters).await?.into_iter().next())
    }

    /// Insert, or update the row with the same `id`. Returns the stored row.
    async fn save(&self, row: Value) -> Result<Value, AppError>;

    /// Number of rows removed.
    async fn delete(&self, id: &Value) -> Result<u64, AppError>;
}

#[async_trait]
pub trait DataSource: Send + Sync {
    /// Connect. Called once at startup before wiring.
    async fn initialize(&self) -> Result<(), AppError>;

    fn is_initialized(&self) -> bool;

    /// Cheap liveness check used by the readiness route.
    async fn ping(&self) -> Result<(), AppError>;

    fn repository(&self, entity: &str) -> Arc<dyn Repository>;
}

pub(crate) fn row_object(row: Value) -> Result<serde_json::Map<String, Value>, AppError> {
    match row {
        Value::Object(m) => Ok(m),
        _ => Err(AppError::DataSource("row must be a JSON object".into())),
    }
}
