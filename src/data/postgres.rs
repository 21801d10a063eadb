//! PostgreSQL data source. Entity names map to tables (`schema.table` or
//! `table` in the search path); rows travel as JSON via `to_jsonb`.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::data::{row_object, DataSource, Repository};
use crate::error::AppError;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Quote identifier for PostgreSQL.
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// `schema.table` -> `"schema"."table"`, `table` -> `"table"`.
fn qualified_table(entity: &str) -> String {
    match entity.split_once('.') {
        Some((schema, table)) => format!("{}.{}", quoted(schema), quoted(table)),
        None => quoted(entity),
    }
}

fn filter_object(filters: &[(String, Value)]) -> Value {
    let mut m = Map::new();
    for (k, v) in filters {
        m.insert(k.clone(), v.clone());
    }
    Value::Object(m)
}

pub struct PgDataSource {
    url: String,
    max_connections: u32,
    pool: Arc<OnceLock<PgPool>>,
}

impl PgDataSource {
    /// Not connected until `initialize`.
    pub fn new(url: impl Into<String>) -> Self {
        PgDataSource {
            url: url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            pool: Arc::new(OnceLock::new()),
        }
    }

    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self
    }

    /// Wrap an existing pool; `initialize` is then a no-op.
    pub fn from_pool(pool: PgPool) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(pool);
        PgDataSource {
            url: String::new(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            pool: Arc::new(cell),
        }
    }

    pub fn pool(&self) -> Option<&PgPool> {
        self.pool.get()
    }
}

#[async_trait]
impl DataSource for PgDataSource {
    async fn initialize(&self) -> Result<(), AppError> {
        if self.pool.get().is_some() {
            return Ok(());
        }
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.url)
            .await?;
        let _ = self.pool.set(pool);
        tracing::info!("database connected");
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.pool.get().is_some()
    }

    async fn ping(&self) -> Result<(), AppError> {
        let pool = connected(&self.pool)?;
        sqlx::query("SELECT 1").execute(pool).await?;
        Ok(())
    }

    fn repository(&self, entity: &str) -> Arc<dyn Repository> {
        Arc::new(PgRepository {
            entity: entity.to_string(),
            table: qualified_table(entity),
            pool: self.pool.clone(),
        })
    }
}

fn connected(pool: &OnceLock<PgPool>) -> Result<&PgPool, AppError> {
    pool.get()
        .ok_or_else(|| AppError::DataSource("database is not connected".into()))
}

pub struct PgRepository {
    entity: String,
    table: String,
    pool: Arc<OnceLock<PgPool>>,
}

impl PgRepository {
    fn select_sql(&self) -> String {
        format!(
            "SELECT to_jsonb(t) FROM {} AS t WHERE to_jsonb(t) @> $1",
            self.table
        )
    }

    /// Upsert on `id` touching only the columns present in the row.
    fn save_sql(&self, columns: &[&String]) -> String {
        let cols = columns.iter().map(|c| quoted(c)).collect::<Vec<_>>().join(", ");
        let updates = columns
            .iter()
            .filter(|c| c.as_str() != "id")
            .map(|c| format!("{0} = EXCLUDED.{0}", quoted(c)))
            .collect::<Vec<_>>();
        let conflict = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", updates.join(", "))
        };
        format!(
            "INSERT INTO {table} AS t ({cols}) SELECT {cols} FROM jsonb_populate_record(NULL::{table}, $1) \
             ON CONFLICT (\"id\") {conflict} RETURNING to_jsonb(t)",
            table = self.table,
            cols = cols,
            conflict = conflict,
        )
    }
}

#[async_trait]
impl Repository for PgRepository {
    fn entity(&self) -> &str {
        &self.entity
    }

    async fn count(&self) -> Result<u64, AppError> {
        let pool = connected(&self.pool)?;
        let sql = format!("SELECT COUNT(*) FROM {}", self.table);
        let n: i64 = sqlx::query_scalar(&sql).fetch_one(pool).await?;
        Ok(n.max(0) as u64)
    }

    async fn find(&self, filters: &[(String, Value)]) -> Result<Vec<Value>, AppError> {
        let pool = connected(&self.pool)?;
        let sql = self.select_sql();
        tracing::debug!(sql = %sql, entity = %self.entity, "find");
        let rows: Vec<Value> = sqlx::query_scalar(&sql)
            .bind(filter_object(filters))
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }

    async fn find_one(&self, id: &Value) -> Result<Option<Value>, AppError> {
        let pool = connected(&self.pool)?;
        let sql = format!("{} LIMIT 1", self.select_sql());
        let row: Option<Value> = sqlx::query_scalar(&sql)
            .bind(filter_object(&[("id".to_string(), id.clone())]))
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }

    async fn save(&self, row: Value) -> Result<Value, AppError> {
        let pool = connected(&self.pool)?;
        let mut fields = row_object(row)?;
        if fields.get("id").map(Value::is_null).unwrap_or(false) {
            fields.remove("id");
        }
        let columns: Vec<&String> = fields.keys().collect();
        if columns.is_empty() {
            return Err(AppError::DataSource(format!("{}: empty row", self.entity)));
        }
        let sql = self.save_sql(&columns);
        tracing::debug!(sql = %sql, entity = %self.entity, "save");
        let saved: Option<Value> = sqlx::query_scalar(&sql)
            .bind(Value::Object(fields.clone()))
            .fetch_optional(pool)
            .await?;
        match saved {
            Some(v) => Ok(v),
            // DO NOTHING on an id-only row: return the existing one.
            None => match fields.get("id") {
                Some(id) => self
                    .find_one(id)
                    .await?
                    .ok_or_else(|| AppError::DataSource(format!("{}: row vanished", self.entity))),
                None => Err(AppError::DataSource(format!("{}: nothing saved", self.entity))),
            },
        }
    }

    async fn delete(&self, id: &Value) -> Result<u64, AppError> {
        let pool = connected(&self.pool)?;
        let sql = format!("DELETE FROM {} AS t WHERE to_jsonb(t) @> $1", self.table);
        let done = sqlx::query(&sql)
            .bind(filter_object(&[("id".to_string(), id.clone())]))
            .execute(pool)
            .await?;
        Ok(done.rows_affected())
    }
}
