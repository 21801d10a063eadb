//! In-memory data source with the same row semantics as the PostgreSQL one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::data::{row_object, DataSource, Repository};
use crate::error::AppError;

type Tables = Arc<RwLock<HashMap<String, Vec<Value>>>>;

#[derive(Clone, Default)]
pub struct MemoryDataSource {
    tables: Tables,
    initialized: Arc<AtomicBool>,
}

impl MemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DataSource for MemoryDataSource {
    async fn initialize(&self) -> Result<(), AppError> {
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> Result<(), AppError> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(AppError::DataSource("not initialized".into()))
        }
    }

    fn repository(&self, entity: &str) -> Arc<dyn Repository> {
        Arc::new(MemoryRepository {
            entity: entity.to_string(),
            tables: self.tables.clone(),
        })
    }
}

pub struct MemoryRepository {
    entity: String,
    tables: Tables,
}

fn matches(row: &Value, filters: &[(String, Value)]) -> bool {
    filters.iter().all(|(col, v)| row.get(col) == Some(v))
}

fn same_id(row: &Value, id: &Value) -> bool {
    row.get("id") == Some(id)
}

#[async_trait]
impl Repository for MemoryRepository {
    fn entity(&self) -> &str {
        &self.entity
    }

    async fn count(&self) -> Result<u64, AppError> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        Ok(tables.get(&self.entity).map(|rows| rows.len() as u64).unwrap_or(0))
    }

    async fn find(&self, filters: &[(String, Value)]) -> Result<Vec<Value>, AppError> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        Ok(tables
            .get(&self.entity)
            .map(|rows| rows.iter().filter(|r| matches(r, filters)).cloned().collect())
            .unwrap_or_default())
    }

    async fn find_one(&self, id: &Value) -> Result<Option<Value>, AppError> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        Ok(tables
            .get(&self.entity)
            .and_then(|rows| rows.iter().find(|r| same_id(r, id)).cloned()))
    }

    async fn save(&self, row: Value) -> Result<Value, AppError> {
        let mut fields = row_object(row)?;
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        let rows = tables.entry(self.entity.clone()).or_default();

        if let Some(id) = fields.get("id").filter(|v| !v.is_null()).cloned() {
            if let Some(existing) = rows.iter_mut().find(|r| same_id(r, &id)) {
                if let Value::Object(current) = existing {
                    for (k, v) in fields {
                        current.insert(k, v);
                    }
                }
                return Ok(existing.clone());
            }
        } else {
            let next = rows
                .iter()
                .filter_map(|r| r.get("id").and_then(Value::as_i64))
                .max()
                .unwrap_or(0)
                + 1;
            fields.insert("id".into(), Value::from(next));
        }
        let stored = Value::Object(fields);
        rows.push(stored.clone());
        Ok(stored)
    }

    async fn delete(&self, id: &Value) -> Result<u64, AppError> {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        let Some(rows) = tables.get_mut(&self.entity) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|r| !same_id(r, id));
        Ok((before - rows.len()) as u64)
    }
}
