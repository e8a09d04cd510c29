//! In-memory [`StateStore`] with the gateway's filter semantics.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{into_rows, FilterOp, Filters, SelectOptions, StateStore, StoreError, StoreResult};

/// Table store kept in process memory.
///
/// Inserted rows get an `id` (UUID v4) and `created_at` when they lack one.
/// Tables can be marked as failing to exercise error paths.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<HashMap<String, Vec<Value>>>,
    failing: HashMap<String, StoreError>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed `table` with `rows`.
    pub fn with_table(mut self, table: &str, rows: Vec<Value>) -> Self {
        self.tables.get_mut().insert(table.to_string(), rows);
        self
    }

    /// Make every operation on `table` fail with `error`.
    pub fn with_failing_table(mut self, table: &str, error: StoreError) -> Self {
        self.failing.insert(table.to_string(), error);
        self
    }

    /// Snapshot of a table's rows.
    pub async fn rows(&self, table: &str) -> Vec<Value> {
        self.tables
            .read()
            .await
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    fn check(&self, table: &str) -> StoreResult<()> {
        match self.failing.get(table) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn matches(row: &Value, filters: &Filters) -> bool {
    filters.iter().all(|(column, op, expected)| {
        let actual = row.get(column).unwrap_or(&Value::Null);
        match op {
            Some(FilterOp::Eq) => compare(actual, expected) == Some(Ordering::Equal),
            Some(FilterOp::Neq) => compare(actual, expected) != Some(Ordering::Equal),
            Some(FilterOp::Lt) => compare(actual, expected) == Some(Ordering::Less),
            Some(FilterOp::Lte) => matches!(
                compare(actual, expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Some(FilterOp::Gt) => compare(actual, expected) == Some(Ordering::Greater),
            Some(FilterOp::Gte) => matches!(
                compare(actual, expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            // `is` is used for null/boolean checks; "null" arrives as a string too.
            Some(FilterOp::Is) => match expected {
                Value::String(s) if s == "null" => actual.is_null(),
                other => actual == other,
            },
            None => false,
        }
    })
}

fn stamp(mut row: Map<String, Value>) -> Value {
    row.entry("id")
        .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
    row.entry("created_at")
        .or_insert_with(|| Value::String(chrono::Utc::now().to_rfc3339()));
    Value::Object(row)
}

#[async_trait]
impl StateStore for InMemoryStore {
    async fn select(
        &self,
        table: &str,
        filters: &Filters,
        options: &SelectOptions,
    ) -> StoreResult<Vec<Value>> {
        self.check(table)?;
        let tables = self.tables.read().await;
        let mut rows: Vec<Value> = tables
            .get(table)
            .map(|rows| rows.iter().filter(|r| matches(r, filters)).cloned().collect())
            .unwrap_or_default();

        if let Some(order) = &options.order {
            rows.sort_by(|a, b| {
                let a = a.get(&order.column).unwrap_or(&Value::Null);
                let b = b.get(&order.column).unwrap_or(&Value::Null);
                let ord = compare(a, b).unwrap_or(Ordering::Equal);
                if order.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        }
        if let Some(limit) = options.limit {
            rows.truncate(limit);
        }
        if options.single {
            rows.truncate(1);
        }
        Ok(rows)
    }

    async fn select_single(&self, table: &str, filters: &Filters) -> StoreResult<Option<Value>> {
        let options = SelectOptions {
            single: true,
            ..Default::default()
        };
        Ok(self.select(table, filters, &options).await?.into_iter().next())
    }

    async fn insert(&self, table: &str, data: Value) -> StoreResult<Vec<Value>> {
        self.check(table)?;
        let mut written = Vec::new();
        for row in into_rows(data) {
            match row {
                Value::Object(map) => written.push(stamp(map)),
                other => {
                    return Err(StoreError::api(
                        "INVALID_ROW",
                        format!("rows must be objects, got {}", other),
                    ))
                }
            }
        }

        self.tables
            .write()
            .await
            .entry(table.to_string())
            .or_default()
            .extend(written.iter().cloned());
        Ok(written)
    }

    async fn update(
        &self,
        table: &str,
        data: Value,
        filters: &Filters,
    ) -> StoreResult<Vec<Value>> {
        self.check(table)?;
        let Value::Object(patch) = data else {
            return Err(StoreError::api("INVALID_ROW", "update data must be an object"));
        };

        let mut tables = self.tables.write().await;
        let mut updated = Vec::new();
        if let Some(rows) = tables.get_mut(table) {
            for row in rows.iter_mut().filter(|r| matches(r, filters)) {
                if let Value::Object(fields) = row {
                    for (key, value) in &patch {
                        fields.insert(key.clone(), value.clone());
                    }
                }
                updated.push(row.clone());
            }
        }
        Ok(updated)
    }

    async fn delete(&self, table: &str, filters: &Filters) -> StoreResult<Vec<Value>> {
        self.check(table)?;
        let mut tables = self.tables.write().await;
        let Some(rows) = tables.get_mut(table) else {
            return Ok(Vec::new());
        };
        let (removed, kept): (Vec<Value>, Vec<Value>) =
            rows.drain(..).partition(|r| matches(r, filters));
        *rows = kept;
        Ok(removed)
    }
}
