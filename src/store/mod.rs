//! State store gateway.
//!
//! Every piece of shared state (projects, chapters, tactics, glossary terms,
//! book context, decisions, issues) lives behind a generic table CRUD gateway.
//! The core only talks to the [`StateStore`] trait; [`AdminApiClient`] is the
//! HTTP implementation and [`InMemoryStore`] backs dry runs and tests.
//!
//! Filters follow the gateway convention of `"<column>.<operator>"` keys, e.g.
//! `{"project_id.eq": "…", "chapter_number.lt": 4}`.

mod admin_api;
mod memory;

pub use admin_api::AdminApiClient;
pub use memory::InMemoryStore;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Table names used by the tools and the scheduler.
pub mod tables {
    pub const PROJECTS: &str = "projects";
    pub const CHAPTERS: &str = "chapters";
    pub const BOOK_CONTEXT: &str = "book_context";
    pub const TACTICS: &str = "tactics";
    pub const GLOSSARY: &str = "glossary";
    pub const DECISIONS: &str = "decisions";
    pub const ISSUES: &str = "issues";
}

/// Error returned by the gateway.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The gateway answered with `success: false`.
    #[error("{code}: {message}")]
    Api { code: String, message: String },

    /// The request never produced a gateway answer (network, timeout).
    #[error("store request failed: {0}")]
    Transport(String),

    /// The gateway answered with something we could not decode.
    #[error("unexpected store response: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Machine-readable code.
    pub fn code(&self) -> &str {
        match self {
            Self::Api { code, .. } => code,
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Decode(_) => "DECODE_ERROR",
        }
    }

    /// Human-readable message without the code prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Api { message, .. } => message,
            Self::Transport(message) | Self::Decode(message) => message,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Comparison operators understood by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Is,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Is => "is",
        }
    }

    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "eq" => Some(Self::Eq),
            "neq" => Some(Self::Neq),
            "lt" => Some(Self::Lt),
            "lte" => Some(Self::Lte),
            "gt" => Some(Self::Gt),
            "gte" => Some(Self::Gte),
            "is" => Some(Self::Is),
            _ => None,
        }
    }
}

/// Filter mapping keyed by `"<column>.<operator>"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filters(BTreeMap<String, Value>);

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter on `column` with `op`.
    pub fn with(mut self, column: &str, op: FilterOp, value: impl Into<Value>) -> Self {
        self.0
            .insert(format!("{}.{}", column, op.as_str()), value.into());
        self
    }

    pub fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.with(column, FilterOp::Eq, value)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate `(column, op, value)` triples. Keys that do not follow the
    /// `column.op` convention are yielded with `None` as operator.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<FilterOp>, &Value)> {
        self.0.iter().map(|(key, value)| match key.rsplit_once('.') {
            Some((column, op)) => (column, FilterOp::parse(op), value),
            None => (key.as_str(), None, value),
        })
    }
}

/// Ordering clause for `select`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// Options for `select`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<Order>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub single: bool,
}

impl SelectOptions {
    pub fn ordered_by(column: &str, ascending: bool) -> Self {
        Self {
            order: Some(Order {
                column: column.to_string(),
                ascending,
            }),
            ..Default::default()
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Generic key/table CRUD gateway.
///
/// Rows are plain JSON objects. `insert` accepts either one object or an
/// array of objects and returns the rows that were written.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn select(
        &self,
        table: &str,
        filters: &Filters,
        options: &SelectOptions,
    ) -> StoreResult<Vec<Value>>;

    async fn select_single(&self, table: &str, filters: &Filters) -> StoreResult<Option<Value>>;

    async fn insert(&self, table: &str, data: Value) -> StoreResult<Vec<Value>>;

    async fn update(&self, table: &str, data: Value, filters: &Filters)
        -> StoreResult<Vec<Value>>;

    async fn delete(&self, table: &str, filters: &Filters) -> StoreResult<Vec<Value>>;
}

/// All chapters of a project, ordered by chapter number.
pub async fn project_chapters(store: &dyn StateStore, project_id: &str) -> StoreResult<Vec<Value>> {
    store
        .select(
            tables::CHAPTERS,
            &Filters::new().eq("project_id", project_id),
            &SelectOptions::ordered_by("chapter_number", true),
        )
        .await
}

/// Normalise a gateway `data` payload into a list of rows.
pub(crate) fn into_rows(data: Value) -> Vec<Value> {
    match data {
        Value::Array(rows) => rows,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filters_serialize_with_operator_suffix() {
        let filters = Filters::new()
            .eq("project_id", "p1")
            .with("chapter_number", FilterOp::Lt, 4);

        let value = serde_json::to_value(&filters).unwrap();
        assert_eq!(value, json!({"chapter_number.lt": 4, "project_id.eq": "p1"}));
    }

    #[test]
    fn test_filters_iter_splits_on_last_dot() {
        let filters = Filters::new().with("meta.kind", FilterOp::Neq, "x");
        let parsed: Vec<_> = filters.iter().collect();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].0, "meta.kind");
        assert_eq!(parsed[0].1, Some(FilterOp::Neq));
    }

    #[test]
    fn test_select_options_skip_empty_fields() {
        let options = SelectOptions::ordered_by("chapter_number", true).limit(5);
        let value = serde_json::to_value(&options).unwrap();
        assert_eq!(
            value,
            json!({"order": {"column": "chapter_number", "ascending": true}, "limit": 5})
        );
        assert_eq!(serde_json::to_value(SelectOptions::default()).unwrap(), json!({}));
    }

    #[test]
    fn test_into_rows_normalises_shapes() {
        assert!(into_rows(Value::Null).is_empty());
        assert_eq!(into_rows(json!({"id": 1})).len(), 1);
        assert_eq!(into_rows(json!([{"id": 1}, {"id": 2}])).len(), 2);
    }

    #[test]
    fn test_store_error_accessors() {
        let err = StoreError::api("PGRST116", "no rows");
        assert_eq!(err.code(), "PGRST116");
        assert_eq!(err.message(), "no rows");
        assert_eq!(err.to_string(), "PGRST116: no rows");
    }
}
