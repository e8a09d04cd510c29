//! Tool surface exposed to agents.
//!
//! Every tool declares a JSON schema for its arguments. The [`ToolRegistry`]
//! compiles those schemas once at registration, validates each call before
//! dispatch, and renders every outcome (including failures) as a JSON string
//! so the conversation can continue after a bad call.

mod learnings;
mod read;
mod write;

pub use learnings::LearningsStore;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use jsonschema::Validator;
use serde_json::{json, Value};
use thiserror::Error;

use crate::llm::ToolDefinition;
use crate::store::{StateStore, StoreError};

/// Failure of a single tool call. Rendered into the `{"error": ...}` payload.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Database error: {}", .0.message())]
    Store(#[from] StoreError),

    #[error("Tool error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tool error: {0}")]
    Failed(String),
}

/// A named operation an agent can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the argument object.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, args: Value) -> Result<Value, ToolError>;
}

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    validator: Validator,
}

/// Name → tool mapping with per-tool argument validation.
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a tool. Re-registering a name replaces the previous tool.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let schema = tool.parameters_schema();
        let validator = jsonschema::validator_for(&schema).map_err(|e| {
            ToolError::Failed(format!("invalid schema for {}: {}", tool.name(), e))
        })?;

        let name = tool.name().to_string();
        if !self.tools.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.tools.insert(name, RegisteredTool { tool, validator });
        Ok(())
    }

    /// The full memory catalog: store-backed reads and writes plus the
    /// filesystem learnings tools.
    pub fn memory(
        store: Arc<dyn StateStore>,
        learnings: LearningsStore,
    ) -> Result<Self, ToolError> {
        let learnings = Arc::new(learnings);
        let tools: Vec<Arc<dyn Tool>> = vec![
            Arc::new(read::ReadProject::new(store.clone())),
            Arc::new(read::ReadChapter::new(store.clone())),
            Arc::new(read::ReadChapters::new(store.clone())),
            Arc::new(read::ReadBookContext::new(store.clone())),
            Arc::new(read::ReadTactics::new(store.clone())),
            Arc::new(read::ReadGlossary::new(store.clone())),
            Arc::new(learnings::ReadLearnings::new(learnings.clone())),
            Arc::new(write::WriteChapter::new(store.clone())),
            Arc::new(write::WriteBookContext::new(store.clone())),
            Arc::new(write::WriteTactic::new(store.clone())),
            Arc::new(write::WriteTacticsBatch::new(store.clone())),
            Arc::new(write::WriteGlossaryTerm::new(store.clone())),
            Arc::new(write::LogDecision::new(store.clone())),
            Arc::new(write::FlagIssue::new(store)),
            Arc::new(learnings::AppendLearnings::new(learnings)),
        ];

        let mut registry = Self::new();
        for tool in tools {
            registry.register(tool)?;
        }
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Definitions offered to the model, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|entry| ToolDefinition {
                name: entry.tool.name().to_string(),
                description: entry.tool.description().to_string(),
                input_schema: entry.tool.parameters_schema(),
            })
            .collect()
    }

    /// One line per tool, for the system prompt.
    pub fn catalog_summary(&self) -> String {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|entry| format!("- {}: {}", entry.tool.name(), entry.tool.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Dispatch one call and render the outcome as JSON text.
    ///
    /// Never fails: unknown tools, schema violations and store errors all come
    /// back as `{"error": "..."}`.
    pub async fn invoke(&self, name: &str, args: Value) -> String {
        let Some(entry) = self.tools.get(name) else {
            tracing::warn!("Agent requested unknown tool {}", name);
            return json!({ "error": format!("Unknown tool: {}", name) }).to_string();
        };

        if !entry.validator.is_valid(&args) {
            let messages: Vec<String> = entry
                .validator
                .iter_errors(&args)
                .map(|e| e.to_string())
                .collect();
            let err = ToolError::InvalidArguments(messages.join("; "));
            tracing::debug!("Rejected {} call: {}", name, err);
            return json!({ "error": err.to_string() }).to_string();
        }

        tracing::debug!("Executing tool {}", name);
        match entry.tool.execute(args).await {
            Ok(value) => value.to_string(),
            Err(err) => {
                tracing::warn!("Tool {} failed: {}", name, err);
                json!({ "error": err.to_string() }).to_string()
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Required string argument. Schema validation runs first, so this only
/// fails when a tool is executed directly.
pub(crate) fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing string argument '{}'", key)))
}

pub(crate) fn opt_str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Required object argument, returned as an owned map.
pub(crate) fn object_arg(
    args: &Value,
    key: &str,
) -> Result<serde_json::Map<String, Value>, ToolError> {
    args.get(key)
        .and_then(Value::as_object)
        .cloned()
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing object argument '{}'", key)))
}
