//! Write tools over the state store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use super::{object_arg, opt_str_arg, str_arg, Tool, ToolError};
use crate::store::{tables, Filters, StateStore};

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn first_id(rows: &[Value]) -> Value {
    rows.first()
        .and_then(|row| row.get("id"))
        .cloned()
        .unwrap_or(Value::Null)
}

/// Patch a chapter row.
pub struct WriteChapter {
    store: Arc<dyn StateStore>,
}

impl WriteChapter {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for WriteChapter {
    fn name(&self) -> &str {
        "memory_write_chapter"
    }

    fn description(&self) -> &str {
        "Write/update chapter data. Use for analysis results, content, status updates."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "chapter_id": {
                    "type": "string",
                    "description": "The chapter ID"
                },
                "data": {
                    "type": "object",
                    "description": "Fields to update (e.g., analysis_stories, analysis_quotes, status)"
                }
            },
            "required": ["chapter_id", "data"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let chapter_id = str_arg(&args, "chapter_id")?;
        let mut data = object_arg(&args, "data")?;
        data.insert("updated_at".to_string(), Value::String(now()));

        let updated = self
            .store
            .update(
                tables::CHAPTERS,
                Value::Object(data),
                &Filters::new().eq("id", chapter_id),
            )
            .await?;
        Ok(json!({ "success": true, "updated": updated.len() }))
    }
}

/// Upsert a book context value keyed by project and key.
pub struct WriteBookContext {
    store: Arc<dyn StateStore>,
}

impl WriteBookContext {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for WriteBookContext {
    fn name(&self) -> &str {
        "memory_write_book_context"
    }

    fn description(&self) -> &str {
        "Write book-level context (style guide, structure, etc)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "project_id": {
                    "type": "string",
                    "description": "The project ID"
                },
                "key": {
                    "type": "string",
                    "description": "Context key"
                },
                "value": {
                    "type": "string",
                    "description": "The value to store"
                }
            },
            "required": ["project_id", "key", "value"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let project_id = str_arg(&args, "project_id")?;
        let key = str_arg(&args, "key")?;
        let value = str_arg(&args, "value")?;
        let filters = Filters::new().eq("project_id", project_id).eq("key", key);

        // Check-then-write; concurrent writers to one key resolve last-write-wins.
        let existing = self
            .store
            .select_single(tables::BOOK_CONTEXT, &filters)
            .await?;

        if existing.is_some() {
            self.store
                .update(
                    tables::BOOK_CONTEXT,
                    json!({ "value": value, "updated_at": now() }),
                    &filters,
                )
                .await?;
            Ok(json!({ "success": true, "action": "updated" }))
        } else {
            self.store
                .insert(
                    tables::BOOK_CONTEXT,
                    json!({ "project_id": project_id, "key": key, "value": value }),
                )
                .await?;
            Ok(json!({ "success": true, "action": "created" }))
        }
    }
}

/// Insert one tactic.
pub struct WriteTactic {
    store: Arc<dyn StateStore>,
}

impl WriteTactic {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for WriteTactic {
    fn name(&self) -> &str {
        "memory_write_tactic"
    }

    fn description(&self) -> &str {
        "Write a new tactic to the database."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "project_id": {
                    "type": "string",
                    "description": "The project ID"
                },
                "chapter_id": {
                    "type": "string",
                    "description": "The source chapter ID"
                },
                "tactic": {
                    "type": "object",
                    "description": "Tactic data: name, type, category, description, source_quote, etc."
                }
            },
            "required": ["project_id", "chapter_id", "tactic"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let mut tactic = object_arg(&args, "tactic")?;
        tactic.insert("project_id".into(), str_arg(&args, "project_id")?.into());
        tactic.insert("chapter_id".into(), str_arg(&args, "chapter_id")?.into());

        let rows = self
            .store
            .insert(tables::TACTICS, Value::Object(tactic))
            .await?;
        Ok(json!({ "success": true, "tactic_id": first_id(&rows) }))
    }
}

/// Insert many tactics in one store call.
pub struct WriteTacticsBatch {
    store: Arc<dyn StateStore>,
}

impl WriteTacticsBatch {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for WriteTacticsBatch {
    fn name(&self) -> &str {
        "memory_write_tactics_batch"
    }

    fn description(&self) -> &str {
        "Write multiple tactics at once."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "tactics": {
                    "type": "array",
                    "items": { "type": "object" },
                    "description": "Array of tactics, each with project_id, chapter_id, and tactic data"
                }
            },
            "required": ["tactics"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let tactics = args
            .get("tactics")
            .and_then(Value::as_array)
            .ok_or_else(|| ToolError::InvalidArguments("missing array argument 'tactics'".into()))?;

        if tactics.is_empty() {
            return Ok(json!({ "success": true, "count": 0 }));
        }

        let rows = self
            .store
            .insert(tables::TACTICS, Value::Array(tactics.clone()))
            .await?;
        Ok(json!({ "success": true, "count": rows.len() }))
    }
}

pub struct WriteGlossaryTerm {
    store: Arc<dyn StateStore>,
}

impl WriteGlossaryTerm {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for WriteGlossaryTerm {
    fn name(&self) -> &str {
        "memory_write_glossary_term"
    }

    fn description(&self) -> &str {
        "Write a glossary term."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "project_id": {
                    "type": "string",
                    "description": "The project ID"
                },
                "term": {
                    "type": "object",
                    "description": "Term data: english_term, definition, usage_notes, etc."
                }
            },
            "required": ["project_id", "term"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let mut term = object_arg(&args, "term")?;
        term.insert("project_id".into(), str_arg(&args, "project_id")?.into());

        let rows = self
            .store
            .insert(tables::GLOSSARY, Value::Object(term))
            .await?;
        Ok(json!({ "success": true, "term_id": first_id(&rows) }))
    }
}

/// Append to the decision audit trail.
pub struct LogDecision {
    store: Arc<dyn StateStore>,
}

impl LogDecision {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for LogDecision {
    fn name(&self) -> &str {
        "memory_log_decision"
    }

    fn description(&self) -> &str {
        "Log an agent decision for audit trail."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "project_id": { "type": "string", "description": "The project ID" },
                "agent_name": { "type": "string", "description": "Name of the agent making the decision" },
                "decision_type": { "type": "string", "description": "Type: include, exclude, categorize, transform, etc." },
                "subject": { "type": "string", "description": "What the decision is about" },
                "decision": { "type": "string", "description": "The decision made" },
                "reasoning": { "type": "string", "description": "Why this decision was made" },
                "confidence": { "type": "string", "description": "Confidence level: high, medium, low" },
                "chapter_id": { "type": "string", "description": "Optional: chapter ID if decision is chapter-specific" },
                "alternatives": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Optional: alternatives that were considered"
                }
            },
            "required": ["project_id", "agent_name", "decision_type", "subject", "decision", "reasoning"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let row = json!({
            "project_id": str_arg(&args, "project_id")?,
            "agent_name": str_arg(&args, "agent_name")?,
            "decision_type": str_arg(&args, "decision_type")?,
            "subject": str_arg(&args, "subject")?,
            "decision": str_arg(&args, "decision")?,
            "reasoning": str_arg(&args, "reasoning")?,
            "confidence": opt_str_arg(&args, "confidence").unwrap_or("high"),
            "chapter_id": opt_str_arg(&args, "chapter_id"),
            "alternatives": args.get("alternatives").cloned().unwrap_or_else(|| json!([])),
        });

        self.store.insert(tables::DECISIONS, row).await?;
        Ok(json!({ "success": true }))
    }
}

/// Record an open issue against a chapter.
pub struct FlagIssue {
    store: Arc<dyn StateStore>,
}

impl FlagIssue {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for FlagIssue {
    fn name(&self) -> &str {
        "memory_flag_issue"
    }

    fn description(&self) -> &str {
        "Flag an issue found during processing."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "chapter_id": { "type": "string", "description": "The chapter ID" },
                "issue_type": { "type": "string", "description": "Type: term, tone, fact, grammar, flow" },
                "severity": { "type": "string", "description": "Severity: critical, major, minor" },
                "description": { "type": "string", "description": "Description of the issue" },
                "location": { "type": "string", "description": "Where in the chapter" },
                "flagged_by": { "type": "string", "description": "Which agent flagged this" }
            },
            "required": ["chapter_id", "issue_type", "severity", "description", "location", "flagged_by"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let row = json!({
            "chapter_id": str_arg(&args, "chapter_id")?,
            "issue_type": str_arg(&args, "issue_type")?,
            "severity": str_arg(&args, "severity")?,
            "description": str_arg(&args, "description")?,
            "location": str_arg(&args, "location")?,
            "flagged_by": str_arg(&args, "flagged_by")?,
            "status": "open",
        });

        let rows = self.store.insert(tables::ISSUES, row).await?;
        Ok(json!({ "success": true, "issue_id": first_id(&rows) }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn test_book_context_creates_then_updates() {
        let store = Arc::new(InMemoryStore::new());
        let tool = WriteBookContext::new(store.clone());
        let args = json!({"project_id": "p1", "key": "style_guide", "value": "v1"});

        let first = tool.execute(args).await.unwrap();
        assert_eq!(first["action"], "created");

        let second = tool
            .execute(json!({"project_id": "p1", "key": "style_guide", "value": "v2"}))
            .await
            .unwrap();
        assert_eq!(second["action"], "updated");

        let rows = store.rows(tables::BOOK_CONTEXT).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["value"], "v2");
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_no_op_success() {
        // A failing table proves the store is never touched.
        let store = Arc::new(InMemoryStore::new().with_failing_table(
            tables::TACTICS,
            crate::store::StoreError::api("500", "should not be called"),
        ));
        let tool = WriteTacticsBatch::new(store);

        let result = tool.execute(json!({"tactics": []})).await.unwrap();
        assert_eq!(result, json!({"success": true, "count": 0}));
    }

    #[tokio::test]
    async fn test_batch_reports_written_count() {
        let store = Arc::new(InMemoryStore::new());
        let tool = WriteTacticsBatch::new(store.clone());
        let result = tool
            .execute(json!({"tactics": [
                {"project_id": "p1", "chapter_id": "c1", "name": "Ask for the close"},
                {"project_id": "p1", "chapter_id": "c1", "name": "Inspect the attic"}
            ]}))
            .await
            .unwrap();
        assert_eq!(result["count"], 2);
        assert_eq!(store.rows(tables::TACTICS).await.len(), 2);
    }

    #[tokio::test]
    async fn test_write_tactic_returns_generated_id() {
        let store = Arc::new(InMemoryStore::new());
        let tool = WriteTactic::new(store.clone());
        let result = tool
            .execute(json!({"project_id": "p1", "chapter_id": "c1", "tactic": {"name": "Follow up"}}))
            .await
            .unwrap();

        let rows = store.rows(tables::TACTICS).await;
        assert_eq!(result["tactic_id"], rows[0]["id"]);
        assert_eq!(rows[0]["chapter_id"], "c1");
    }

    #[tokio::test]
    async fn test_write_chapter_stamps_updated_at() {
        let store = Arc::new(InMemoryStore::new().with_table(
            tables::CHAPTERS,
            vec![json!({"id": "c1", "status": "pending"})],
        ));
        let tool = WriteChapter::new(store.clone());
        let result = tool
            .execute(json!({"chapter_id": "c1", "data": {"status": "analyzed"}}))
            .await
            .unwrap();
        assert_eq!(result, json!({"success": true, "updated": 1}));

        let row = &store.rows(tables::CHAPTERS).await[0];
        assert_eq!(row["status"], "analyzed");
        assert!(row["updated_at"].is_string());
    }

    #[tokio::test]
    async fn test_decision_and_issue_defaults() {
        let store = Arc::new(InMemoryStore::new());
        LogDecision::new(store.clone())
            .execute(json!({
                "project_id": "p1",
                "agent_name": "tactic_extractor",
                "decision_type": "exclude",
                "subject": "Anecdote about golf",
                "decision": "excluded",
                "reasoning": "Not actionable"
            }))
            .await
            .unwrap();
        let decision = &store.rows(tables::DECISIONS).await[0];
        assert_eq!(decision["confidence"], "high");
        assert_eq!(decision["alternatives"], json!([]));
        assert!(decision["chapter_id"].is_null());

        let issue = FlagIssue::new(store.clone())
            .execute(json!({
                "chapter_id": "c1",
                "issue_type": "tone",
                "severity": "minor",
                "description": "Too formal",
                "location": "Intro",
                "flagged_by": "tone_consistency_checker"
            }))
            .await
            .unwrap();
        assert!(issue["issue_id"].is_string());
        assert_eq!(store.rows(tables::ISSUES).await[0]["status"], "open");
    }
}
