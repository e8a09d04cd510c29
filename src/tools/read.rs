//! Read tools over the state store.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{opt_str_arg, str_arg, Tool, ToolError};
use crate::store::{project_chapters, tables, Filters, SelectOptions, StateStore};

/// Read a project row.
pub struct ReadProject {
    store: Arc<dyn StateStore>,
}

impl ReadProject {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ReadProject {
    fn name(&self) -> &str {
        "memory_read_project"
    }

    fn description(&self) -> &str {
        "Read project data including status, metadata, and configuration."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "project_id": {
                    "type": "string",
                    "description": "The project ID (UUID)"
                }
            },
            "required": ["project_id"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let project_id = str_arg(&args, "project_id")?;
        let row = self
            .store
            .select_single(tables::PROJECTS, &Filters::new().eq("id", project_id))
            .await?;
        Ok(row.unwrap_or_else(|| json!({"error": "Project not found"})))
    }
}

/// Read one chapter row.
pub struct ReadChapter {
    store: Arc<dyn StateStore>,
}

impl ReadChapter {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ReadChapter {
    fn name(&self) -> &str {
        "memory_read_chapter"
    }

    fn description(&self) -> &str {
        "Read a chapter's data including content, analysis results, and status."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "chapter_id": {
                    "type": "string",
                    "description": "The chapter ID (UUID)"
                }
            },
            "required": ["chapter_id"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let chapter_id = str_arg(&args, "chapter_id")?;
        let row = self
            .store
            .select_single(tables::CHAPTERS, &Filters::new().eq("id", chapter_id))
            .await?;
        Ok(row.unwrap_or_else(|| json!({"error": "Chapter not found"})))
    }
}

/// Read every chapter of a project in chapter order.
pub struct ReadChapters {
    store: Arc<dyn StateStore>,
}

impl ReadChapters {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ReadChapters {
    fn name(&self) -> &str {
        "memory_read_chapters"
    }

    fn description(&self) -> &str {
        "Read all chapters for a project, ordered by chapter number."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "project_id": {
                    "type": "string",
                    "description": "The project ID (UUID)"
                }
            },
            "required": ["project_id"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let project_id = str_arg(&args, "project_id")?;
        let chapters = project_chapters(self.store.as_ref(), project_id).await?;
        Ok(json!({ "chapters": chapters }))
    }
}

/// Read one book-level context value.
pub struct ReadBookContext {
    store: Arc<dyn StateStore>,
}

impl ReadBookContext {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ReadBookContext {
    fn name(&self) -> &str {
        "memory_read_book_context"
    }

    fn description(&self) -> &str {
        "Read book-level context like style guide, structure, or raw markdown."
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
                    "description": "Context key: 'style_guide', 'structure', 'raw_markdown', 'spanish_style_guide', 'relationships'"
                }
            },
            "required": ["project_id", "key"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let project_id = str_arg(&args, "project_id")?;
        let key = str_arg(&args, "key")?;
        let row = self
            .store
            .select_single(
                tables::BOOK_CONTEXT,
                &Filters::new().eq("project_id", project_id).eq("key", key),
            )
            .await?;

        // A missing key reads as null rather than an error.
        let value = row
            .and_then(|mut r| r.get_mut("value").map(Value::take))
            .unwrap_or(Value::Null);
        Ok(json!({ "key": key, "value": value }))
    }
}

/// Read tactics for a project, optionally narrowed to one chapter.
pub struct ReadTactics {
    store: Arc<dyn StateStore>,
}

impl ReadTactics {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ReadTactics {
    fn name(&self) -> &str {
        "memory_read_tactics"
    }

    fn description(&self) -> &str {
        "Read tactics for a project or chapter."
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
                    "description": "Optional: filter to specific chapter"
                }
            },
            "required": ["project_id"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let mut filters = Filters::new().eq("project_id", str_arg(&args, "project_id")?);
        if let Some(chapter_id) = opt_str_arg(&args, "chapter_id") {
            filters = filters.eq("chapter_id", chapter_id);
        }
        let tactics = self
            .store
            .select(tables::TACTICS, &filters, &SelectOptions::default())
            .await?;
        Ok(json!({ "tactics": tactics }))
    }
}

pub struct ReadGlossary {
    store: Arc<dyn StateStore>,
}

impl ReadGlossary {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ReadGlossary {
    fn name(&self) -> &str {
        "memory_read_glossary"
    }

    fn description(&self) -> &str {
        "Read glossary terms for a project."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "project_id": {
                    "type": "string",
                    "description": "The project ID"
                }
            },
            "required": ["project_id"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let project_id = str_arg(&args, "project_id")?;
        let glossary = self
            .store
            .select(
                tables::GLOSSARY,
                &Filters::new().eq("project_id", project_id),
                &SelectOptions::default(),
            )
            .await?;
        Ok(json!({ "glossary": glossary }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn store() -> Arc<dyn StateStore> {
        Arc::new(
            InMemoryStore::new()
                .with_table(
                    tables::PROJECTS,
                    vec![json!({"id": "p1", "title": "Roofing Sales", "status": "draft"})],
                )
                .with_table(
                    tables::CHAPTERS,
                    vec![
                        json!({"id": "c2", "project_id": "p1", "chapter_number": 2}),
                        json!({"id": "c1", "project_id": "p1", "chapter_number": 1}),
                    ],
                )
                .with_table(
                    tables::TACTICS,
                    vec![
                        json!({"id": "t1", "project_id": "p1", "chapter_id": "c1"}),
                        json!({"id": "t2", "project_id": "p1", "chapter_id": "c2"}),
                    ],
                )
                .with_table(
                    tables::BOOK_CONTEXT,
                    vec![json!({"project_id": "p1", "key": "style_guide", "value": "Be direct."})],
                ),
        )
    }

    #[tokio::test]
    async fn test_read_project_found_and_missing() {
        let tool = ReadProject::new(store());
        let found = tool.execute(json!({"project_id": "p1"})).await.unwrap();
        assert_eq!(found["title"], "Roofing Sales");

        let missing = tool.execute(json!({"project_id": "nope"})).await.unwrap();
        assert_eq!(missing["error"], "Project not found");
    }

    #[tokio::test]
    async fn test_read_chapters_in_order() {
        let tool = ReadChapters::new(store());
        let result = tool.execute(json!({"project_id": "p1"})).await.unwrap();
        assert_eq!(result["chapters"][0]["id"], "c1");
        assert_eq!(result["chapters"][1]["id"], "c2");
    }

    #[tokio::test]
    async fn test_read_book_context_missing_key_is_null() {
        let tool = ReadBookContext::new(store());
        let hit = tool
            .execute(json!({"project_id": "p1", "key": "style_guide"}))
            .await
            .unwrap();
        assert_eq!(hit, json!({"key": "style_guide", "value": "Be direct."}));

        let miss = tool
            .execute(json!({"project_id": "p1", "key": "structure"}))
            .await
            .unwrap();
        assert_eq!(miss, json!({"key": "structure", "value": null}));
    }

    #[tokio::test]
    async fn test_read_tactics_chapter_filter() {
        let tool = ReadTactics::new(store());
        let all = tool.execute(json!({"project_id": "p1"})).await.unwrap();
        assert_eq!(all["tactics"].as_array().unwrap().len(), 2);

        let one = tool
            .execute(json!({"project_id": "p1", "chapter_id": "c2"}))
            .await
            .unwrap();
        assert_eq!(one["tactics"].as_array().unwrap().len(), 1);
        assert_eq!(one["tactics"][0]["id"], "t2");
    }
}
