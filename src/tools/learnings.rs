//! Learnings files: markdown notes that agents read before working and
//! append to after.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;

use super::{opt_str_arg, str_arg, Tool, ToolError};

const GLOBAL_FILE: &str = "_global.md";

/// Directory of `<agent>.md` learnings files plus a shared `_global.md`.
#[derive(Debug, Clone)]
pub struct LearningsStore {
    dir: PathBuf,
}

impl LearningsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of an agent's file. Characters outside `[A-Za-z0-9_-]` are
    /// replaced so a name cannot escape the directory.
    fn agent_file(&self, agent_name: &str) -> Result<(String, PathBuf), ToolError> {
        let safe: String = agent_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if safe.is_empty() {
            return Err(ToolError::InvalidArguments("agent_name is empty".into()));
        }
        let file = format!("{}.md", safe);
        let path = self.dir.join(&file);
        Ok((file, path))
    }

    async fn read_optional(path: &Path) -> Result<Option<String>, ToolError> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Global learnings followed by the agent's own, skipping absent files.
    pub async fn read(&self, agent_name: &str) -> Result<Vec<(String, String)>, ToolError> {
        let mut learnings = Vec::new();
        if let Some(content) = Self::read_optional(&self.dir.join(GLOBAL_FILE)).await? {
            learnings.push((GLOBAL_FILE.to_string(), content));
        }

        let (file, path) = self.agent_file(agent_name)?;
        if let Some(content) = Self::read_optional(&path).await? {
            learnings.push((file, content));
        }
        Ok(learnings)
    }

    /// Append a timestamped entry, creating the file with a header first.
    pub async fn append(
        &self,
        agent_name: &str,
        learning: &str,
        context: Option<&str>,
    ) -> Result<(), ToolError> {
        let (_, path) = self.agent_file(agent_name)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M");
        let mut entry = format!("\n\n---\nAdded {}", timestamp);
        if let Some(context) = context {
            entry.push_str(&format!(" ({})", context));
        }
        entry.push_str(&format!(":\n- {}", learning));

        let exists = tokio::fs::try_exists(&path).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        if !exists {
            file.write_all(format!("# Learnings: {}\n", agent_name).as_bytes())
                .await?;
        }
        file.write_all(entry.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

pub struct ReadLearnings {
    learnings: Arc<LearningsStore>,
}

impl ReadLearnings {
    pub fn new(learnings: Arc<LearningsStore>) -> Self {
        Self { learnings }
    }
}

#[async_trait]
impl Tool for ReadLearnings {
    fn name(&self) -> &str {
        "memory_read_learnings"
    }

    fn description(&self) -> &str {
        "Read learnings files for an agent. Always read _global.md and agent-specific learnings."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agent_name": {
                    "type": "string",
                    "description": "The agent name (e.g., 'tactic_extractor')"
                }
            },
            "required": ["agent_name"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let agent_name = str_arg(&args, "agent_name")?;
        let learnings: Vec<Value> = self
            .learnings
            .read(agent_name)
            .await?
            .into_iter()
            .map(|(file, content)| json!({ "file": file, "content": content }))
            .collect();
        Ok(json!({ "learnings": learnings }))
    }
}

pub struct AppendLearnings {
    learnings: Arc<LearningsStore>,
}

impl AppendLearnings {
    pub fn new(learnings: Arc<LearningsStore>) -> Self {
        Self { learnings }
    }
}

#[async_trait]
impl Tool for AppendLearnings {
    fn name(&self) -> &str {
        "memory_append_learnings"
    }

    fn description(&self) -> &str {
        "Append a new learning to an agent's learnings file."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agent_name": {
                    "type": "string",
                    "description": "The agent name"
                },
                "learning": {
                    "type": "string",
                    "description": "The learning to append"
                },
                "context": {
                    "type": "string",
                    "description": "Context (e.g., 'Chapter 3 run')"
                }
            },
            "required": ["agent_name", "learning"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        self.learnings
            .append(
                str_arg(&args, "agent_name")?,
                str_arg(&args, "learning")?,
                opt_str_arg(&args, "context"),
            )
            .await?;
        Ok(json!({ "success": true }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_creates_header_then_appends() {
        let dir = tempfile::tempdir().unwrap();
        let store = LearningsStore::new(dir.path().join("learnings"));

        store
            .append("tactic_extractor", "Skip anecdotes", Some("Chapter 3 run"))
            .await
            .unwrap();
        store
            .append("tactic_extractor", "Quote exactly", None)
            .await
            .unwrap();

        let content =
            std::fs::read_to_string(dir.path().join("learnings/tactic_extractor.md")).unwrap();
        assert!(content.starts_with("# Learnings: tactic_extractor\n"));
        assert!(content.contains("(Chapter 3 run):\n- Skip anecdotes"));
        assert!(content.ends_with(":\n- Quote exactly"));
        assert_eq!(content.matches("# Learnings").count(), 1);
    }

    #[tokio::test]
    async fn test_read_returns_global_then_agent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("_global.md"), "global").unwrap();
        std::fs::write(dir.path().join("quote_extractor.md"), "mine").unwrap();

        let tool = ReadLearnings::new(Arc::new(LearningsStore::new(dir.path())));
        let result = tool
            .execute(json!({"agent_name": "quote_extractor"}))
            .await
            .unwrap();
        assert_eq!(
            result,
            json!({"learnings": [
                {"file": "_global.md", "content": "global"},
                {"file": "quote_extractor.md", "content": "mine"}
            ]})
        );
    }

    #[tokio::test]
    async fn test_missing_files_read_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = LearningsStore::new(dir.path().join("absent"));
        assert!(store.read("anyone").await.unwrap().is_empty());
    }

    #[test]
    fn test_agent_name_cannot_escape_directory() {
        let store = LearningsStore::new("/tmp/learnings");
        let (file, path) = store.agent_file("../../etc/passwd").unwrap();
        assert_eq!(file, "______etc_passwd.md");
        assert_eq!(path.parent().unwrap(), Path::new("/tmp/learnings"));
    }
}
