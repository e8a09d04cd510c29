//! The seam between scheduling and running a task.

use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::{AgentRunner, RunContext, TaskResult};
use crate::tasks::PromptLibrary;

/// Runs one task invocation. The scheduler only sees this seam.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Never fails: every problem is reported through the result.
    async fn execute(&self, task: &str, phase: u32, ctx: RunContext) -> TaskResult;
}

/// Run `executor` on its own tokio task so a panic inside it becomes a
/// failed result instead of unwinding through the caller.
pub async fn execute_isolated(
    executor: &Arc<dyn TaskExecutor>,
    task: &str,
    phase: u32,
    ctx: RunContext,
) -> TaskResult {
    let unit_id = ctx.unit_id.clone();
    let executor = executor.clone();
    let name = task.to_string();
    match tokio::spawn(async move { executor.execute(&name, phase, ctx).await }).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!("Task {} aborted: {}", task, e);
            TaskResult::failed(task, unit_id, format!("task aborted: {}", e))
        }
    }
}

/// Loads the task specification, then runs it through the agent loop.
pub struct AgentExecutor {
    library: PromptLibrary,
    runner: Arc<AgentRunner>,
}

impl AgentExecutor {
    pub fn new(library: PromptLibrary, runner: Arc<AgentRunner>) -> Self {
        Self { library, runner }
    }
}

#[async_trait]
impl TaskExecutor for AgentExecutor {
    async fn execute(&self, task: &str, phase: u32, ctx: RunContext) -> TaskResult {
        match self.library.load(task, phase).await {
            Ok(def) => self.runner.run(&def, &ctx).await,
            Err(e) => {
                tracing::error!("Cannot run {}: {}", task, e);
                TaskResult::failed(task, ctx.unit_id, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::test_support::{text_response, ScriptedLlm};
    use crate::tools::{LearningsStore, ToolRegistry};

    struct Exploding;

    #[async_trait]
    impl TaskExecutor for Exploding {
        async fn execute(&self, _task: &str, _phase: u32, _ctx: RunContext) -> TaskResult {
            panic!("tool blew up");
        }
    }

    #[tokio::test]
    async fn test_panicking_task_becomes_failed_result() {
        let executor: Arc<dyn TaskExecutor> = Arc::new(Exploding);
        let result = execute_isolated(
            &executor,
            "chapter_translator",
            9,
            RunContext::new("p1", "m").with_unit("c3"),
        )
        .await;

        assert!(!result.success);
        assert_eq!(result.task_name, "chapter_translator");
        assert_eq!(result.unit_id.as_deref(), Some("c3"));
        assert!(result.error.unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn test_missing_specification_fails_before_llm() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(ScriptedLlm::new(vec![text_response("unused", 1, 1)]));
        let tools = Arc::new(
            ToolRegistry::memory(Arc::new(InMemoryStore::new()), LearningsStore::new(dir.path()))
                .unwrap(),
        );
        let executor = AgentExecutor::new(
            PromptLibrary::new(dir.path()),
            Arc::new(AgentRunner::new(llm.clone(), tools, 100, 1024)),
        );

        let result = executor
            .execute("ghost", 1, RunContext::new("p1", "m").with_unit("c1"))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not found"));
        assert_eq!(result.unit_id.as_deref(), Some("c1"));
        assert_eq!(result.tool_calls, 0);
        assert_eq!(llm.request_count(), 0);
    }

    #[tokio::test]
    async fn test_loads_and_runs_specification() {
        let dir = tempfile::tempdir().unwrap();
        let phase_dir = dir.path().join("phase_02_analysis");
        std::fs::create_dir_all(&phase_dir).unwrap();
        std::fs::write(
            phase_dir.join("story_extractor.md"),
            "## Purpose\nFind stories.\n## System Prompt\n```\nYou find stories.\n```\n",
        )
        .unwrap();

        let llm = Arc::new(ScriptedLlm::new(vec![text_response("Found 3 stories.", 1, 1)]));
        let tools = Arc::new(
            ToolRegistry::memory(Arc::new(InMemoryStore::new()), LearningsStore::new(dir.path()))
                .unwrap(),
        );
        let executor = AgentExecutor::new(
            PromptLibrary::new(dir.path()),
            Arc::new(AgentRunner::new(llm.clone(), tools, 100, 1024)),
        );

        let result = executor
            .execute("story_extractor", 2, RunContext::new("p1", "m"))
            .await;
        assert!(result.success);
        assert_eq!(result.output.as_deref(), Some("Found 3 stories."));
        assert!(llm.requests()[0].system.starts_with("You find stories."));
    }
}
