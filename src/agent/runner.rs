//! The tool-calling execution loop.

use std::sync::Arc;
use std::time::Instant;

use tracing::Instrument;

use super::{prompt, RunContext, TaskResult};
use crate::llm::{ChatMessage, ChatRequest, ContentBlock, LlmClient, TokenUsage, ToolCall};
use crate::tasks::TaskDefinition;
use crate::tools::ToolRegistry;

/// States of one run. Transitions:
///
/// ```text
/// Starting -> TurnPending -> (ToolsExecuting -> TurnPending)* -> Done | Failed
/// ```
enum LoopState {
    Starting,
    TurnPending,
    ToolsExecuting(Vec<ToolCall>),
    Done(String),
    Failed(String),
}

/// Runs task definitions against an LLM with access to a tool registry.
pub struct AgentRunner {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    max_tool_calls: u32,
    max_tokens: u32,
}

impl AgentRunner {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        max_tool_calls: u32,
        max_tokens: u32,
    ) -> Self {
        Self {
            llm,
            tools,
            max_tool_calls,
            max_tokens,
        }
    }

    /// Drive one task to `Done` or `Failed`. Never returns an error: every
    /// failure is folded into the result together with the metrics gathered
    /// so far.
    pub async fn run(&self, def: &TaskDefinition, ctx: &RunContext) -> TaskResult {
        let span = tracing::info_span!(
            "task",
            task = %def.name,
            phase = def.phase,
            project_id = %ctx.project_id,
            unit_id = ctx.unit_id.as_deref().unwrap_or("-"),
        );
        self.run_loop(def, ctx).instrument(span).await
    }

    async fn run_loop(&self, def: &TaskDefinition, ctx: &RunContext) -> TaskResult {
        let start = Instant::now();
        let tools = self.tools.definitions();
        let system = prompt::system_prompt(def, ctx, &self.tools.catalog_summary());

        let mut messages: Vec<ChatMessage> = Vec::new();
        let mut usage = TokenUsage::default();
        let mut tool_calls: u32 = 0;
        let mut turns: u32 = 0;

        tracing::info!("Starting task {}", def.name);

        let mut state = LoopState::Starting;
        let outcome = loop {
            state = match state {
                LoopState::Starting => {
                    messages.push(ChatMessage::user_text(prompt::initial_message(def, ctx)));
                    LoopState::TurnPending
                }

                LoopState::TurnPending => {
                    turns += 1;
                    let request = ChatRequest {
                        model: &ctx.model,
                        system: &system,
                        messages: &messages,
                        tools: &tools,
                        max_tokens: self.max_tokens,
                    };

                    match self.llm.chat_completion(request).await {
                        Err(e) => LoopState::Failed(format!("LLM request failed: {:#}", e)),
                        Ok(response) => {
                            usage.input_tokens += response.usage.input_tokens;
                            usage.output_tokens += response.usage.output_tokens;

                            let calls = response.tool_calls();
                            let final_text = response.last_text().unwrap_or_default().to_string();
                            messages.push(ChatMessage::assistant(response.content));

                            if calls.is_empty() {
                                LoopState::Done(final_text)
                            } else {
                                tool_calls = tool_calls.saturating_add(calls.len() as u32);
                                if tool_calls > self.max_tool_calls {
                                    LoopState::Failed(format!(
                                        "Too many tool calls (>{})",
                                        self.max_tool_calls
                                    ))
                                } else {
                                    LoopState::ToolsExecuting(calls)
                                }
                            }
                        }
                    }
                }

                LoopState::ToolsExecuting(calls) => {
                    let mut results = Vec::with_capacity(calls.len());
                    for call in calls {
                        tracing::debug!("Tool call {} ({})", call.name, call.id);
                        let content = self.tools.invoke(&call.name, call.input).await;
                        results.push(ContentBlock::tool_result(call.id, content));
                    }
                    messages.push(ChatMessage::tool_results(results));
                    LoopState::TurnPending
                }

                LoopState::Done(output) => break Ok(output),
                LoopState::Failed(error) => break Err(error),
            };
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let (success, output, error) = match outcome {
            Ok(output) => {
                tracing::info!(
                    "Task {} completed in {}ms ({} turns, {} tool calls, {} tokens)",
                    def.name,
                    duration_ms,
                    turns,
                    tool_calls,
                    usage.total()
                );
                (true, Some(output), None)
            }
            Err(error) => {
                tracing::error!(
                    "Task {} failed after {}ms ({} tool calls): {}",
                    def.name,
                    duration_ms,
                    tool_calls,
                    error
                );
                (false, None, Some(error))
            }
        };

        TaskResult {
            task_name: def.name.clone(),
            unit_id: ctx.unit_id.clone(),
            success,
            output,
            error,
            duration_ms,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            tool_calls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;
    use crate::store::{tables, InMemoryStore, StateStore};
    use crate::test_support::{definition, text_response, tool_response, ScriptedLlm};
    use crate::tools::LearningsStore;
    use serde_json::json;

    fn tools(store: Arc<dyn StateStore>, dir: &tempfile::TempDir) -> Arc<ToolRegistry> {
        Arc::new(ToolRegistry::memory(store, LearningsStore::new(dir.path())).unwrap())
    }

    fn runner(llm: Arc<ScriptedLlm>, tools: Arc<ToolRegistry>) -> AgentRunner {
        AgentRunner::new(llm, tools, 100, 1024)
    }

    #[tokio::test]
    async fn test_text_only_first_turn_is_done() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(ScriptedLlm::new(vec![text_response("Nothing to do.", 12, 4)]));
        let runner = runner(llm.clone(), tools(Arc::new(InMemoryStore::new()), &dir));

        let result = runner
            .run(&definition("quote_extractor", 2), &RunContext::new("p1", "m"))
            .await;

        assert!(result.success);
        assert_eq!(result.output.as_deref(), Some("Nothing to do."));
        assert_eq!(result.error, None);
        assert_eq!(result.tool_calls, 0);
        assert_eq!((result.input_tokens, result.output_tokens), (12, 4));
        assert_eq!(llm.request_count(), 1);
    }

    #[tokio::test]
    async fn test_tool_results_are_fed_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            InMemoryStore::new().with_table(tables::PROJECTS, vec![json!({"id": "p1", "title": "Roofs"})]),
        );
        let llm = Arc::new(ScriptedLlm::new(vec![
            tool_response(&[("memory_read_project", json!({"project_id": "p1"}))]),
            text_response("Read the project.", 5, 5),
        ]));
        let runner = runner(llm.clone(), tools(store, &dir));

        let ctx = RunContext::new("p1", "m").with_unit("c1");
        let result = runner.run(&definition("tactic_extractor", 2), &ctx).await;
        assert!(result.success);
        assert_eq!(result.tool_calls, 1);
        assert_eq!(result.unit_id.as_deref(), Some("c1"));

        let second = &llm.requests()[1];
        assert_eq!(second.messages.len(), 3);
        assert_eq!(second.messages[1].role, Role::Assistant);
        match &second.messages[2].content[0] {
            ContentBlock::ToolResult { tool_use_id, content } => {
                assert_eq!(tool_use_id, "toolu_0");
                assert!(content.contains("Roofs"));
            }
            other => panic!("expected tool result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_does_not_abort_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(ScriptedLlm::new(vec![
            tool_response(&[("memory_bogus", json!({}))]),
            text_response("Recovered.", 1, 1),
        ]));
        let runner = runner(llm.clone(), tools(Arc::new(InMemoryStore::new()), &dir));

        let result = runner.run(&definition("x", 1), &RunContext::new("p1", "m")).await;
        assert!(result.success);
        match &llm.requests()[1].messages[2].content[0] {
            ContentBlock::ToolResult { content, .. } => assert!(content.contains("Unknown tool")),
            other => panic!("expected tool result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_hundred_tool_calls_still_continue() {
        let dir = tempfile::tempdir().unwrap();
        let mut script: Vec<_> = (0..100)
            .map(|_| tool_response(&[("memory_read_glossary", json!({"project_id": "p1"}))]))
            .collect();
        script.push(text_response("Done after 100 calls.", 1, 1));
        let llm = Arc::new(ScriptedLlm::new(script));
        let runner = runner(llm, tools(Arc::new(InMemoryStore::new()), &dir));

        let result = runner.run(&definition("x", 1), &RunContext::new("p1", "m")).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.tool_calls, 100);
    }

    #[tokio::test]
    async fn test_endless_tool_calls_fail_at_101() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(ScriptedLlm::repeating(tool_response(&[(
            "memory_read_glossary",
            json!({"project_id": "p1"}),
        )])));
        let runner = runner(llm.clone(), tools(Arc::new(InMemoryStore::new()), &dir));

        let result = runner.run(&definition("x", 1), &RunContext::new("p1", "m")).await;
        assert!(!result.success);
        assert_eq!(result.tool_calls, 101);
        assert!(result.error.unwrap().contains("Too many tool calls"));
        assert_eq!(result.output, None);
        assert_eq!(llm.request_count(), 101);
        // Metrics gathered before the failure are kept.
        assert_eq!(result.input_tokens, 101);
    }

    #[tokio::test]
    async fn test_llm_error_keeps_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(ScriptedLlm::with_results(vec![
            Ok(tool_response(&[("memory_read_glossary", json!({"project_id": "p1"}))])),
            Err("server_error (HTTP 500): boom".to_string()),
        ]));
        let runner = runner(llm, tools(Arc::new(InMemoryStore::new()), &dir));

        let result = runner.run(&definition("x", 1), &RunContext::new("p1", "m")).await;
        assert!(!result.success);
        assert_eq!(result.tool_calls, 1);
        assert_eq!(result.input_tokens, 1);
        assert!(result.error.unwrap().contains("boom"));
    }
}
