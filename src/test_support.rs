//! Test doubles shared by the unit tests.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::agent::{RunContext, TaskResult};
use crate::llm::{ChatMessage, ChatRequest, ChatResponse, ContentBlock, LlmClient, TokenUsage};
use crate::pipeline::TaskExecutor;
use crate::tasks::TaskDefinition;

pub fn definition(name: &str, phase: u32) -> TaskDefinition {
    TaskDefinition {
        name: name.to_string(),
        phase,
        purpose: format!("Run {}.", name),
        system_prompt: format!("You are {}.", name),
        input_description: String::new(),
        output_description: String::new(),
        saves_to: String::new(),
        validation_checks: Vec::new(),
        depends_on: Vec::new(),
        source: PathBuf::from(format!("{}.md", name)),
    }
}

pub fn text_response(text: &str, input_tokens: u64, output_tokens: u64) -> ChatResponse {
    ChatResponse {
        content: vec![ContentBlock::text(text)],
        stop_reason: Some("end_turn".to_string()),
        usage: TokenUsage::new(input_tokens, output_tokens),
        model: None,
    }
}

/// A response requesting `calls`, ids `toolu_0..`. Usage is one token each way.
pub fn tool_response(calls: &[(&str, Value)]) -> ChatResponse {
    ChatResponse {
        content: calls
            .iter()
            .enumerate()
            .map(|(i, (name, input))| ContentBlock::ToolUse {
                id: format!("toolu_{}", i),
                name: name.to_string(),
                input: input.clone(),
            })
            .collect(),
        stop_reason: Some("tool_use".to_string()),
        usage: TokenUsage::new(1, 1),
        model: None,
    }
}

/// What the scripted LLM was asked.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub tool_names: Vec<String>,
}

/// LLM double replaying canned responses, then an optional repeating one.
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Result<ChatResponse, String>>>,
    fallback: Option<ChatResponse>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self::with_results(responses.into_iter().map(Ok).collect())
    }

    pub fn with_results(results: Vec<Result<ChatResponse, String>>) -> Self {
        Self {
            script: Mutex::new(results.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer every request with `response`.
    pub fn repeating(response: ChatResponse) -> Self {
        Self {
            fallback: Some(response),
            ..Self::with_results(Vec::new())
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat_completion(&self, request: ChatRequest<'_>) -> anyhow::Result<ChatResponse> {
        self.requests.lock().unwrap().push(RecordedRequest {
            model: request.model.to_string(),
            system: request.system.to_string(),
            messages: request.messages.to_vec(),
            tool_names: request.tools.iter().map(|t| t.name.clone()).collect(),
        });

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| anyhow::anyhow!("script exhausted")),
        }
    }
}

/// One recorded task invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub task: String,
    pub phase: u32,
    pub unit_id: Option<String>,
}

/// Executor double that records invocations and fails on demand.
#[derive(Default)]
pub struct RecordingExecutor {
    invocations: Mutex<Vec<Invocation>>,
    failing_tasks: HashSet<String>,
    failing_units: HashSet<String>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, tasks: &[&str]) -> Self {
        self.failing_tasks.extend(tasks.iter().map(|t| t.to_string()));
        self
    }

    pub fn failing_unit(mut self, unit_id: &str) -> Self {
        self.failing_units.insert(unit_id.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn count(&self, task: &str) -> usize {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.task == task)
            .count()
    }

    /// Task names in execution order, consecutive repeats collapsed.
    pub fn task_order(&self) -> Vec<String> {
        let mut order: Vec<String> = self.invocations().into_iter().map(|i| i.task).collect();
        order.dedup();
        order
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskExecutor for RecordingExecutor {
    async fn execute(&self, task: &str, phase: u32, ctx: RunContext) -> TaskResult {
        self.invocations.lock().unwrap().push(Invocation {
            task: task.to_string(),
            phase,
            unit_id: ctx.unit_id.clone(),
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let unit_failed = ctx
            .unit_id
            .as_ref()
            .is_some_and(|u| self.failing_units.contains(u));
        if self.failing_tasks.contains(task) || unit_failed {
            TaskResult::failed(task, ctx.unit_id, "scripted failure")
        } else {
            TaskResult {
                task_name: task.to_string(),
                unit_id: ctx.unit_id,
                success: true,
                output: Some(format!("{} done", task)),
                error: None,
                duration_ms: 1,
                input_tokens: 10,
                output_tokens: 5,
                tool_calls: 2,
            }
        }
    }
}

/// Panics on one task, records every other invocation in `inner`.
pub struct PanicsOn {
    task: &'static str,
    pub inner: RecordingExecutor,
}

impl PanicsOn {
    pub fn new(task: &'static str) -> Self {
        Self {
            task,
            inner: RecordingExecutor::new(),
        }
    }
}

#[async_trait]
impl TaskExecutor for PanicsOn {
    async fn execute(&self, task: &str, phase: u32, ctx: RunContext) -> TaskResult {
        if task == self.task {
            panic!("{} blew up", task);
        }
        self.inner.execute(task, phase, ctx).await
    }
}
