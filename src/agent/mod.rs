//! Agent execution: one task driven to completion through a tool-calling
//! conversation with the LLM.

mod prompt;
mod runner;

pub use prompt::{initial_message, system_prompt};
pub use runner::AgentRunner;

use serde::Serialize;

/// Inputs of one task invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub project_id: String,
    /// Sub-unit (chapter) id for unit-level tasks.
    pub unit_id: Option<String>,
    pub model: String,
    pub extra_context: Option<String>,
}

impl RunContext {
    pub fn new(project_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            unit_id: None,
            model: model.into(),
            extra_context: None,
        }
    }

    pub fn with_unit(mut self, unit_id: impl Into<String>) -> Self {
        self.unit_id = Some(unit_id.into());
        self
    }

    pub fn with_extra_context(mut self, extra: impl Into<String>) -> Self {
        self.extra_context = Some(extra.into());
        self
    }
}

/// Outcome of one task invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskResult {
    pub task_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<String>,
    pub success: bool,
    /// Final text of the conversation; only set on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Failure description; only set on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub tool_calls: u32,
}

impl TaskResult {
    /// A failure that happened before the conversation started.
    pub fn failed(task_name: &str, unit_id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            task_name: task_name.to_string(),
            unit_id,
            success: false,
            output: None,
            error: Some(error.into()),
            duration_ms: 0,
            input_tokens: 0,
            output_tokens: 0,
            tool_calls: 0,
        }
    }
}
