//! # Book Maker
//!
//! A phase-ordered orchestrator for tool-calling LLM agents that transform a
//! book held in a shared state store.
//!
//! Each task is a markdown specification (purpose, system prompt, expected
//! output). Tasks are grouped into numbered phases and may depend on earlier
//! tasks of the same phase. Unit-level tasks run once per chapter.
//!
//! ## Architecture
//!
//! ```text
//!   Orchestrator ──► Pipeline ──► PhaseScheduler ──► TaskExecutor
//!        │                                               │
//!        ▼                                               ▼
//!   RunRegistry / RunControl                  AgentRunner ◄──► LlmClient
//!                                                   │
//!                                                   ▼
//!                                             ToolRegistry ──► StateStore
//! ```
//!
//! ## Modules
//! - `tasks`: task specifications, the phase registry, the prompt library
//! - `agent`: the tool-calling conversation loop
//! - `tools`: memory tools exposed to agents
//! - `pipeline`: dependency-ordered phase scheduling
//! - `orchestrator`: run control and project status bookkeeping
//! - `store`, `llm`: the two external seams

pub mod agent;
pub mod config;
pub mod control;
pub mod llm;
pub mod logging;
pub mod orchestrator;
pub mod pipeline;
pub mod store;
pub mod tasks;
pub mod tools;

#[cfg(test)]
mod test_support;

pub use agent::{AgentRunner, RunContext, TaskResult};
pub use config::Config;
pub use orchestrator::Orchestrator;
pub use pipeline::{Pipeline, PipelineReport};
