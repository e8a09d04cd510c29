//! Control surface over the pipeline.
//!
//! Wraps the driver with what a front-end needs: one run per project,
//! background runs with pause/resume/stop, project status bookkeeping in the
//! store, and registry introspection.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::agent::{AgentRunner, RunContext, TaskResult};
use crate::config::Config;
use crate::control::{ControlError, RunControl, RunRegistry};
use crate::llm::{AnthropicClient, LlmClient};
use crate::pipeline::{
    execute_isolated, AgentExecutor, PhaseObserver, PhaseOutcome, PhaseScheduler, Pipeline,
    PipelineReport, TaskExecutor,
};
use crate::store::{project_chapters, tables, AdminApiClient, Filters, StateStore};
use crate::tasks::{phase_directory, PhaseRegistry, PromptLibrary, TaskConfig};
use crate::tools::{LearningsStore, ToolRegistry};

/// Project `status` values written to the store.
pub mod status {
    pub const DRAFT: &str = "draft";
    pub const RUNNING: &str = "running";
    pub const PAUSED: &str = "paused";
    pub const COMPLETED: &str = "completed";
    pub const ERROR: &str = "error";
}

/// One phase of the registry, for listing.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseInfo {
    pub phase: u32,
    pub directory: String,
    pub tasks: Vec<TaskConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectStatus {
    pub project_id: String,
    pub status: String,
    pub current_phase: u32,
    pub total_chapters: usize,
    pub completed_chapters: usize,
    pub is_running: bool,
    pub is_paused: bool,
}

/// Writes `current_phase` as each phase starts.
struct StatusObserver {
    store: Arc<dyn StateStore>,
}

#[async_trait]
impl PhaseObserver for StatusObserver {
    async fn phase_started(&self, project_id: &str, phase: u32) {
        update_status(self.store.as_ref(), project_id, status::RUNNING, Some(phase)).await;
    }

    async fn phase_finished(&self, _project_id: &str, outcome: &PhaseOutcome) {
        if let Some(error) = &outcome.error {
            tracing::warn!("Phase {} ended with error: {}", outcome.phase, error);
        }
    }
}

/// Status writes are best effort: a failure is logged, never fatal to a run.
async fn update_status(
    store: &dyn StateStore,
    project_id: &str,
    status: &str,
    current_phase: Option<u32>,
) {
    let mut data = json!({ "status": status, "updated_at": Utc::now().to_rfc3339() });
    if let Some(phase) = current_phase {
        data["current_phase"] = json!(phase);
    }
    if let Err(e) = store
        .update(tables::PROJECTS, data, &Filters::new().eq("id", project_id))
        .await
    {
        tracing::warn!("Failed to set project {} status to {}: {}", project_id, status, e);
    }
}

pub struct Orchestrator {
    registry: Arc<PhaseRegistry>,
    store: Arc<dyn StateStore>,
    executor: Arc<dyn TaskExecutor>,
    runs: RunRegistry,
    unit_concurrency: usize,
    default_model: String,
    extra_context: Option<String>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<PhaseRegistry>,
        store: Arc<dyn StateStore>,
        executor: Arc<dyn TaskExecutor>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            store,
            executor,
            runs: RunRegistry::new(),
            unit_concurrency: 1,
            default_model: default_model.into(),
            extra_context: None,
        }
    }

    pub fn with_unit_concurrency(mut self, limit: usize) -> Self {
        self.unit_concurrency = limit.max(1);
        self
    }

    /// Free text appended to every task's initial message.
    pub fn with_extra_context(mut self, extra: impl Into<String>) -> Self {
        self.extra_context = Some(extra.into());
        self
    }

    /// Wire the production stack: admin API store, Anthropic client, memory
    /// tools, prompt library and the book registry.
    ///
    /// Fails before anything touches the store when a registered task has no
    /// specification file.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let registry = PhaseRegistry::book().context("invalid phase registry")?;
        let library = PromptLibrary::new(&config.prompts_dir);
        library
            .verify(&registry)
            .await
            .context("prompt library is incomplete")?;

        let store: Arc<dyn StateStore> = Arc::new(
            AdminApiClient::new(
                &config.admin_api_url,
                &config.admin_api_secret,
                config.store_timeout,
            )
            .context("failed to create admin API client")?,
        );
        let llm: Arc<dyn LlmClient> = Arc::new(
            AnthropicClient::new(config.claude_api_key.clone(), config.llm_timeout)
                .context("failed to create LLM client")?,
        );
        let tools = ToolRegistry::memory(store.clone(), LearningsStore::new(&config.learnings_dir))
            .context("failed to register memory tools")?;

        let runner = AgentRunner::new(
            llm,
            Arc::new(tools),
            config.max_tool_calls,
            config.max_output_tokens,
        );
        let executor = AgentExecutor::new(library, Arc::new(runner));

        Ok(Self::new(
            Arc::new(registry),
            store,
            Arc::new(executor),
            config.default_model.clone(),
        )
        .with_unit_concurrency(config.unit_concurrency)
        .with_extra_context(format!(
            "Quality threshold: {:.2}",
            config.quality_threshold
        )))
    }

    pub fn registry(&self) -> &PhaseRegistry {
        &self.registry
    }

    /// Read-only listing of the phase → task registry.
    pub fn phases(&self) -> Vec<PhaseInfo> {
        self.registry
            .phases()
            .map(|(phase, tasks)| PhaseInfo {
                phase,
                directory: phase_directory(phase).unwrap_or_default(),
                tasks: tasks.to_vec(),
            })
            .collect()
    }

    fn scheduler(&self) -> Arc<PhaseScheduler> {
        Arc::new(
            PhaseScheduler::new(self.registry.clone(), self.executor.clone(), self.store.clone())
                .with_unit_concurrency(self.unit_concurrency),
        )
    }

    fn base_context(&self, project_id: &str, model: Option<&str>) -> RunContext {
        RunContext {
            project_id: project_id.to_string(),
            unit_id: None,
            model: model.unwrap_or(&self.default_model).to_string(),
            extra_context: self.extra_context.clone(),
        }
    }

    async fn require_project(&self, project_id: &str) -> Result<Value, ControlError> {
        self.store
            .select_single(tables::PROJECTS, &Filters::new().eq("id", project_id))
            .await?
            .ok_or_else(|| ControlError::ProjectNotFound(project_id.to_string()))
    }

    /// Run phases `start..=end` to completion. Returns false when the project
    /// is already running, does not exist, or any phase fails.
    pub async fn run_pipeline(
        &self,
        project_id: &str,
        start_phase: u32,
        end_phase: u32,
        model: Option<&str>,
    ) -> bool {
        match self
            .run_pipeline_report(project_id, start_phase, end_phase, model)
            .await
        {
            Ok(report) => report.success,
            Err(e) => {
                tracing::error!("Pipeline not run for {}: {}", project_id, e);
                false
            }
        }
    }

    pub async fn run_pipeline_report(
        &self,
        project_id: &str,
        start_phase: u32,
        end_phase: u32,
        model: Option<&str>,
    ) -> Result<PipelineReport, ControlError> {
        self.require_project(project_id).await?;
        let guard = self
            .runs
            .claim(project_id)
            .ok_or_else(|| ControlError::AlreadyRunning(project_id.to_string()))?;

        Ok(self
            .drive_pipeline(project_id, start_phase, end_phase, model, guard.control())
            .await)
    }

    /// Run a single phase to completion.
    pub async fn run_phase(&self, project_id: &str, phase: u32, model: Option<&str>) -> bool {
        if let Err(e) = self.require_project(project_id).await {
            tracing::error!("Phase {} not run for {}: {}", phase, project_id, e);
            return false;
        }
        let Some(guard) = self.runs.claim(project_id) else {
            tracing::error!("Phase {} not run: project {} is already running", phase, project_id);
            return false;
        };

        self.drive_phase(project_id, phase, model, guard.control())
            .await
    }

    /// Run one task directly, outside the scheduler and the run registry.
    pub async fn run_single_task(
        &self,
        project_id: &str,
        task_name: &str,
        phase: u32,
        unit_id: Option<&str>,
        model: Option<&str>,
    ) -> TaskResult {
        let mut ctx = self.base_context(project_id, model);
        ctx.unit_id = unit_id.map(str::to_string);
        execute_isolated(&self.executor, task_name, phase, ctx).await
    }

    /// Start a pipeline run in the background.
    pub async fn start(
        self: &Arc<Self>,
        project_id: &str,
        start_phase: u32,
        end_phase: u32,
        model: Option<String>,
    ) -> Result<JoinHandle<PipelineReport>, ControlError> {
        self.require_project(project_id).await?;
        let guard = self
            .runs
            .claim(project_id)
            .ok_or_else(|| ControlError::AlreadyRunning(project_id.to_string()))?;

        update_status(self.store.as_ref(), project_id, status::RUNNING, Some(start_phase)).await;

        let this = self.clone();
        let project_id = project_id.to_string();
        Ok(tokio::spawn(async move {
            this.drive_pipeline(
                &project_id,
                start_phase,
                end_phase,
                model.as_deref(),
                guard.control(),
            )
            .await
        }))
    }

    /// Start a single phase in the background.
    pub async fn start_phase(
        self: &Arc<Self>,
        project_id: &str,
        phase: u32,
        model: Option<String>,
    ) -> Result<JoinHandle<bool>, ControlError> {
        self.require_project(project_id).await?;
        let guard = self
            .runs
            .claim(project_id)
            .ok_or_else(|| ControlError::AlreadyRunning(project_id.to_string()))?;

        let this = self.clone();
        let project_id = project_id.to_string();
        Ok(tokio::spawn(async move {
            this.drive_phase(&project_id, phase, model.as_deref(), guard.control())
                .await
        }))
    }

    async fn drive_pipeline(
        &self,
        project_id: &str,
        start_phase: u32,
        end_phase: u32,
        model: Option<&str>,
        control: &RunControl,
    ) -> PipelineReport {
        let observer = Arc::new(StatusObserver {
            store: self.store.clone(),
        });
        let pipeline = Pipeline::new(self.scheduler()).with_observer(observer);
        let base = self.base_context(project_id, model);
        let report = pipeline.run(start_phase, end_phase, &base, control).await;

        if control.is_stopped() {
            // `stop` already reset the status.
        } else if report.success {
            update_status(self.store.as_ref(), project_id, status::COMPLETED, Some(end_phase)).await;
        } else {
            update_status(self.store.as_ref(), project_id, status::ERROR, None).await;
        }
        report
    }

    async fn drive_phase(
        &self,
        project_id: &str,
        phase: u32,
        model: Option<&str>,
        control: &RunControl,
    ) -> bool {
        update_status(self.store.as_ref(), project_id, status::RUNNING, Some(phase)).await;
        let base = self.base_context(project_id, model);
        let outcome = self.scheduler().run_phase(phase, &base, control).await;

        if control.is_stopped() {
            // `stop` already reset the status.
        } else if outcome.success {
            update_status(self.store.as_ref(), project_id, status::DRAFT, Some(phase)).await;
        } else {
            update_status(self.store.as_ref(), project_id, status::ERROR, None).await;
        }
        outcome.success
    }

    /// Hold the active run at its next task boundary.
    pub async fn pause(&self, project_id: &str) -> Result<(), ControlError> {
        let control = self
            .runs
            .get(project_id)
            .ok_or_else(|| ControlError::NotRunning(project_id.to_string()))?;
        control.pause();
        update_status(self.store.as_ref(), project_id, status::PAUSED, None).await;
        tracing::info!("Paused pipeline for {}", project_id);
        Ok(())
    }

    pub async fn resume(&self, project_id: &str) -> Result<(), ControlError> {
        let control = self
            .runs
            .get(project_id)
            .ok_or_else(|| ControlError::NotRunning(project_id.to_string()))?;
        if !control.resume() {
            return Err(ControlError::NotPaused(project_id.to_string()));
        }
        update_status(self.store.as_ref(), project_id, status::RUNNING, None).await;
        tracing::info!("Resumed pipeline for {}", project_id);
        Ok(())
    }

    /// Stop the active run before its next task. The task in flight finishes.
    pub async fn stop(&self, project_id: &str) -> Result<(), ControlError> {
        let control = self
            .runs
            .get(project_id)
            .ok_or_else(|| ControlError::NotRunning(project_id.to_string()))?;
        control.stop();
        update_status(self.store.as_ref(), project_id, status::DRAFT, None).await;
        tracing::info!("Stopping pipeline for {}", project_id);
        Ok(())
    }

    pub async fn status(&self, project_id: &str) -> Result<ProjectStatus, ControlError> {
        let project = self.require_project(project_id).await?;
        let chapters = project_chapters(self.store.as_ref(), project_id).await?;
        let completed = chapters
            .iter()
            .filter(|c| c.get("status").and_then(Value::as_str) == Some(status::COMPLETED))
            .count();
        let control = self.runs.get(project_id);

        Ok(ProjectStatus {
            project_id: project_id.to_string(),
            status: project
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or(status::DRAFT)
                .to_string(),
            current_phase: project
                .get("current_phase")
                .and_then(Value::as_u64)
                .and_then(|p| u32::try_from(p).ok())
                .unwrap_or(0),
            total_chapters: chapters.len(),
            completed_chapters: completed,
            is_running: control.is_some(),
            is_paused: control.is_some_and(|c| c.is_paused()),
        })
    }
}
