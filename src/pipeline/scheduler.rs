//! Runs the tasks of one phase in dependency order.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde_json::Value;
use thiserror::Error;

use super::executor::{execute_isolated, TaskExecutor};
use crate::agent::{RunContext, TaskResult};
use crate::control::RunControl;
use crate::store::{project_chapters, StateStore, StoreError};
use crate::tasks::{PhaseRegistry, TaskConfig};

#[derive(Debug, Clone, Error)]
pub enum SchedulerError {
    #[error("unknown phase {0}")]
    UnknownPhase(u32),

    #[error("dependency cycle in phase {phase} among: {}", .remaining.join(", "))]
    DependencyCycle { phase: u32, remaining: Vec<String> },

    #[error("failed to list chapters: {0}")]
    UnitListing(StoreError),

    #[error("run was stopped")]
    Stopped,
}

/// Result of one phase run.
#[derive(Debug, Clone)]
pub struct PhaseOutcome {
    pub phase: u32,
    /// True only when every run of every task succeeded.
    pub success: bool,
    pub results: Vec<TaskResult>,
    pub error: Option<SchedulerError>,
}

impl PhaseOutcome {
    fn new(phase: u32) -> Self {
        Self {
            phase,
            success: true,
            results: Vec::new(),
            error: None,
        }
    }

    fn abort(mut self, error: SchedulerError) -> Self {
        tracing::error!("Phase {} aborted: {}", self.phase, error);
        self.success = false;
        self.error = Some(error);
        self
    }

    fn record(&mut self, result: TaskResult) {
        if !result.success {
            self.success = false;
        }
        self.results.push(result);
    }
}

/// Readiness-layer scheduler over a [`PhaseRegistry`].
///
/// A task becomes ready once every dependency has *finished*, whether or not
/// it succeeded, so later gating tasks still run and report on partial
/// failures. Mutually ready tasks run in declaration order.
pub struct PhaseScheduler {
    registry: Arc<PhaseRegistry>,
    executor: Arc<dyn TaskExecutor>,
    store: Arc<dyn StateStore>,
    unit_concurrency: usize,
}

impl PhaseScheduler {
    pub fn new(
        registry: Arc<PhaseRegistry>,
        executor: Arc<dyn TaskExecutor>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            registry,
            executor,
            store,
            unit_concurrency: 1,
        }
    }

    /// Allow up to `limit` sub-unit runs of one task at a time.
    pub fn with_unit_concurrency(mut self, limit: usize) -> Self {
        self.unit_concurrency = limit.max(1);
        self
    }

    pub fn registry(&self) -> &PhaseRegistry {
        &self.registry
    }

    pub async fn run_phase(&self, phase: u32, base: &RunContext, control: &RunControl) -> PhaseOutcome {
        let outcome = PhaseOutcome::new(phase);
        let Some(tasks) = self.registry.phase(phase) else {
            return outcome.abort(SchedulerError::UnknownPhase(phase));
        };

        // Sub-units are listed once, when the phase starts.
        let units = if tasks.iter().any(|t| t.is_unit_level) {
            match self.unit_ids(&base.project_id).await {
                Ok(units) => units,
                Err(e) => return outcome.abort(SchedulerError::UnitListing(e)),
            }
        } else {
            Vec::new()
        };

        tracing::info!(
            "Phase {} starting: {} tasks, {} chapters",
            phase,
            tasks.len(),
            units.len()
        );

        let mut outcome = outcome;
        let mut finished: HashSet<&str> = HashSet::new();
        let mut remaining: Vec<&TaskConfig> = tasks.iter().collect();

        while !remaining.is_empty() {
            let (ready, blocked): (Vec<&TaskConfig>, Vec<&TaskConfig>) = remaining
                .into_iter()
                .partition(|t| t.depends_on.iter().all(|d| finished.contains(d.as_str())));

            if ready.is_empty() {
                let remaining = blocked.iter().map(|t| t.name.clone()).collect();
                return outcome.abort(SchedulerError::DependencyCycle { phase, remaining });
            }

            for task in ready {
                let stopped = self.run_task(task, &units, base, control, &mut outcome).await;
                if stopped {
                    return outcome.abort(SchedulerError::Stopped);
                }
                finished.insert(task.name.as_str());
            }
            remaining = blocked;
        }

        let failed = outcome.results.iter().filter(|r| !r.success).count();
        tracing::info!(
            "Phase {} finished: {} runs, {} failed",
            phase,
            outcome.results.len(),
            failed
        );
        outcome
    }

    /// Run one task at its granularity. Returns true when the run was stopped
    /// at a checkpoint; results gathered before that are still recorded.
    async fn run_task(
        &self,
        task: &TaskConfig,
        units: &[String],
        base: &RunContext,
        control: &RunControl,
        outcome: &mut PhaseOutcome,
    ) -> bool {
        if !task.is_unit_level {
            if control.checkpoint().await.is_err() {
                return true;
            }
            let ctx = RunContext {
                unit_id: None,
                ..base.clone()
            };
            outcome.record(execute_isolated(&self.executor, &task.name, task.phase, ctx).await);
            return false;
        }

        if units.is_empty() {
            tracing::warn!("{} is chapter-level but the project has no chapters", task.name);
            return false;
        }

        // `buffered` keeps sub-unit order in the results; all runs are joined
        // before accounting.
        let runs: Vec<Option<TaskResult>> = stream::iter(units.iter().cloned())
            .map(|unit| async move {
                control.checkpoint().await.ok()?;
                let ctx = base.clone().with_unit(unit);
                Some(execute_isolated(&self.executor, &task.name, task.phase, ctx).await)
            })
            .buffered(self.unit_concurrency)
            .collect()
            .await;

        let mut stopped = false;
        for run in runs {
            match run {
                Some(result) => outcome.record(result),
                None => stopped = true,
            }
        }
        stopped
    }

    async fn unit_ids(&self, project_id: &str) -> Result<Vec<String>, StoreError> {
        let chapters = project_chapters(self.store.as_ref(), project_id).await?;
        Ok(chapters
            .iter()
            .filter_map(|c| c.get("id").and_then(Value::as_str).map(str::to_string))
            .collect())
    }
}
