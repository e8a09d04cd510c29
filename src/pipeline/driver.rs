//! Runs a contiguous range of phases.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;

use super::scheduler::{PhaseOutcome, PhaseScheduler};
use crate::agent::{RunContext, TaskResult};
use crate::control::RunControl;

/// Hooks around each phase of a pipeline run.
#[async_trait]
pub trait PhaseObserver: Send + Sync {
    async fn phase_started(&self, _project_id: &str, _phase: u32) {}

    async fn phase_finished(&self, _project_id: &str, _outcome: &PhaseOutcome) {}
}

/// Aggregate report of a pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub success: bool,
    pub phases_run: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<u32>,
    pub results: Vec<TaskResult>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PipelineReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn total_tokens(&self) -> u64 {
        self.results
            .iter()
            .map(|r| r.input_tokens + r.output_tokens)
            .sum()
    }
}

/// Phase-range driver. Stops at the first failed phase and never retries.
pub struct Pipeline {
    scheduler: Arc<PhaseScheduler>,
    observer: Option<Arc<dyn PhaseObserver>>,
}

impl Pipeline {
    pub fn new(scheduler: Arc<PhaseScheduler>) -> Self {
        Self {
            scheduler,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn PhaseObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub async fn run(
        &self,
        start_phase: u32,
        end_phase: u32,
        base: &RunContext,
        control: &RunControl,
    ) -> PipelineReport {
        let start = Instant::now();
        let mut report = PipelineReport {
            success: true,
            phases_run: Vec::new(),
            failed_phase: None,
            results: Vec::new(),
            duration_ms: 0,
            error: None,
        };

        let last = self.scheduler.registry().last_phase();
        if start_phase == 0 || start_phase > end_phase || end_phase > last {
            report.success = false;
            report.error = Some(format!(
                "invalid phase range {}..={} (registry has phases 1..={})",
                start_phase, end_phase, last
            ));
            tracing::error!("{}", report.error.as_deref().unwrap_or_default());
            return report;
        }

        tracing::info!(
            "Pipeline starting for project {}: phases {} to {}",
            base.project_id,
            start_phase,
            end_phase
        );

        for phase in start_phase..=end_phase {
            if control.checkpoint().await.is_err() {
                report.success = false;
                report.error = Some("run was stopped".to_string());
                tracing::warn!("Pipeline stopped before phase {}", phase);
                break;
            }

            if let Some(observer) = &self.observer {
                observer.phase_started(&base.project_id, phase).await;
            }

            let outcome = self.scheduler.run_phase(phase, base, control).await;
            if let Some(observer) = &self.observer {
                observer.phase_finished(&base.project_id, &outcome).await;
            }

            report.phases_run.push(phase);
            report.results.extend(outcome.results);
            if !outcome.success {
                report.success = false;
                report.failed_phase = Some(phase);
                report.error = outcome.error.map(|e| e.to_string());
                tracing::warn!("Phase {} failed - stopping pipeline", phase);
                break;
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            "Pipeline {} in {}ms: {} runs, {} succeeded, {} failed",
            if report.success { "completed" } else { "failed" },
            report.duration_ms,
            report.results.len(),
            report.succeeded(),
            report.failed()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::tasks::{PhaseRegistry, TaskConfig};
    use crate::test_support::RecordingExecutor;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn three_phases(executor: Arc<RecordingExecutor>) -> Pipeline {
        let registry = PhaseRegistry::new(BTreeMap::from([
            (1, vec![TaskConfig::project("prep", 1)]),
            (2, vec![TaskConfig::project("analyze", 2), TaskConfig::project("detect", 2)]),
            (3, vec![TaskConfig::project("transform", 3)]),
        ]))
        .unwrap();
        let scheduler = PhaseScheduler::new(
            Arc::new(registry),
            executor,
            Arc::new(InMemoryStore::new()),
        );
        Pipeline::new(Arc::new(scheduler))
    }

    fn base() -> RunContext {
        RunContext::new("p1", "m")
    }

    #[tokio::test]
    async fn test_runs_range_in_order() {
        let executor = Arc::new(RecordingExecutor::new());
        let report = three_phases(executor.clone())
            .run(1, 3, &base(), &RunControl::new())
            .await;

        assert!(report.success);
        assert_eq!(report.phases_run, vec![1, 2, 3]);
        assert_eq!(executor.task_order(), vec!["prep", "analyze", "detect", "transform"]);
        assert_eq!(report.succeeded(), 4);
    }

    #[tokio::test]
    async fn test_failed_phase_stops_pipeline() {
        let executor = Arc::new(RecordingExecutor::new().failing(&["analyze"]));
        let report = three_phases(executor.clone())
            .run(2, 3, &base(), &RunControl::new())
            .await;

        assert!(!report.success);
        assert_eq!(report.failed_phase, Some(2));
        assert_eq!(report.phases_run, vec![2]);
        // Phase 2 still finishes its remaining tasks; phase 3 is never attempted.
        assert_eq!(executor.task_order(), vec!["analyze", "detect"]);
        assert_eq!(report.failed(), 1);
    }

    #[tokio::test]
    async fn test_single_failing_phase_range() {
        let executor = Arc::new(RecordingExecutor::new().failing(&["analyze"]));
        let report = three_phases(executor.clone())
            .run(2, 2, &base(), &RunControl::new())
            .await;
        assert!(!report.success);
        assert_eq!(executor.count("transform"), 0);
    }

    #[tokio::test]
    async fn test_invalid_range_is_rejected() {
        let executor = Arc::new(RecordingExecutor::new());
        let pipeline = three_phases(executor.clone());
        for (start, end) in [(0, 1), (3, 2), (1, 4)] {
            let report = pipeline.run(start, end, &base(), &RunControl::new()).await;
            assert!(!report.success);
            assert!(report.error.unwrap().contains("invalid phase range"));
        }
        assert!(executor.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_stopped_before_start_runs_nothing() {
        let executor = Arc::new(RecordingExecutor::new());
        let control = RunControl::new();
        control.stop();
        let report = three_phases(executor.clone()).run(1, 3, &base(), &control).await;
        assert!(!report.success);
        assert!(report.phases_run.is_empty());
        assert!(executor.invocations().is_empty());
    }

    #[derive(Default)]
    struct Events(Mutex<Vec<String>>);

    #[async_trait]
    impl PhaseObserver for Events {
        async fn phase_started(&self, project_id: &str, phase: u32) {
            self.0.lock().unwrap().push(format!("start {} {}", project_id, phase));
        }

        async fn phase_finished(&self, _project_id: &str, outcome: &PhaseOutcome) {
            self.0
                .lock()
                .unwrap()
                .push(format!("end {} {}", outcome.phase, outcome.success));
        }
    }

    #[tokio::test]
    async fn test_observer_sees_each_phase() {
        let events = Arc::new(Events::default());
        let pipeline = three_phases(Arc::new(RecordingExecutor::new())).with_observer(events.clone());
        pipeline.run(1, 2, &base(), &RunControl::new()).await;

        assert_eq!(
            *events.0.lock().unwrap(),
            vec!["start p1 1", "end 1 true", "start p1 2", "end 2 true"]
        );
    }
}
