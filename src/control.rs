//! Run control: one active run per project, with cooperative pause and stop.
//!
//! Pause and stop are only observed at checkpoints, i.e. before a task or a
//! sub-unit run starts. A task already inside its conversation loop is never
//! interrupted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("pipeline is already running for project {0}")]
    AlreadyRunning(String),

    #[error("pipeline is not running for project {0}")]
    NotRunning(String),

    #[error("pipeline is not paused for project {0}")]
    NotPaused(String),

    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("run was stopped")]
    Stopped,
}

/// Pause/stop flags of one run.
#[derive(Debug)]
pub struct RunControl {
    stop: CancellationToken,
    paused: watch::Sender<bool>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            stop: CancellationToken::new(),
            paused,
        }
    }

    /// Returns `false` when the run was already paused.
    pub fn pause(&self) -> bool {
        self.paused.send_if_modified(|paused| !std::mem::replace(paused, true))
    }

    /// Returns `false` when the run was not paused.
    pub fn resume(&self) -> bool {
        self.paused.send_if_modified(|paused| std::mem::replace(paused, false))
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Wait while paused. Fails once the run has been stopped, including
    /// while waiting.
    pub async fn checkpoint(&self) -> Result<(), ControlError> {
        let mut paused = self.paused.subscribe();
        loop {
            if self.stop.is_cancelled() {
                return Err(ControlError::Stopped);
            }
            if !*paused.borrow_and_update() {
                return Ok(());
            }

            tracing::debug!("Run paused, waiting at checkpoint");
            tokio::select! {
                _ = self.stop.cancelled() => return Err(ControlError::Stopped),
                changed = paused.changed() => {
                    // The sender lives as long as `self`.
                    if changed.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

type RunMap = HashMap<String, Arc<RunControl>>;
type Runs = Arc<Mutex<RunMap>>;

/// Critical sections never await or panic, so a poisoned lock is still sound.
fn lock(runs: &Mutex<RunMap>) -> MutexGuard<'_, RunMap> {
    runs.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Active runs keyed by project id.
#[derive(Debug, Default)]
pub struct RunRegistry {
    runs: Runs,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, project_id: &str) -> Option<Arc<RunControl>> {
        let mut runs = lock(&self.runs);
        if runs.contains_key(project_id) {
            return None;
        }
        let control = Arc::new(RunControl::new());
        runs.insert(project_id.to_string(), control.clone());
        Some(control)
    }

    /// Register a run for `project_id` unless one is active. The slot is
    /// freed when the guard drops, including during a panic unwind.
    pub fn claim(&self, project_id: &str) -> Option<RunGuard> {
        self.insert(project_id).map(|control| RunGuard {
            runs: self.runs.clone(),
            project_id: project_id.to_string(),
            control,
        })
    }

    /// Register without a guard; pair with [`RunRegistry::release`].
    pub fn try_acquire(&self, project_id: &str) -> bool {
        self.insert(project_id).is_some()
    }

    pub fn release(&self, project_id: &str) -> bool {
        lock(&self.runs).remove(project_id).is_some()
    }

    pub fn get(&self, project_id: &str) -> Option<Arc<RunControl>> {
        lock(&self.runs).get(project_id).cloned()
    }

    pub fn is_running(&self, project_id: &str) -> bool {
        lock(&self.runs).contains_key(project_id)
    }

    pub fn active(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.runs).keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Ownership of one project's run slot.
#[derive(Debug)]
pub struct RunGuard {
    runs: Runs,
    project_id: String,
    control: Arc<RunControl>,
}

impl RunGuard {
    pub fn control(&self) -> &RunControl {
        &self.control
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut runs = lock(&self.runs);
        // Only free the slot if it still holds this run.
        if runs
            .get(&self.project_id)
            .is_some_and(|c| Arc::ptr_eq(c, &self.control))
        {
            runs.remove(&self.project_id);
        }
    }
}
