//! Workflow tracker: registration, status transitions, and queries.
//!
//! The tracker is pure bookkeeping. It never executes steps or drives
//! retries; the host performs the work and reports transitions here.
//! Statuses only ever move forward, and finished workflows land in a
//! bounded history ring so long-running hosts cannot leak memory.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::types::{
    StepId, StepStatus, WorkflowId, WorkflowState, WorkflowStatus, WorkflowStep,
};

/// How many finished workflows the history ring keeps.
const COMPLETED_CAPACITY: usize = 32;

/// Result type alias for tracker operations.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Errors from workflow bookkeeping. These indicate host bugs, not
/// operating conditions, so callers usually log and move on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("unknown workflow: {0}")]
    UnknownWorkflow(WorkflowId),

    #[error("unknown step {step} in workflow {workflow}")]
    UnknownStep { workflow: WorkflowId, step: StepId },

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

struct TrackerInner {
    /// Workflows that have not finished, by id.
    active: HashMap<WorkflowId, WorkflowState>,
    /// Finished workflows, oldest first.
    completed: VecDeque<WorkflowState>,
    next_id: WorkflowId,
}

/// Tracks multi-step workflows for progress reporting.
pub struct WorkflowTracker {
    inner: RwLock<TrackerInner>,
    capacity: usize,
}

impl WorkflowTracker {
    pub fn new() -> Self {
        Self::with_capacity(COMPLETED_CAPACITY)
    }

    /// Tracker keeping at most `capacity` finished workflows.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(TrackerInner {
                active: HashMap::new(),
                completed: VecDeque::new(),
                next_id: 1,
            }),
            capacity,
        }
    }

    /// Register a new workflow in `Pending`.
    pub async fn begin(&self, name: &str) -> WorkflowId {
        let mut inner = self.inner.write().await;
        let id = inner.next_id;
        inner.next_id += 1;
        inner.active.insert(id, WorkflowState::new(id, name));
        debug!(workflow = id, name, "workflow registered");
        id
    }

    /// Move a workflow to `Running` and stamp its start time.
    pub async fn start(&self, id: WorkflowId) -> WorkflowResult<()> {
        let mut inner = self.inner.write().await;
        let state = inner
            .active
            .get_mut(&id)
            .ok_or(WorkflowError::UnknownWorkflow(id))?;
        transition_workflow(state, WorkflowStatus::Running)?;
        state.started_at = Some(Instant::now());
        info!(workflow = id, name = %state.name, "workflow started");
        Ok(())
    }

    /// Append a step in `Pending`. Step ids are sequential within the
    /// workflow, starting at 1.
    pub async fn push_step(&self, id: WorkflowId, name: &str) -> WorkflowResult<StepId> {
        let mut inner = self.inner.write().await;
        let state = inner
            .active
            .get_mut(&id)
            .ok_or(WorkflowError::UnknownWorkflow(id))?;
        let step_id = state.steps.len() as StepId + 1;
        state.steps.push(WorkflowStep {
            id: step_id,
            name: name.to_string(),
            status: StepStatus::Pending,
            updated_at: Instant::now(),
        });
        Ok(step_id)
    }

    /// Move a step to `Running`.
    pub async fn start_step(&self, id: WorkflowId, step: StepId) -> WorkflowResult<()> {
        self.transition_step(id, step, StepStatus::Running).await
    }

    /// Move a step to `Completed`.
    pub async fn complete_step(&self, id: WorkflowId, step: StepId) -> WorkflowResult<()> {
        self.transition_step(id, step, StepStatus::Completed).await
    }

    /// Move a step to `Failed`.
    pub async fn fail_step(&self, id: WorkflowId, step: StepId) -> WorkflowResult<()> {
        self.transition_step(id, step, StepStatus::Failed).await
    }

    /// Finish a workflow successfully and move it to the history ring.
    pub async fn complete(&self, id: WorkflowId) -> WorkflowResult<()> {
        self.finish(id, WorkflowStatus::Completed).await
    }

    /// Finish a workflow as failed and move it to the history ring.
    pub async fn fail(&self, id: WorkflowId) -> WorkflowResult<()> {
        self.finish(id, WorkflowStatus::Failed).await
    }

    /// Unfinished workflows, ordered by id.
    pub async fn active_workflows(&self) -> Vec<WorkflowState> {
        let inner = self.inner.read().await;
        let mut active: Vec<WorkflowState> = inner.active.values().cloned().collect();
        active.sort_by_key(|w| w.id);
        active
    }

    /// Finished workflows still in the history ring, oldest first.
    pub async fn completed_workflows(&self) -> Vec<WorkflowState> {
        let inner = self.inner.read().await;
        inner.completed.iter().cloned().collect()
    }

    /// Look a workflow up wherever it lives.
    pub async fn get(&self, id: WorkflowId) -> Option<WorkflowState> {
        let inner = self.inner.read().await;
        inner
            .active
            .get(&id)
            .or_else(|| inner.completed.iter().find(|w| w.id == id))
            .cloned()
    }

    async fn transition_step(
        &self,
        id: WorkflowId,
        step: StepId,
        to: StepStatus,
    ) -> WorkflowResult<()> {
        let mut inner = self.inner.write().await;
        let state = inner
            .active
            .get_mut(&id)
            .ok_or(WorkflowError::UnknownWorkflow(id))?;
        let step = state
            .steps
            .iter_mut()
            .find(|s| s.id == step)
            .ok_or(WorkflowError::UnknownStep { workflow: id, step })?;

        if to.rank() <= step.status.rank() {
            return Err(WorkflowError::InvalidTransition {
                from: step.status.to_string(),
                to: to.to_string(),
            });
        }
        if to == StepStatus::Failed {
            warn!(workflow = id, step = step.id, name = %step.name, "step failed");
        }
        step.status = to;
        step.updated_at = Instant::now();
        Ok(())
    }

    async fn finish(&self, id: WorkflowId, to: WorkflowStatus) -> WorkflowResult<()> {
        let mut inner = self.inner.write().await;
        let state = inner
            .active
            .get_mut(&id)
            .ok_or(WorkflowError::UnknownWorkflow(id))?;
        transition_workflow(state, to)?;
        state.ended_at = Some(Instant::now());

        if let Some(state) = inner.active.remove(&id) {
            info!(
                workflow = id,
                name = %state.name,
                status = %state.status,
                progress = state.progress(),
                duration = %state.duration(),
                "workflow finished"
            );
            inner.completed.push_back(state);
        }
        while inner.completed.len() > self.capacity {
            if let Some(pruned) = inner.completed.pop_front() {
                debug!(workflow = pruned.id, "pruned workflow from history");
            }
        }
        Ok(())
    }
}

impl Default for WorkflowTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn transition_workflow(state: &mut WorkflowState, to: WorkflowStatus) -> WorkflowResult<()> {
    if to.rank() <= state.status.rank() {
        return Err(WorkflowError::InvalidTransition {
            from: state.status.to_string(),
            to: to.to_string(),
        });
    }
    state.status = to;
    Ok(())
}
