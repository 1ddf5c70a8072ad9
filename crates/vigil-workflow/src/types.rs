//! Workflow domain types and progress reporting.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Unique identifier for a workflow within one tracker.
pub type WorkflowId = u64;

/// Identifier for a step, unique within its workflow.
pub type StepId = u64;

/// Lifecycle status of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
        }
    }

    /// Whether the workflow can no longer change.
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }

    /// Position in the forward-only lifecycle.
    pub(crate) fn rank(self) -> u8 {
        match self {
            WorkflowStatus::Pending => 0,
            WorkflowStatus::Running => 1,
            WorkflowStatus::Completed | WorkflowStatus::Failed => 2,
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        }
    }

    /// Position in the forward-only lifecycle.
    pub(crate) fn rank(self) -> u8 {
        match self {
            StepStatus::Pending => 0,
            StepStatus::Running => 1,
            StepStatus::Completed | StepStatus::Failed => 2,
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowStep {
    pub id: StepId,
    pub name: String,
    pub status: StepStatus,
    /// When the status last changed.
    pub updated_at: Instant,
}

/// Bookkeeping state of one workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowState {
    pub id: WorkflowId,
    pub name: String,
    pub status: WorkflowStatus,
    /// Set when the workflow leaves `Pending`.
    pub started_at: Option<Instant>,
    /// Set when the workflow reaches a terminal status.
    pub ended_at: Option<Instant>,
    /// Steps in registration order.
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowState {
    pub(crate) fn new(id: WorkflowId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            status: WorkflowStatus::Pending,
            started_at: None,
            ended_at: None,
            steps: Vec::new(),
        }
    }

    /// Completion percentage, 0-100, rounded to the nearest integer.
    ///
    /// Only completed steps count; failed steps do not. A workflow
    /// with no steps reports zero.
    pub fn progress(&self) -> u8 {
        if self.steps.is_empty() {
            return 0;
        }
        let completed = self
            .steps
            .iter()
            .filter(|step| step.status == StepStatus::Completed)
            .count();
        ((completed as f64 / self.steps.len() as f64) * 100.0).round() as u8
    }

    /// Human-readable run time.
    ///
    /// Running workflows report elapsed time so far; workflows that
    /// never started report `"N/A"`.
    pub fn duration(&self) -> String {
        match self.started_at {
            None => "N/A".to_string(),
            Some(started) => {
                let end = self.ended_at.unwrap_or_else(Instant::now);
                format_duration(end.duration_since(started))
            }
        }
    }
}

/// Format a duration the way the UI shows workflow run times:
/// milliseconds under a second, fractional seconds under a minute,
/// fractional minutes beyond that.
pub fn format_duration(duration: Duration) -> String {
    let ms = duration.as_millis() as u64;
    if ms < 1_000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1_000.0)
    } else {
        format!("{:.1}m", ms as f64 / 60_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_duration_milliseconds() {
        assert_eq!(format_duration(Duration::from_millis(0)), "0ms");
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_millis(999)), "999ms");
    }

    #[test]
    fn format_duration_seconds() {
        assert_eq!(format_duration(Duration::from_millis(1_000)), "1.0s");
        assert_eq!(format_duration(Duration::from_millis(1_500)), "1.5s");
        assert_eq!(format_duration(Duration::from_millis(5_000)), "5.0s");
        assert_eq!(format_duration(Duration::from_millis(59_900)), "59.9s");
    }

    #[test]
    fn format_duration_minutes() {
        assert_eq!(format_duration(Duration::from_millis(60_000)), "1.0m");
        assert_eq!(format_duration(Duration::from_millis(90_000)), "1.5m");
        assert_eq!(format_duration(Duration::from_millis(120_000)), "2.0m");
        assert_eq!(format_duration(Duration::from_secs(600)), "10.0m");
    }

    fn state_with_steps(statuses: &[StepStatus]) -> WorkflowState {
        let mut state = WorkflowState::new(1, "sync");
        for (i, &status) in statuses.iter().enumerate() {
            state.steps.push(WorkflowStep {
                id: i as StepId + 1,
                name: format!("step-{}", i + 1),
                status,
                updated_at: Instant::now(),
            });
        }
        state
    }

    #[test]
    fn progress_rounds_to_nearest_integer() {
        let state = state_with_steps(&[
            StepStatus::Completed,
            StepStatus::Completed,
            StepStatus::Running,
            StepStatus::Pending,
        ]);
        assert_eq!(state.progress(), 50);

        let state = state_with_steps(&[
            StepStatus::Completed,
            StepStatus::Pending,
            StepStatus::Pending,
        ]);
        // 1/3 → 33.33 → 33
        assert_eq!(state.progress(), 33);

        let state = state_with_steps(&[
            StepStatus::Completed,
            StepStatus::Completed,
            StepStatus::Pending,
        ]);
        // 2/3 → 66.67 → 67
        assert_eq!(state.progress(), 67);
    }

    #[test]
    fn progress_empty_workflow_is_zero() {
        let state = state_with_steps(&[]);
        assert_eq!(state.progress(), 0);
    }

    #[test]
    fn progress_ignores_failed_steps() {
        let state = state_with_steps(&[StepStatus::Completed, StepStatus::Failed]);
        assert_eq!(state.progress(), 50);
    }

    #[test]
    fn progress_all_completed_is_hundred() {
        let state = state_with_steps(&[StepStatus::Completed, StepStatus::Completed]);
        assert_eq!(state.progress(), 100);
    }

    #[test]
    fn duration_na_before_start() {
        let state = WorkflowState::new(1, "sync");
        assert_eq!(state.duration(), "N/A");
    }

    #[test]
    fn duration_uses_ended_at_when_finished() {
        let mut state = WorkflowState::new(1, "sync");
        let started = Instant::now();
        state.started_at = Some(started);
        state.ended_at = Some(started + Duration::from_millis(750));
        assert_eq!(state.duration(), "750ms");
    }

    #[test]
    fn duration_of_running_workflow_in_seconds_range() {
        let mut state = WorkflowState::new(1, "sync");
        state.started_at = Some(Instant::now() - Duration::from_secs(5));

        let duration = state.duration();
        assert!(duration.ends_with('s'), "unexpected format: {duration}");
        assert!(!duration.ends_with("ms"), "unexpected format: {duration}");
        assert!(duration.starts_with("5."), "unexpected format: {duration}");
    }

    #[test]
    fn status_ranks_are_forward_only() {
        assert!(WorkflowStatus::Running.rank() > WorkflowStatus::Pending.rank());
        assert!(WorkflowStatus::Completed.rank() > WorkflowStatus::Running.rank());
        // Terminal states share a rank, so neither can replace the other.
        assert_eq!(
            WorkflowStatus::Completed.rank(),
            WorkflowStatus::Failed.rank()
        );
        assert_eq!(StepStatus::Completed.rank(), StepStatus::Failed.rank());
    }
}
