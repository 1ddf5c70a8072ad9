//! vigil-workflow — bookkeeping for multi-step client workflows.
//!
//! Hosts register a workflow, append its steps, and report status
//! transitions as the real work proceeds elsewhere. The tracker answers
//! progress and duration queries and keeps a bounded history of
//! finished workflows. It deliberately does not execute anything.

pub mod tracker;
pub mod types;

pub use tracker::{WorkflowError, WorkflowResult, WorkflowTracker};
pub use types::{
    format_duration, StepId, StepStatus, WorkflowId, WorkflowState, WorkflowStatus, WorkflowStep,
};
