//! Tracks workflow progress with incremental milestone/step updates,
//! publishing `workflow_progress` events and invoking per-workflow callbacks.

pub mod tracker;
pub mod types;

pub use tracker::{CallbackId, ProgressSink, ProgressUpdate, WorkflowCallback, WorkflowProgressTracker};
pub use types::{WorkflowMilestone, WorkflowProgress, WorkflowStage, WorkflowStatus};
