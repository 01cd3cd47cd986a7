use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    Initializing,
    Planning,
    Executing,
    Validating,
    Finalizing,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMilestone {
    pub milestone_id: String,
    pub name: String,
    pub description: String,
    pub stage: WorkflowStage,
    pub weight: f64,
    pub completed: bool,
    pub completed_at: Option<i64>,
    pub duration: Option<i64>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl WorkflowMilestone {
    pub fn new(name: impl Into<String>, description: impl Into<String>, stage: WorkflowStage, weight: f64) -> Self {
        Self {
            milestone_id: Uuid::new_v4().as_simple().to_string(),
            name: name.into(),
            description: description.into(),
            stage,
            weight,
            completed: false,
            completed_at: None,
            duration: None,
            metadata: HashMap::new(),
        }
    }

    pub fn complete(&mut self, now_us: i64, metadata: Option<HashMap<String, Value>>) {
        self.completed = true;
        self.completed_at = Some(now_us);
        if let Some(metadata) = metadata {
            self.metadata.extend(metadata);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowProgress {
    pub workflow_id: String,
    pub workflow_type: String,
    pub user_id: Option<String>,
    pub start_time_us: i64,
    pub last_update_us: i64,
    pub current_stage: WorkflowStage,
    pub status: WorkflowStatus,
    pub progress_percentage: f64,
    pub milestones: Vec<WorkflowMilestone>,
    pub current_step: Option<String>,
    pub total_steps: Option<u32>,
    pub completed_steps: u32,
    pub estimated_completion_us: Option<i64>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub error_message: Option<String>,
}

impl WorkflowProgress {
    pub fn new(workflow_id: String, workflow_type: String, user_id: Option<String>, now_us: i64) -> Self {
        Self {
            workflow_id,
            workflow_type,
            user_id,
            start_time_us: now_us,
            last_update_us: now_us,
            current_stage: WorkflowStage::Initializing,
            status: WorkflowStatus::Running,
            progress_percentage: 0.0,
            milestones: Vec::new(),
            current_step: None,
            total_steps: None,
            completed_steps: 0,
            estimated_completion_us: None,
            metadata: HashMap::new(),
            error_message: None,
        }
    }

    /// `max(milestone_progress, step_progress)`, clamped to `[0, 100]`.
    pub fn recompute_progress(&mut self) {
        let milestone_progress = if self.milestones.is_empty() {
            0.0
        } else {
            let total_weight: f64 = self.milestones.iter().map(|m| m.weight).sum();
            if total_weight > 0.0 {
                let completed_weight: f64 =
                    self.milestones.iter().filter(|m| m.completed).map(|m| m.weight).sum();
                (completed_weight / total_weight) * 100.0
            } else {
                0.0
            }
        };

        let step_progress = match self.total_steps {
            Some(total) if total > 0 => (self.completed_steps as f64 / total as f64) * 100.0,
            _ => 0.0,
        };

        self.progress_percentage = milestone_progress.max(step_progress).clamp(0.0, 100.0);
    }

    pub fn completed_milestone_count(&self) -> usize {
        self.milestones.iter().filter(|m| m.completed).count()
    }

    pub fn pending_milestone_count(&self) -> usize {
        self.milestones.iter().filter(|m| !m.completed).count()
    }

    /// `max(0, estimated_completion - now)` if set, else a linear
    /// extrapolation from elapsed time and current progress.
    pub fn estimated_remaining_us(&self, now_us: i64) -> Option<i64> {
        if let Some(estimated_completion) = self.estimated_completion_us {
            return Some((estimated_completion - now_us).max(0));
        }
        if self.progress_percentage > 0.0 {
            let elapsed = now_us - self.start_time_us;
            let total_estimated = (elapsed as f64) / (self.progress_percentage / 100.0);
            return Some((total_estimated as i64 - elapsed).max(0));
        }
        None
    }
}
