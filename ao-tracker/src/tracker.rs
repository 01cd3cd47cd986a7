use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use ao_events::{event_types, Event, EventPublisher};

use crate::types::{WorkflowMilestone, WorkflowProgress, WorkflowStage, WorkflowStatus};

pub type WorkflowCallback = Arc<dyn Fn(WorkflowProgress) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

/// Narrow capability for driving workflow progress, independent of the
/// tracker's bookkeeping internals. The workflow-aware coordinator depends
/// on this instead of the concrete tracker.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn start_workflow(
        &self,
        workflow_type: String,
        user_id: Option<String>,
        workflow_id: Option<String>,
        total_steps: Option<u32>,
        estimated_duration_s: Option<u64>,
        milestones: Vec<(String, String, WorkflowStage, f64)>,
    ) -> String;

    async fn update_workflow_progress(&self, workflow_id: &str, update: ProgressUpdate) -> bool;

    async fn complete_workflow(&self, workflow_id: &str, success: bool, final_metadata: Option<HashMap<String, Value>>) -> bool;
}

#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    pub stage: Option<WorkflowStage>,
    pub status: Option<WorkflowStatus>,
    pub current_step: Option<String>,
    pub completed_steps: Option<u32>,
    pub total_steps: Option<u32>,
    pub estimated_completion_us: Option<i64>,
    pub metadata: Option<HashMap<String, Value>>,
}

fn now_us() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_micros() as i64
}

/// Manages workflow progress tracking with incremental updates, mirroring
/// the source system's `WorkflowProgressTracker`: a single owner per
/// `WorkflowProgress`, updated behind a short-lived lock with no await held.
pub struct WorkflowProgressTracker {
    active_workflows: DashMap<String, Mutex<WorkflowProgress>>,
    callbacks: DashMap<String, Vec<(CallbackId, WorkflowCallback)>>,
    next_callback_id: AtomicU64,
    event_publisher: Option<Arc<dyn EventPublisher>>,
    channel_prefix: String,
    auto_publish_updates: bool,
    cleanup_interval_s: u64,
    workflow_timeout_s: u64,
    running: Arc<AtomicBool>,
    cleanup_handle: AsyncMutex<Option<JoinHandle<()>>>,
}

impl WorkflowProgressTracker {
    pub fn new(
        event_publisher: Option<Arc<dyn EventPublisher>>,
        channel_prefix: impl Into<String>,
        auto_publish_updates: bool,
        cleanup_interval_s: u64,
        workflow_timeout_s: u64,
    ) -> Self {
        Self {
            active_workflows: DashMap::new(),
            callbacks: DashMap::new(),
            next_callback_id: AtomicU64::new(1),
            event_publisher,
            channel_prefix: channel_prefix.into(),
            auto_publish_updates,
            cleanup_interval_s,
            workflow_timeout_s,
            running: Arc::new(AtomicBool::new(false)),
            cleanup_handle: AsyncMutex::new(None),
        }
    }

    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = self.clone();
        let handle = tokio::spawn(async move { this.cleanup_loop().await });
        *self.cleanup_handle.lock().await = Some(handle);
        info!("workflow progress tracker started");
    }

    pub async fn stop(self: &Arc<Self>) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.cleanup_handle.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
        let ids: Vec<String> = self.active_workflows.iter().map(|e| e.key().clone()).collect();
        for workflow_id in ids {
            self.complete_workflow(&workflow_id, false, None).await;
        }
        info!("workflow progress tracker stopped");
    }

    pub async fn start_workflow_full(
        &self,
        workflow_type: String,
        user_id: Option<String>,
        workflow_id: Option<String>,
        total_steps: Option<u32>,
        estimated_duration_s: Option<u64>,
        milestones: Vec<(String, String, WorkflowStage, f64)>,
    ) -> String {
        let workflow_id = workflow_id.unwrap_or_else(|| Uuid::new_v4().as_simple().to_string());
        let now = now_us();
        let mut workflow = WorkflowProgress::new(workflow_id.clone(), workflow_type, user_id, now);
        workflow.total_steps = total_steps;
        if let Some(duration_s) = estimated_duration_s {
            workflow.estimated_completion_us = Some(now + (duration_s as i64) * 1_000_000);
        }
        for (name, description, stage, weight) in milestones {
            workflow.milestones.push(WorkflowMilestone::new(name, description, stage, weight));
        }
        workflow.recompute_progress();

        self.active_workflows.insert(workflow_id.clone(), Mutex::new(workflow.clone()));
        self.callbacks.insert(workflow_id.clone(), Vec::new());

        if self.auto_publish_updates {
            self.publish_progress_event(&workflow).await;
        }
        info!("started tracking workflow: {} ({})", workflow_id, workflow.workflow_type);
        workflow_id
    }

    pub async fn update_workflow_progress_full(&self, workflow_id: &str, update: ProgressUpdate) -> bool {
        let Some(entry) = self.active_workflows.get(workflow_id) else {
            warn!("workflow not found: {}", workflow_id);
            return false;
        };

        let snapshot = {
            let mut workflow = entry.lock();
            workflow.last_update_us = now_us();
            if let Some(stage) = update.stage {
                workflow.current_stage = stage;
            }
            if let Some(status) = update.status {
                workflow.status = status;
            }
            if update.current_step.is_some() {
                workflow.current_step = update.current_step;
            }
            if let Some(completed) = update.completed_steps {
                workflow.completed_steps = completed;
            }
            if let Some(total) = update.total_steps {
                workflow.total_steps = Some(total);
            }
            if update.estimated_completion_us.is_some() {
                workflow.estimated_completion_us = update.estimated_completion_us;
            }
            if let Some(metadata) = update.metadata {
                workflow.metadata.extend(metadata);
            }
            workflow.recompute_progress();
            workflow.clone()
        };
        drop(entry);

        if self.auto_publish_updates {
            self.publish_progress_event(&snapshot).await;
        }
        self.call_workflow_callbacks(workflow_id, &snapshot).await;
        true
    }

    pub async fn complete_milestone(&self, workflow_id: &str, milestone_id: &str, metadata: Option<HashMap<String, Value>>) -> bool {
        let Some(entry) = self.active_workflows.get(workflow_id) else {
            warn!("workflow not found: {}", workflow_id);
            return false;
        };

        let (found, snapshot) = {
            let mut workflow = entry.lock();
            let now = now_us();
            let found = workflow
                .milestones
                .iter_mut()
                .find(|m| m.milestone_id == milestone_id)
                .map(|m| m.complete(now, metadata));
            if found.is_some() {
                workflow.recompute_progress();
            }
            (found.is_some(), workflow.clone())
        };
        drop(entry);

        if found {
            if self.auto_publish_updates {
                self.publish_progress_event(&snapshot).await;
            }
            self.call_workflow_callbacks(workflow_id, &snapshot).await;
        }
        found
    }

    pub async fn complete_workflow(&self, workflow_id: &str, success: bool, final_metadata: Option<HashMap<String, Value>>) -> bool {
        let Some((_, entry)) = self.active_workflows.remove(workflow_id) else {
            warn!("workflow not found: {}", workflow_id);
            return false;
        };

        let snapshot = {
            let mut workflow = entry.into_inner();
            workflow.status = if success { WorkflowStatus::Completed } else { WorkflowStatus::Failed };
            workflow.current_stage = if success { WorkflowStage::Completed } else { WorkflowStage::Failed };
            if success {
                workflow.progress_percentage = 100.0;
            }
            if let Some(metadata) = final_metadata {
                workflow.metadata.extend(metadata);
            }
            workflow
        };

        if self.auto_publish_updates {
            self.publish_progress_event(&snapshot).await;
        }
        self.call_workflow_callbacks(workflow_id, &snapshot).await;
        self.callbacks.remove(workflow_id);

        info!("completed workflow: {} ({})", workflow_id, if success { "success" } else { "failed" });
        true
    }

    pub async fn fail_workflow(&self, workflow_id: &str, error_message: String, error_metadata: Option<HashMap<String, Value>>) -> bool {
        if let Some(entry) = self.active_workflows.get(workflow_id) {
            let mut workflow = entry.lock();
            workflow.error_message = Some(error_message);
            if let Some(metadata) = error_metadata {
                workflow.metadata.extend(metadata);
            }
        } else {
            warn!("workflow not found: {}", workflow_id);
            return false;
        }
        self.complete_workflow(workflow_id, false, None).await
    }

    pub fn add_workflow_callback(&self, workflow_id: &str, callback: WorkflowCallback) -> Option<CallbackId> {
        if !self.active_workflows.contains_key(workflow_id) {
            return None;
        }
        let id = CallbackId(self.next_callback_id.fetch_add(1, Ordering::Relaxed));
        self.callbacks.entry(workflow_id.to_string()).or_default().push((id, callback));
        Some(id)
    }

    pub fn remove_workflow_callback(&self, workflow_id: &str, callback_id: CallbackId) -> bool {
        let Some(mut entry) = self.callbacks.get_mut(workflow_id) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|(id, _)| *id != callback_id);
        entry.len() != before
    }

    pub fn get_workflow_status(&self, workflow_id: &str) -> Option<WorkflowProgress> {
        self.active_workflows.get(workflow_id).map(|e| e.lock().clone())
    }

    pub fn get_active_workflows(&self, user_id: Option<&str>) -> Vec<WorkflowProgress> {
        self.active_workflows
            .iter()
            .map(|e| e.value().lock().clone())
            .filter(|w| user_id.is_none() || w.user_id.as_deref() == user_id)
            .collect()
    }

    async fn publish_progress_event(&self, workflow: &WorkflowProgress) {
        let Some(publisher) = &self.event_publisher else {
            return;
        };
        let data = serde_json::json!({
            "workflow_type": workflow.workflow_type,
            "status": workflow.status,
            "progress_percentage": workflow.progress_percentage,
            "current_step": workflow.current_step,
            "total_steps": workflow.total_steps,
            "completed_steps": workflow.completed_steps,
            "estimated_completion_us": workflow.estimated_completion_us,
        });
        let event = Event::new(event_types::WORKFLOW_PROGRESS, data)
            .with_workflow_id(workflow.workflow_id.clone());
        let event = match &workflow.user_id {
            Some(user_id) => event.with_user_id(user_id.clone()),
            None => event,
        };

        let channel = format!("{}:{}", self.channel_prefix, event_types::WORKFLOW_PROGRESS);
        if let Err(e) = publisher.publish(&channel, &event).await {
            error!("failed to publish workflow progress event: {}", e);
        }
        let all_channel = format!("{}:all", self.channel_prefix);
        if let Err(e) = publisher.publish(&all_channel, &event).await {
            error!("failed to publish workflow progress event to all-events channel: {}", e);
        }
    }

    async fn call_workflow_callbacks(&self, workflow_id: &str, workflow: &WorkflowProgress) {
        let Some(callbacks) = self.callbacks.get(workflow_id) else {
            return;
        };
        let callbacks: Vec<(CallbackId, WorkflowCallback)> = callbacks.value().clone();
        for (_, callback) in callbacks {
            if let Err(e) = callback(workflow.clone()).await {
                error!("error in workflow callback: {}", e);
            }
        }
    }

    async fn cleanup_loop(self: Arc<Self>) {
        while self.running.load(Ordering::Relaxed) {
            tokio::time::sleep(Duration::from_secs(self.cleanup_interval_s)).await;
            if !self.running.load(Ordering::Relaxed) {
                break;
            }

            let now = now_us();
            let timeout_us = (self.workflow_timeout_s as i64) * 1_000_000;
            let stale_threshold_us = 2 * (self.cleanup_interval_s as i64) * 1_000_000;

            let stale: Vec<String> = self
                .active_workflows
                .iter()
                .filter(|e| {
                    let workflow = e.value().lock();
                    now - workflow.start_time_us > timeout_us || now - workflow.last_update_us > stale_threshold_us
                })
                .map(|e| e.key().clone())
                .collect();

            for workflow_id in &stale {
                self.fail_workflow(workflow_id, "Workflow timed out or became stale".to_string(), None)
                    .await;
            }
            if !stale.is_empty() {
                debug!("cleaned up {} stale workflows", stale.len());
            }
        }
    }
}

#[async_trait]
impl ProgressSink for WorkflowProgressTracker {
    async fn start_workflow(
        &self,
        workflow_type: String,
        user_id: Option<String>,
        workflow_id: Option<String>,
        total_steps: Option<u32>,
        estimated_duration_s: Option<u64>,
        milestones: Vec<(String, String, WorkflowStage, f64)>,
    ) -> String {
        self.start_workflow_full(workflow_type, user_id, workflow_id, total_steps, estimated_duration_s, milestones)
            .await
    }

    async fn update_workflow_progress(&self, workflow_id: &str, update: ProgressUpdate) -> bool {
        self.update_workflow_progress_full(workflow_id, update).await
    }

    async fn complete_workflow(&self, workflow_id: &str, success: bool, final_metadata: Option<HashMap<String, Value>>) -> bool {
        WorkflowProgressTracker::complete_workflow(self, workflow_id, success, final_metadata).await
    }
}
