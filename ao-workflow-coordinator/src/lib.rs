//! Binds the message coordinator and the workflow progress tracker together:
//! every send/receive/ack/nack tied to a workflow id turns into a progress
//! update, a milestone, or a lifecycle event, without the coordinator or the
//! tracker needing to know about each other directly.

use std::collections::HashMap;

use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use ao_coordinator::{
    AgentId, AgentMessage, CoordinatorError, FailureType, MessageCoordinator, MessageResult,
    MessageSink, MessageSource, ReceivedMessage,
};
use ao_events::{event_types, Event, EventPublisher};
use ao_tracker::{ProgressSink, ProgressUpdate, WorkflowProgressTracker, WorkflowStage};
use std::sync::Arc;

fn agent_label(agent: &AgentId) -> String {
    format!("{}:{}", agent.type_key(), agent.instance())
}

pub struct WorkflowAwareCoordinator {
    coordinator: MessageCoordinator,
    tracker: Arc<WorkflowProgressTracker>,
    event_publisher: Option<Arc<dyn EventPublisher>>,
    channel_prefix: String,
    message_to_workflow: DashMap<String, String>,
}

impl WorkflowAwareCoordinator {
    pub fn new(
        coordinator: MessageCoordinator,
        tracker: Arc<WorkflowProgressTracker>,
        event_publisher: Option<Arc<dyn EventPublisher>>,
        channel_prefix: impl Into<String>,
    ) -> Self {
        Self {
            coordinator,
            tracker,
            event_publisher,
            channel_prefix: channel_prefix.into(),
            message_to_workflow: DashMap::new(),
        }
    }

    /// Seeds a milestone per participating agent (first = initializing,
    /// last = finalizing, everything in between = executing), with equal
    /// weights summing to 1, then starts tracking.
    pub async fn start_workflow_tracking(
        &self,
        workflow_type: String,
        participating_agents: &[AgentId],
        user_id: Option<String>,
        workflow_id: Option<String>,
        estimated_messages: Option<u32>,
    ) -> String {
        let n = participating_agents.len();
        let weight = if n > 0 { 1.0 / n as f64 } else { 0.0 };

        let milestones: Vec<(String, String, WorkflowStage, f64)> = participating_agents
            .iter()
            .enumerate()
            .map(|(i, agent)| {
                let label = agent_label(agent);
                let stage = if i == 0 && n == 1 {
                    WorkflowStage::Finalizing
                } else if i == 0 {
                    WorkflowStage::Initializing
                } else if i == n - 1 {
                    WorkflowStage::Finalizing
                } else {
                    WorkflowStage::Executing
                };
                (
                    format!("agent:{}", label),
                    format!("Participation of {} in workflow", label),
                    stage,
                    weight,
                )
            })
            .collect();

        self.tracker
            .start_workflow(workflow_type, user_id, workflow_id, estimated_messages, None, milestones)
            .await
    }

    pub async fn send_workflow_message(
        &self,
        workflow_id: &str,
        message: AgentMessage,
    ) -> Result<MessageResult, CoordinatorError> {
        let sender = agent_label(&message.sender);
        let recipient = agent_label(&message.recipient);
        let message_id = message.message_id.clone();

        let result = self.coordinator.send(message).await?;
        if result.delivered {
            self.message_to_workflow.insert(message_id.clone(), workflow_id.to_string());
            self.tracker
                .update_workflow_progress(
                    workflow_id,
                    ProgressUpdate {
                        current_step: Some(format!("Message sent from {} to {}", sender, recipient)),
                        ..Default::default()
                    },
                )
                .await;
            self.publish_lifecycle_event(workflow_id, event_types::MESSAGE_DELIVERED, &message_id, None)
                .await;
        }
        Ok(result)
    }

    pub async fn broadcast_workflow_message(
        &self,
        workflow_id: &str,
        message: AgentMessage,
        recipients: &[AgentId],
    ) -> Result<Vec<MessageResult>, CoordinatorError> {
        let sender = agent_label(&message.sender);
        let message_id = message.message_id.clone();

        let results = self.coordinator.broadcast(message, recipients).await?;
        let any_delivered = results.iter().any(|r| r.delivered);
        if any_delivered {
            self.message_to_workflow.insert(message_id.clone(), workflow_id.to_string());
            self.tracker
                .update_workflow_progress(
                    workflow_id,
                    ProgressUpdate {
                        current_step: Some(format!(
                            "Message broadcast from {} to {} recipients",
                            sender,
                            recipients.len()
                        )),
                        ..Default::default()
                    },
                )
                .await;
            self.publish_lifecycle_event(workflow_id, event_types::MESSAGE_DELIVERED, &message_id, None)
                .await;
        }
        Ok(results)
    }

    pub async fn receive_workflow_message(
        &self,
        agent: &AgentId,
        visibility_timeout_s: u64,
    ) -> Result<Option<ReceivedMessage>, CoordinatorError> {
        let received = self.coordinator.receive(agent, visibility_timeout_s).await?;
        if let Some(received) = &received {
            let message_id = &received.message.message.message_id;
            if let Some(workflow_id) = self.message_to_workflow.get(message_id).map(|e| e.value().clone()) {
                self.tracker
                    .update_workflow_progress(
                        &workflow_id,
                        ProgressUpdate {
                            current_step: Some(format!("Message received by {}", agent_label(agent))),
                            ..Default::default()
                        },
                    )
                    .await;
            }
        }
        Ok(received)
    }

    pub async fn ack_workflow_message(
        &self,
        agent: &AgentId,
        token: &str,
        message_id: &str,
    ) -> Result<bool, CoordinatorError> {
        let acked = self.coordinator.ack(agent, token).await?;
        if acked {
            if let Some(workflow_id) = self.message_to_workflow.get(message_id).map(|e| e.value().clone()) {
                self.tracker
                    .update_workflow_progress(
                        &workflow_id,
                        ProgressUpdate {
                            current_step: Some(format!("Message {} acknowledged by {}", message_id, agent_label(agent))),
                            ..Default::default()
                        },
                    )
                    .await;
                self.publish_lifecycle_event(&workflow_id, event_types::MESSAGE_ACK, message_id, None)
                    .await;
            }
        }
        Ok(acked)
    }

    pub async fn nack_workflow_message(
        &self,
        agent: &AgentId,
        token: &str,
        message_id: &str,
        failure: FailureType,
        error: Option<String>,
    ) -> Result<bool, CoordinatorError> {
        let nacked = self.coordinator.nack(agent, token, failure, error.clone()).await?;
        if nacked {
            if let Some(workflow_id) = self.message_to_workflow.get(message_id).map(|e| e.value().clone()) {
                self.tracker
                    .update_workflow_progress(
                        &workflow_id,
                        ProgressUpdate {
                            current_step: Some(format!("Message {} nacked by {}", message_id, agent_label(agent))),
                            ..Default::default()
                        },
                    )
                    .await;
                self.publish_lifecycle_event(&workflow_id, event_types::MESSAGE_NACK, message_id, error)
                    .await;
            }
        }
        Ok(nacked)
    }

    /// Terminates tracking for a workflow and drops its reverse-index
    /// entries from `message_to_workflow`.
    pub async fn complete_workflow(
        &self,
        workflow_id: &str,
        success: bool,
        final_result: Option<Value>,
        error_message: Option<String>,
    ) -> bool {
        let mut metadata = HashMap::new();
        if let Some(result) = final_result {
            metadata.insert("final_result".to_string(), result);
        }

        let completed = if success {
            self.tracker.complete_workflow(workflow_id, true, Some(metadata)).await
        } else {
            self.tracker
                .fail_workflow(workflow_id, error_message.unwrap_or_else(|| "workflow failed".to_string()), Some(metadata))
                .await
        };

        self.message_to_workflow.retain(|_, wf| wf != workflow_id);
        debug!("completed workflow tracking for {} (success: {})", workflow_id, success);
        completed
    }

    async fn publish_lifecycle_event(&self, workflow_id: &str, event_type: &str, message_id: &str, error: Option<String>) {
        let Some(publisher) = &self.event_publisher else {
            return;
        };
        let data = serde_json::json!({ "message_id": message_id, "error": error });
        let event = Event::new(event_type, data).with_workflow_id(workflow_id.to_string());

        let channel = format!("{}:{}", self.channel_prefix, event_type);
        let _ = publisher.publish(&channel, &event).await;
        let workflow_channel = format!("{}:workflow:{}", self.channel_prefix, workflow_id);
        let _ = publisher.publish(&workflow_channel, &event).await;
    }
}
