use async_trait::async_trait;

use crate::error::CoordinatorError;
use crate::types::{AgentId, AgentMessage, FailureType, MessageResult, ReceivedMessage};

/// Narrow capability for producing messages. Callers that only ever enqueue
/// work (e.g. an API gateway) depend on this instead of the full coordinator.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, message: AgentMessage) -> Result<MessageResult, CoordinatorError>;

    async fn broadcast(
        &self,
        message: AgentMessage,
        recipients: &[AgentId],
    ) -> Result<Vec<MessageResult>, CoordinatorError>;
}

/// Narrow capability for consuming messages. Callers that only ever pull and
/// acknowledge work (e.g. a worker loop) depend on this instead of the full
/// coordinator.
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn receive(
        &self,
        agent: &AgentId,
        visibility_timeout_s: u64,
    ) -> Result<Option<ReceivedMessage>, CoordinatorError>;

    async fn ack(&self, agent: &AgentId, token: &str) -> Result<bool, CoordinatorError>;

    async fn nack(
        &self,
        agent: &AgentId,
        token: &str,
        failure: FailureType,
        error: Option<String>,
    ) -> Result<bool, CoordinatorError>;
}
