use async_trait::async_trait;

use crate::broker::EventBroker;
use crate::event::Event;

/// Narrow capability for emitting events, independent of subscribing to
/// them. Components that only ever publish (the progress tracker, the
/// workflow-aware coordinator) depend on this instead of the full broker.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, channel: &str, event: &Event) -> anyhow::Result<()>;
}

/// Publishes by JSON-encoding onto a broker channel.
pub struct BrokerPublisher<B: EventBroker> {
    broker: std::sync::Arc<B>,
}

impl<B: EventBroker> BrokerPublisher<B> {
    pub fn new(broker: std::sync::Arc<B>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl<B: EventBroker> EventPublisher for BrokerPublisher<B> {
    async fn publish(&self, channel: &str, event: &Event) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(event)?;
        self.broker.publish(channel, payload).await
    }
}
