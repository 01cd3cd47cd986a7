use std::sync::Arc;

use ao_keyspace::{Keys, SharedStore};
use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::CoordinatorError;
use crate::traits::{MessageSink, MessageSource};
use crate::types::{
    now_us, AgentId, AgentMessage, FailureType, MessagePriority, MessageResult, QueueMessage,
    ReceivedMessage,
};

/// Implements §4.B's `send/broadcast/receive/ack/nack/recover_pending`
/// contract over a [`SharedStore`]. Holds no lock across an await point: all
/// coordination state lives in the store, not in this struct.
pub struct MessageCoordinator {
    store: Arc<dyn SharedStore>,
    keys: Keys,
    backoff_base_ms: u64,
    backoff_cap_ms: u64,
}

impl Clone for MessageCoordinator {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            keys: self.keys.clone(),
            backoff_base_ms: self.backoff_base_ms,
            backoff_cap_ms: self.backoff_cap_ms,
        }
    }
}

impl MessageCoordinator {
    pub fn new(store: Arc<dyn SharedStore>, key_prefix: impl Into<String>) -> Self {
        Self {
            store,
            keys: Keys::new(key_prefix),
            backoff_base_ms: 200,
            backoff_cap_ms: 30_000,
        }
    }

    pub fn with_backoff(mut self, base_ms: u64, cap_ms: u64) -> Self {
        self.backoff_base_ms = base_ms;
        self.backoff_cap_ms = cap_ms;
        self
    }

    fn backoff_ms(&self, attempts: u32) -> u64 {
        let multiplier = 2u64.saturating_pow(attempts.min(32));
        self.backoff_base_ms.saturating_mul(multiplier).min(self.backoff_cap_ms)
    }

    async fn enqueue(&self, queued: &QueueMessage) -> Result<(), CoordinatorError> {
        let recipient = &queued.message.recipient;
        let queue_key = self.keys.queue(recipient.type_key(), recipient.instance());
        let sched_key = self.keys.sched(
            recipient.type_key(),
            recipient.instance(),
            queued.priority.as_u8(),
        );
        let bytes = queued.encode();
        self.store.list_push(&queue_key, bytes.clone()).await?;
        self.store
            .sorted_set_add(&sched_key, queued.enqueued_at as f64, bytes)
            .await?;
        Ok(())
    }

    async fn send_one(&self, message: AgentMessage) -> Result<MessageResult, CoordinatorError> {
        let queued = QueueMessage {
            priority: message.priority,
            message,
            enqueued_at: now_us(),
            delivery_attempts: 0,
            last_error: None,
        };
        let message_id = queued.message.message_id.clone();
        match self.enqueue(&queued).await {
            Ok(()) => Ok(MessageResult {
                message_id,
                delivered: true,
                error: None,
            }),
            Err(e) => {
                warn!("send failed for message {}: {}", message_id, e);
                Ok(MessageResult {
                    message_id,
                    delivered: false,
                    error: Some(e.to_string()),
                })
            }
        }
    }

    /// Scans every priority from highest to lowest, returning the oldest
    /// reservable payload whose schedule score has come due (`<= now`), or
    /// `None` if every due queue is empty for this recipient. A member
    /// scored in the future (a transient-nack's backoff, or a
    /// `recover_pending` requeue not yet due) stays invisible to `receive`
    /// until its score elapses; popping unconditionally would make that
    /// backoff dead code.
    async fn pop_next(
        &self,
        agent: &AgentId,
    ) -> Result<Option<QueueMessage>, CoordinatorError> {
        let now = now_us() as f64;
        for priority in MessagePriority::ALL_DESCENDING {
            let sched_key = self.keys.sched(agent.type_key(), agent.instance(), priority.as_u8());
            let due = self.store.sorted_set_range_by_score(&sched_key, f64::MIN, now).await?;
            let Some(scored) = due.into_iter().next() else {
                continue;
            };
            self.store.sorted_set_remove(&sched_key, &scored.member).await?;
            let queue_key = self.keys.queue(agent.type_key(), agent.instance());
            self.store.list_remove(&queue_key, &scored.member).await?;
            let queued = QueueMessage::decode(&scored.member)?;
            return Ok(Some(queued));
        }
        Ok(None)
    }

    /// Re-enqueues `queued` unchanged under its own priority, with `delay_ms`
    /// added to its effective schedule score. Used by both `nack`'s transient
    /// path and `recover_pending`.
    async fn requeue_with_delay(
        &self,
        queued: &QueueMessage,
        delay_ms: u64,
    ) -> Result<(), CoordinatorError> {
        let recipient = &queued.message.recipient;
        let queue_key = self.keys.queue(recipient.type_key(), recipient.instance());
        let sched_key = self.keys.sched(
            recipient.type_key(),
            recipient.instance(),
            queued.priority.as_u8(),
        );
        let bytes = queued.encode();
        let score = (now_us() as f64) + (delay_ms as f64) * 1000.0;
        self.store.list_push(&queue_key, bytes.clone()).await?;
        self.store.sorted_set_add(&sched_key, score, bytes).await?;
        Ok(())
    }

    async fn send_to_dlq(&self, queued: &QueueMessage) -> Result<(), CoordinatorError> {
        let recipient = &queued.message.recipient;
        let dlq_key = self.keys.dlq(recipient.type_key(), recipient.instance());
        self.store.list_push(&dlq_key, queued.encode()).await?;
        Ok(())
    }

    /// Returns a handle to this coordinator's backing store, for components
    /// (the state validator) that need raw keyspace access alongside the
    /// coordinator's own recovery pass.
    pub fn store(&self) -> Arc<dyn SharedStore> {
        self.store.clone()
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    /// Decodes a raw `QueueMessage` payload pulled directly out of a
    /// `reserved:*` hash and re-enqueues it for redelivery with no extra
    /// delay. Used by the state validator's scan-union and brute-force
    /// passes, which find reservations this coordinator's own
    /// [`recover_pending`] missed.
    pub async fn requeue_raw_payload(&self, payload: &[u8]) -> Result<(), CoordinatorError> {
        let queued = QueueMessage::decode(payload)?;
        self.requeue_with_delay(&queued, 0).await
    }

    /// Re-enqueues every reservation past its visibility deadline for a
    /// single `(type, instance)` pair. Returns the number of payloads
    /// actually recovered (missing payloads just have their stale deadline
    /// entry cleaned up, and are not counted).
    async fn recover_instance(
        &self,
        agent_type: &str,
        instance: &str,
    ) -> Result<usize, CoordinatorError> {
        let deadlines_key = self.keys.reserved_deadlines(agent_type, instance);
        let reserved_key = self.keys.reserved(agent_type, instance);
        let now = now_us() as f64;
        let expired = self
            .store
            .sorted_set_range_by_score(&deadlines_key, f64::MIN, now)
            .await?;

        let mut recovered = 0usize;
        for scored in expired {
            self.store.sorted_set_remove(&deadlines_key, &scored.member).await?;
            let Ok(token) = String::from_utf8(scored.member.clone()) else {
                continue;
            };
            let Some(payload) = self.store.hash_get(&reserved_key, &token).await? else {
                continue;
            };
            self.store.hash_del(&reserved_key, &token).await?;
            let queued = QueueMessage::decode(&payload)?;
            self.requeue_with_delay(&queued, 0).await?;
            recovered += 1;
        }
        Ok(recovered)
    }

    /// Scans the store for every instance with outstanding reservations and
    /// recovers each. Used when no specific agent is targeted.
    pub async fn recover_pending(
        &self,
        agent: Option<&AgentId>,
    ) -> Result<usize, CoordinatorError> {
        if let Some(agent) = agent {
            return self.recover_instance(agent.type_key(), agent.instance()).await;
        }

        let mut total = 0usize;
        for type_key in ["input_processor", "world_builder", "narrative_generator"] {
            let glob = self.keys.reserved_deadlines_glob(type_key);
            let keys = self.store.scan_keys(&glob).await?;
            for key in keys {
                let Some(instance) = Keys::instance_from_key(&key) else {
                    continue;
                };
                total += self.recover_instance(type_key, instance).await?;
            }
        }
        Ok(total)
    }
}

#[async_trait]
impl MessageSink for MessageCoordinator {
    async fn send(&self, message: AgentMessage) -> Result<MessageResult, CoordinatorError> {
        self.send_one(message).await
    }

    async fn broadcast(
        &self,
        message: AgentMessage,
        recipients: &[AgentId],
    ) -> Result<Vec<MessageResult>, CoordinatorError> {
        let mut results = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let mut copy = message.clone();
            copy.recipient = recipient.clone();
            results.push(self.send_one(copy).await?);
        }
        Ok(results)
    }
}

#[async_trait]
impl MessageSource for MessageCoordinator {
    async fn receive(
        &self,
        agent: &AgentId,
        visibility_timeout_s: u64,
    ) -> Result<Option<ReceivedMessage>, CoordinatorError> {
        let Some(mut queued) = self.pop_next(agent).await? else {
            return Ok(None);
        };
        queued.delivery_attempts += 1;

        let token = Uuid::new_v4().as_simple().to_string();
        let reserved_key = self.keys.reserved(agent.type_key(), agent.instance());
        let deadlines_key = self.keys.reserved_deadlines(agent.type_key(), agent.instance());
        let deadline_us = now_us() + (visibility_timeout_s as i64) * 1_000_000;

        self.store
            .hash_set(&reserved_key, &token, queued.encode())
            .await?;
        self.store
            .sorted_set_add(&deadlines_key, deadline_us as f64, token.clone().into_bytes())
            .await?;

        debug!(
            "reserved message {} for {}/{} as token {}",
            queued.message.message_id,
            agent.type_key(),
            agent.instance(),
            token
        );

        Ok(Some(ReceivedMessage {
            token,
            message: queued,
            visibility_deadline_us: deadline_us,
        }))
    }

    async fn ack(&self, agent: &AgentId, token: &str) -> Result<bool, CoordinatorError> {
        let reserved_key = self.keys.reserved(agent.type_key(), agent.instance());
        let deadlines_key = self.keys.reserved_deadlines(agent.type_key(), agent.instance());
        let removed = self.store.hash_del(&reserved_key, token).await?;
        self.store
            .sorted_set_remove(&deadlines_key, token.as_bytes())
            .await?;
        Ok(removed)
    }

    async fn nack(
        &self,
        agent: &AgentId,
        token: &str,
        failure: FailureType,
        error: Option<String>,
    ) -> Result<bool, CoordinatorError> {
        let reserved_key = self.keys.reserved(agent.type_key(), agent.instance());
        let deadlines_key = self.keys.reserved_deadlines(agent.type_key(), agent.instance());

        let Some(payload) = self.store.hash_get(&reserved_key, token).await? else {
            return Ok(false);
        };
        self.store.hash_del(&reserved_key, token).await?;
        self.store
            .sorted_set_remove(&deadlines_key, token.as_bytes())
            .await?;

        let mut queued = QueueMessage::decode(&payload)?;
        queued.last_error = error;

        match failure {
            FailureType::Permanent => {
                self.send_to_dlq(&queued).await?;
            }
            FailureType::Transient | FailureType::Timeout => {
                let delay_ms = self.backoff_ms(queued.delivery_attempts);
                if let Err(e) = self.requeue_with_delay(&queued, delay_ms).await {
                    warn!(
                        "failed to requeue message {} after nack, routing to DLQ: {}",
                        queued.message.message_id, e
                    );
                    self.send_to_dlq(&queued).await?;
                }
            }
        }
        Ok(true)
    }
}
