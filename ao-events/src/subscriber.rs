use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::{join_all, BoxFuture};
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broker::EventBroker;
use crate::event::Event;

pub type EventHandler = Arc<dyn Fn(Event) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Debug, Clone, Default, Serialize)]
pub struct SubscriberStatistics {
    pub subscriber_id: String,
    pub is_running: bool,
    pub events_received: u64,
    pub events_processed: u64,
    pub events_failed: u64,
    pub active_subscriptions: usize,
    pub total_handlers: usize,
    pub subscribed_channels: Vec<String>,
}

/// Dispatches broker events to registered handlers, one background loop per
/// subscriber polling a single multiplexed broker connection.
pub struct EventSubscriber<B: EventBroker> {
    broker: Arc<B>,
    channel_prefix: String,
    subscriber_id: String,
    handlers: DashMap<String, Vec<(HandlerId, EventHandler)>>,
    next_handler_id: AtomicU64,
    running: Arc<AtomicBool>,
    loop_handle: AsyncMutex<Option<JoinHandle<()>>>,
    events_received: Arc<AtomicU64>,
    events_processed: Arc<AtomicU64>,
    events_failed: Arc<AtomicU64>,
}

impl<B: EventBroker + 'static> EventSubscriber<B> {
    pub fn new(broker: Arc<B>, channel_prefix: impl Into<String>) -> Self {
        Self {
            broker,
            channel_prefix: channel_prefix.into(),
            subscriber_id: Uuid::new_v4().as_simple().to_string(),
            handlers: DashMap::new(),
            next_handler_id: AtomicU64::new(1),
            running: Arc::new(AtomicBool::new(false)),
            loop_handle: AsyncMutex::new(None),
            events_received: Arc::new(AtomicU64::new(0)),
            events_processed: Arc::new(AtomicU64::new(0)),
            events_failed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Takes `Arc<Self>` so the background loop can hold its own owning
    /// reference; call as `subscriber.clone().start().await` to keep using
    /// the original handle afterward.
    pub async fn start(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = self.clone();
        let handle = tokio::spawn(async move { this.subscription_loop().await });
        *self.loop_handle.lock().await = Some(handle);
        info!("event subscriber started: {}", self.subscriber_id);
    }

    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.loop_handle.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
        info!("event subscriber stopped: {}", self.subscriber_id);
    }

    pub async fn subscribe_to_all_events(&self, handler: EventHandler) -> anyhow::Result<HandlerId> {
        let channel = format!("{}:all", self.channel_prefix);
        self.subscribe_to_channel(&channel, handler).await
    }

    pub async fn subscribe_to_event_type(
        &self,
        event_type: &str,
        handler: EventHandler,
    ) -> anyhow::Result<HandlerId> {
        let channel = format!("{}:{}", self.channel_prefix, event_type);
        self.subscribe_to_channel(&channel, handler).await
    }

    pub async fn subscribe_to_agent_events(
        &self,
        agent_id: &str,
        handler: EventHandler,
    ) -> anyhow::Result<HandlerId> {
        let channel = format!("{}:agent:{}", self.channel_prefix, agent_id);
        self.subscribe_to_channel(&channel, handler).await
    }

    pub async fn subscribe_to_user_events(
        &self,
        user_id: &str,
        handler: EventHandler,
    ) -> anyhow::Result<HandlerId> {
        let channel = format!("{}:user:{}", self.channel_prefix, user_id);
        self.subscribe_to_channel(&channel, handler).await
    }

    pub async fn subscribe_to_channel(
        &self,
        channel: &str,
        handler: EventHandler,
    ) -> anyhow::Result<HandlerId> {
        let is_first = !self.handlers.contains_key(channel);
        if is_first {
            self.broker.subscribe_channel(channel).await?;
        }
        let id = HandlerId(self.next_handler_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.entry(channel.to_string()).or_default().push((id, handler));
        debug!("added handler to channel {}", channel);
        Ok(id)
    }

    pub async fn unsubscribe_from_channel(
        &self,
        channel: &str,
        handler_id: Option<HandlerId>,
    ) -> anyhow::Result<()> {
        let Some(mut entry) = self.handlers.get_mut(channel) else {
            return Ok(());
        };
        match handler_id {
            Some(id) => entry.retain(|(hid, _)| *hid != id),
            None => entry.clear(),
        }
        let empty = entry.is_empty();
        drop(entry);
        if empty {
            self.handlers.remove(channel);
            self.broker.unsubscribe_channel(channel).await?;
            debug!("unsubscribed from channel {}", channel);
        }
        Ok(())
    }

    pub fn get_statistics(&self) -> SubscriberStatistics {
        SubscriberStatistics {
            subscriber_id: self.subscriber_id.clone(),
            is_running: self.running.load(Ordering::Relaxed),
            events_received: self.events_received.load(Ordering::Relaxed),
            events_processed: self.events_processed.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
            active_subscriptions: self.handlers.len(),
            total_handlers: self.handlers.iter().map(|e| e.value().len()).sum(),
            subscribed_channels: self.handlers.iter().map(|e| e.key().clone()).collect(),
        }
    }

    async fn subscription_loop(self: Arc<Self>) {
        while self.running.load(Ordering::Relaxed) {
            match self.broker.next_message(Duration::from_secs(1)).await {
                Ok(Some((channel, payload))) => {
                    self.events_received.fetch_add(1, Ordering::Relaxed);
                    self.dispatch(&channel, &payload).await;
                }
                Ok(None) => continue,
                Err(e) => {
                    error!("error in subscription loop: {}", e);
                    self.events_failed.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        debug!("subscription loop ended: {}", self.subscriber_id);
    }

    async fn dispatch(&self, channel: &str, payload: &[u8]) {
        let event: Event = match serde_json::from_slice(payload) {
            Ok(e) => e,
            Err(e) => {
                warn!("failed to parse event data on {}: {}", channel, e);
                self.events_failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let Some(handlers) = self.handlers.get(channel) else {
            debug!("no handlers for channel: {}", channel);
            return;
        };
        let handlers: Vec<(HandlerId, EventHandler)> = handlers.value().clone();
        if handlers.is_empty() {
            return;
        }

        let futures = handlers.iter().map(|(_, h)| h(event.clone()));
        let results = join_all(futures).await;

        let success_count = results.iter().filter(|r| r.is_ok()).count();
        if success_count > 0 {
            self.events_processed.fetch_add(1, Ordering::Relaxed);
        }
        for (i, result) in results.iter().enumerate() {
            if let Err(e) = result {
                error!("handler {} failed for channel {}: {}", i, channel, e);
                self.events_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
