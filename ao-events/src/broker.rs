use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

/// Multiplexed pub/sub transport: many channels over one logical
/// subscription, matching how a single Redis `PubSub` connection serves
/// every subscribed channel through one message stream.
#[async_trait]
pub trait EventBroker: Send + Sync {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> anyhow::Result<()>;
    async fn subscribe_channel(&self, channel: &str) -> anyhow::Result<()>;
    async fn unsubscribe_channel(&self, channel: &str) -> anyhow::Result<()>;

    /// Waits up to `timeout` for the next message on any subscribed
    /// channel. Returns `None` on timeout, never an error for that case.
    async fn next_message(&self, timeout: Duration) -> anyhow::Result<Option<(String, Vec<u8>)>>;
}

enum Command {
    Subscribe(String),
    Unsubscribe(String),
}

/// Redis-backed broker. A single background task owns the dedicated pub/sub
/// connection (Redis forbids other commands on it); `subscribe`/`unsubscribe`
/// calls are routed to it over a command channel, matching the
/// single-owner-task pattern used for the pub/sub connection elsewhere in
/// this stack.
pub struct RedisBroker {
    publish_conn: redis::aio::ConnectionManager,
    cmd_tx: mpsc::UnboundedSender<Command>,
    incoming: Mutex<mpsc::UnboundedReceiver<(String, Vec<u8>)>>,
}

impl RedisBroker {
    pub async fn new(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let publish_conn = redis::aio::ConnectionManager::new(client.clone()).await?;
        let pubsub_conn = client.get_async_connection().await?;
        let mut pubsub = pubsub_conn.into_pubsub();

        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();
        let (msg_tx, msg_rx) = mpsc::unbounded_channel::<(String, Vec<u8>)>();

        tokio::spawn(async move {
            use futures::StreamExt;
            loop {
                tokio::select! {
                    cmd = cmd_rx.recv() => {
                        match cmd {
                            Some(Command::Subscribe(channel)) => {
                                if let Err(e) = pubsub.subscribe(&channel).await {
                                    warn!("failed to subscribe to {}: {}", channel, e);
                                }
                            }
                            Some(Command::Unsubscribe(channel)) => {
                                if let Err(e) = pubsub.unsubscribe(&channel).await {
                                    warn!("failed to unsubscribe from {}: {}", channel, e);
                                }
                            }
                            None => break,
                        }
                    }
                    maybe_msg = pubsub.on_message().next() => {
                        let Some(msg) = maybe_msg else { break };
                        let channel = msg.get_channel_name().to_string();
                        let payload: Vec<u8> = msg.get_payload().unwrap_or_default();
                        if msg_tx.send((channel, payload)).is_err() {
                            break;
                        }
                    }
                }
            }
            info!("redis broker background task exiting");
        });

        Ok(Self {
            publish_conn,
            cmd_tx,
            incoming: Mutex::new(msg_rx),
        })
    }
}

#[async_trait]
impl EventBroker for RedisBroker {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> anyhow::Result<()> {
        let mut conn = self.publish_conn.clone();
        let _: u32 = conn.publish(channel, payload).await?;
        Ok(())
    }

    async fn subscribe_channel(&self, channel: &str) -> anyhow::Result<()> {
        self.cmd_tx
            .send(Command::Subscribe(channel.to_string()))
            .map_err(|_| anyhow::anyhow!("broker task has shut down"))
    }

    async fn unsubscribe_channel(&self, channel: &str) -> anyhow::Result<()> {
        self.cmd_tx
            .send(Command::Unsubscribe(channel.to_string()))
            .map_err(|_| anyhow::anyhow!("broker task has shut down"))
    }

    async fn next_message(&self, timeout: Duration) -> anyhow::Result<Option<(String, Vec<u8>)>> {
        let mut incoming = self.incoming.lock().await;
        match tokio::time::timeout(timeout, incoming.recv()).await {
            Ok(Some(msg)) => Ok(Some(msg)),
            Ok(None) => Err(anyhow::anyhow!("broker task has shut down")),
            Err(_elapsed) => Ok(None),
        }
    }
}

/// In-process broker for tests and brokerless hosts. Delivery only reaches
/// channels that are currently subscribed, mirroring real pub/sub semantics
/// (a publish with no subscribers is simply dropped).
pub struct MemoryBroker {
    subscribed: DashMap<String, ()>,
    tx: mpsc::UnboundedSender<(String, Vec<u8>)>,
    rx: Mutex<mpsc::UnboundedReceiver<(String, Vec<u8>)>>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            subscribed: DashMap::new(),
            tx,
            rx: Mutex::new(rx),
        }
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventBroker for MemoryBroker {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> anyhow::Result<()> {
        if self.subscribed.contains_key(channel) {
            let _ = self.tx.send((channel.to_string(), payload));
        }
        Ok(())
    }

    async fn subscribe_channel(&self, channel: &str) -> anyhow::Result<()> {
        self.subscribed.insert(channel.to_string(), ());
        Ok(())
    }

    async fn unsubscribe_channel(&self, channel: &str) -> anyhow::Result<()> {
        self.subscribed.remove(channel);
        Ok(())
    }

    async fn next_message(&self, timeout: Duration) -> anyhow::Result<Option<(String, Vec<u8>)>> {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(msg)) => Ok(Some(msg)),
            Ok(None) => Ok(None),
            Err(_elapsed) => Ok(None),
        }
    }
}
