use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A closed set of logical agent roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    InputProcessor,
    WorldBuilder,
    NarrativeGenerator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Request,
    Response,
    Event,
}

/// Delivery priority. Values match the source system's integer encoding so
/// they can be used directly as sorted-set score components / key suffixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessagePriority {
    Low = 1,
    Normal = 5,
    High = 9,
}

impl MessagePriority {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Strict priority ordering used by `receive`: critical-to-low.
    pub const ALL_DESCENDING: [MessagePriority; 3] =
        [MessagePriority::High, MessagePriority::Normal, MessagePriority::Low];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingKey {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// `(type, instance)` pair identifying a recipient or sender. A missing
/// instance is treated as the sentinel `"default"` by [`AgentId::instance`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId {
    #[serde(rename = "type")]
    pub agent_type: AgentType,
    pub instance: Option<String>,
}

impl AgentId {
    pub fn new(agent_type: AgentType, instance: Option<String>) -> Self {
        Self {
            agent_type,
            instance,
        }
    }

    /// The effective instance name, substituting the `"default"` sentinel
    /// when none was given.
    pub fn instance(&self) -> &str {
        self.instance.as_deref().unwrap_or("default")
    }

    pub fn type_key(&self) -> &'static str {
        match self.agent_type {
            AgentType::InputProcessor => "input_processor",
            AgentType::WorldBuilder => "world_builder",
            AgentType::NarrativeGenerator => "narrative_generator",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub message_id: String,
    pub sender: AgentId,
    pub recipient: AgentId,
    pub message_type: MessageType,
    #[serde(default)]
    pub payload: HashMap<String, Value>,
    #[serde(default = "default_priority")]
    pub priority: MessagePriority,
    #[serde(default)]
    pub routing: RoutingKey,
    pub timestamp: Option<String>,
}

fn default_priority() -> MessagePriority {
    MessagePriority::Normal
}

impl AgentMessage {
    /// Constructs a message, validating the `message_id` length invariant
    /// from the data model (`>= 6 chars`).
    pub fn new(
        message_id: impl Into<String>,
        sender: AgentId,
        recipient: AgentId,
        message_type: MessageType,
    ) -> Result<Self, String> {
        let message_id = message_id.into();
        if message_id.len() < 6 {
            return Err(format!(
                "message_id must be at least 6 characters, got {:?}",
                message_id
            ));
        }
        Ok(Self {
            message_id,
            sender,
            recipient,
            message_type,
            payload: HashMap::new(),
            priority: MessagePriority::Normal,
            routing: RoutingKey::default(),
            timestamp: None,
        })
    }
}

/// Three ways a reservation can fail, controlling `nack` behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    Transient,
    Permanent,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResult {
    pub message_id: String,
    pub delivered: bool,
    pub error: Option<String>,
}

/// Wire form stored in `queue:*` / `sched:*` / `reserved:*` / `dlq:*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub message: AgentMessage,
    pub priority: MessagePriority,
    pub enqueued_at: i64,
    pub delivery_attempts: u32,
    pub last_error: Option<String>,
}

impl QueueMessage {
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("QueueMessage is always serializable")
    }

    pub fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Reservation wrapper returned by `receive`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceivedMessage {
    pub token: String,
    pub message: QueueMessage,
    pub visibility_deadline_us: i64,
}

/// Current wall-clock time in microseconds since the Unix epoch.
pub fn now_us() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_micros() as i64
}
