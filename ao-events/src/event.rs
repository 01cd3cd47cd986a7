use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Well-known event-type strings. The set is open-ended (the store never
/// validates it), but these are the ones other components in this workspace
/// emit.
pub mod event_types {
    pub const WORKFLOW_PROGRESS: &str = "workflow_progress";
    pub const MESSAGE_DELIVERED: &str = "message_delivered";
    pub const MESSAGE_ACK: &str = "message_ack";
    pub const MESSAGE_NACK: &str = "message_nack";
    pub const CONSEQUENCE_APPLIED: &str = "consequence_applied";
    pub const CHOICE_MADE: &str = "choice_made";
    pub const SAFETY_CHECK_TRIGGERED: &str = "safety_check_triggered";
}

/// Wire shape published to every broker channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub event_type: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl Event {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_id: Uuid::new_v4().as_simple().to_string(),
            event_type: event_type.into(),
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
            session_id: None,
            user_id: None,
            workflow_id: None,
            agent_id: None,
            data,
        }
    }

    pub fn with_workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_carries_generated_id_and_type() {
        let event = Event::new(event_types::WORKFLOW_PROGRESS, serde_json::json!({"k": "v"}));
        assert_eq!(event.event_type, "workflow_progress");
        assert_eq!(event.event_id.len(), 32);
        assert!(event.timestamp.ends_with('Z'));
    }

    #[test]
    fn round_trips_through_json() {
        let event = Event::new(event_types::MESSAGE_ACK, serde_json::json!({})).with_workflow_id("wf-1");
        let bytes = serde_json::to_vec(&event).unwrap();
        let decoded: Event = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, event);
    }
}
