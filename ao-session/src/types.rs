use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStateType {
    Active,
    Paused,
    Ended,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub user_id: String,
    pub state: SessionStateType,
    pub therapeutic_goals: Vec<String>,
    pub started_at_us: i64,
    pub last_activity_us: i64,
    pub scene_history: Vec<String>,
    pub choice_history: Vec<String>,
    pub emotional_state: HashMap<String, f64>,
    pub context: HashMap<String, Value>,
}

impl SessionState {
    pub fn new(user_id: impl Into<String>, therapeutic_goals: Vec<String>, now_us: i64) -> Self {
        Self {
            session_id: Uuid::new_v4().as_simple().to_string(),
            user_id: user_id.into(),
            state: SessionStateType::Active,
            therapeutic_goals,
            started_at_us: now_us,
            last_activity_us: now_us,
            scene_history: Vec::new(),
            choice_history: Vec::new(),
            emotional_state: HashMap::new(),
            context: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfiguration {
    pub user_id: String,
    pub target_duration_minutes: u32,
    pub therapeutic_goals: Vec<String>,
    pub break_point_notifications: bool,
}

impl SessionConfiguration {
    pub fn new(user_id: impl Into<String>, target_duration_minutes: u32) -> Self {
        Self {
            user_id: user_id.into(),
            target_duration_minutes,
            therapeutic_goals: Vec::new(),
            break_point_notifications: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakPointType {
    TimeBased,
    MilestoneAchievement,
    EmotionalProcessing,
    SceneTransition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionBreakPoint {
    pub break_point_id: String,
    pub session_id: String,
    pub break_type: BreakPointType,
    pub appropriateness_score: f64,
    pub therapeutic_value: f64,
    pub emotional_intensity: f64,
    pub break_offered: bool,
    pub break_accepted: Option<bool>,
    pub break_message: String,
}

impl SessionBreakPoint {
    pub fn new(session_id: impl Into<String>, break_type: BreakPointType, appropriateness_score: f64) -> Self {
        Self {
            break_point_id: Uuid::new_v4().as_simple().to_string(),
            session_id: session_id.into(),
            break_type,
            appropriateness_score,
            therapeutic_value: 0.0,
            emotional_intensity: 0.0,
            break_offered: false,
            break_accepted: None,
            break_message: String::new(),
        }
    }

    pub fn with_therapeutic_value(mut self, value: f64) -> Self {
        self.therapeutic_value = value;
        self
    }

    pub fn with_emotional_intensity(mut self, value: f64) -> Self {
        self.emotional_intensity = value;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.break_message = message.into();
        self
    }
}
