//! Session lifecycle (active/paused/ended) and break point detection for
//! the gameplay loop sitting on top of the message/workflow layer below.

pub mod controller;
pub mod detector;
pub mod types;

pub use controller::{SessionController, SessionMetrics, SessionResumption, SessionSummary};
pub use detector::{BreakPointDetector, EmotionalProcessingDetector, MilestoneDetector, SceneTransitionDetector, TimeBasedDetector};
pub use types::{BreakPointType, SessionBreakPoint, SessionConfiguration, SessionState, SessionStateType};
