use crate::types::{BreakPointType, SessionBreakPoint, SessionConfiguration, SessionState};

/// One lens for recognizing a good moment to offer the player a break.
/// Each detector is independent and blind to the others; the controller
/// runs all of them and takes the first (or highest-scoring) hit.
pub trait BreakPointDetector: Send + Sync {
    fn break_type(&self) -> BreakPointType;

    fn detect(
        &self,
        session: &SessionState,
        config: &SessionConfiguration,
        last_break_us: Option<i64>,
        now_us: i64,
    ) -> Option<SessionBreakPoint>;
}

/// Fires once at least `target_duration_minutes / 2` has passed since the
/// last break (or session start, if none was offered yet).
pub struct TimeBasedDetector;

impl BreakPointDetector for TimeBasedDetector {
    fn break_type(&self) -> BreakPointType {
        BreakPointType::TimeBased
    }

    fn detect(
        &self,
        session: &SessionState,
        config: &SessionConfiguration,
        last_break_us: Option<i64>,
        now_us: i64,
    ) -> Option<SessionBreakPoint> {
        let since_last_us = now_us - last_break_us.unwrap_or(session.last_activity_us);
        let threshold_us = (config.target_duration_minutes as i64 / 2).max(1) * 60 * 1_000_000;
        if since_last_us < threshold_us {
            return None;
        }

        let score = (since_last_us as f64 / threshold_us as f64).min(2.0) / 2.0;
        Some(
            SessionBreakPoint::new(session.session_id.clone(), BreakPointType::TimeBased, score)
                .with_message("You've been at this a while \u{2014} want to take a short break?".to_string()),
        )
    }
}

/// Fires when the narrative context records a freshly achieved milestone.
pub struct MilestoneDetector;

impl BreakPointDetector for MilestoneDetector {
    fn break_type(&self) -> BreakPointType {
        BreakPointType::MilestoneAchievement
    }

    fn detect(
        &self,
        session: &SessionState,
        _config: &SessionConfiguration,
        _last_break_us: Option<i64>,
        _now_us: i64,
    ) -> Option<SessionBreakPoint> {
        if !session.context.contains_key("recent_milestone_achievement") {
            return None;
        }
        Some(
            SessionBreakPoint::new(session.session_id.clone(), BreakPointType::MilestoneAchievement, 0.9)
                .with_therapeutic_value(0.9)
                .with_message("That was a big moment. A good place to pause and reflect.".to_string()),
        )
    }
}

/// Fires when reported emotional intensity crosses a threshold, so a
/// break can head off emotional overwhelm.
pub struct EmotionalProcessingDetector {
    pub intensity_threshold: f64,
}

impl Default for EmotionalProcessingDetector {
    fn default() -> Self {
        Self { intensity_threshold: 0.7 }
    }
}

impl BreakPointDetector for EmotionalProcessingDetector {
    fn break_type(&self) -> BreakPointType {
        BreakPointType::EmotionalProcessing
    }

    fn detect(
        &self,
        session: &SessionState,
        _config: &SessionConfiguration,
        _last_break_us: Option<i64>,
        _now_us: i64,
    ) -> Option<SessionBreakPoint> {
        let peak = session.emotional_state.values().copied().fold(0.0_f64, f64::max);
        if peak < self.intensity_threshold {
            return None;
        }
        Some(
            SessionBreakPoint::new(session.session_id.clone(), BreakPointType::EmotionalProcessing, 0.85)
                .with_emotional_intensity(peak)
                .with_message("This brought up a lot. Want to pause before continuing?".to_string()),
        )
    }
}

/// Fires right after a scene boundary, a natural seam with no narrative
/// thread left hanging.
pub struct SceneTransitionDetector;

impl BreakPointDetector for SceneTransitionDetector {
    fn break_type(&self) -> BreakPointType {
        BreakPointType::SceneTransition
    }

    fn detect(
        &self,
        session: &SessionState,
        _config: &SessionConfiguration,
        _last_break_us: Option<i64>,
        _now_us: i64,
    ) -> Option<SessionBreakPoint> {
        if session.scene_history.len() < 2 {
            return None;
        }
        Some(SessionBreakPoint::new(session.session_id.clone(), BreakPointType::SceneTransition, 0.5))
    }
}
