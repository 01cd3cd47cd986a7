use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::info;

use crate::detector::{BreakPointDetector, EmotionalProcessingDetector, MilestoneDetector, SceneTransitionDetector, TimeBasedDetector};
use crate::types::{SessionBreakPoint, SessionConfiguration, SessionState, SessionStateType};

fn now_us() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_micros() as i64
}

const DEFAULT_RECOVERY_WINDOW_S: i64 = 300;

#[derive(Debug, Default)]
pub struct SessionMetrics {
    pub sessions_started: AtomicU64,
    pub sessions_paused: AtomicU64,
    pub sessions_resumed: AtomicU64,
    pub sessions_ended: AtomicU64,
    pub break_points_detected: AtomicU64,
    pub break_points_accepted: AtomicU64,
}

/// A restored session plus a short human-readable catch-up line, returned
/// by [`SessionController::resume_session`] so a caller can greet the
/// player without re-deriving it from raw history.
#[derive(Debug, Clone)]
pub struct SessionResumption {
    pub session: SessionState,
    pub recap: String,
}

/// Closing figures for a session, returned by
/// [`SessionController::end_session`] alongside the final state.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session: SessionState,
    pub duration_s: i64,
    pub scene_count: usize,
    pub choice_count: usize,
    pub engagement_score: f64,
    pub therapeutic_score: f64,
}

/// Drives the session state machine (active/paused/ended) and break point
/// detection that the narrative/gameplay loop polls between turns. The
/// narrative engine itself, the choice processor, and persistence are all
/// out of scope here: this component only owns session lifecycle state.
pub struct SessionController {
    sessions: DashMap<String, Mutex<SessionState>>,
    break_points: DashMap<String, Vec<SessionBreakPoint>>,
    last_break_us: DashMap<String, i64>,
    detectors: Vec<Box<dyn BreakPointDetector>>,
    metrics: SessionMetrics,
    recovery_window_s: i64,
}

impl Default for SessionController {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionController {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            break_points: DashMap::new(),
            last_break_us: DashMap::new(),
            detectors: vec![
                Box::new(TimeBasedDetector),
                Box::new(MilestoneDetector),
                Box::new(EmotionalProcessingDetector::default()),
                Box::new(SceneTransitionDetector),
            ],
            metrics: SessionMetrics::default(),
            recovery_window_s: DEFAULT_RECOVERY_WINDOW_S,
        }
    }

    pub fn with_recovery_window_s(mut self, recovery_window_s: i64) -> Self {
        self.recovery_window_s = recovery_window_s;
        self
    }

    /// Finds a paused session belonging to `user_id` whose last activity
    /// falls inside the recovery window, if any. Used by `start_session` to
    /// decide between resuming in-flight play and starting fresh.
    fn find_resumable_session(&self, user_id: &str, now: i64) -> Option<String> {
        let recovery_window_us = self.recovery_window_s * 1_000_000;
        self.sessions.iter().find_map(|entry| {
            let session = entry.value().lock();
            let resumable = session.user_id == user_id
                && session.state == SessionStateType::Paused
                && now - session.last_activity_us <= recovery_window_us;
            resumable.then(|| session.session_id.clone())
        })
    }

    /// Resumes the user's paused session if one is still within the
    /// recovery window; otherwise starts a fresh one.
    pub fn start_session(&self, config: SessionConfiguration) -> SessionState {
        let now = now_us();
        if let Some(session_id) = self.find_resumable_session(&config.user_id, now) {
            if let Some(resumption) = self.resume_session(&session_id) {
                info!(
                    "resumed paused session {} for user {} within recovery window",
                    session_id, config.user_id
                );
                return resumption.session;
            }
        }

        let session = SessionState::new(config.user_id.clone(), config.therapeutic_goals.clone(), now);
        self.sessions.insert(session.session_id.clone(), Mutex::new(session.clone()));
        self.metrics.sessions_started.fetch_add(1, Ordering::Relaxed);
        info!("started session {} for user {}", session.session_id, session.user_id);
        session
    }

    pub fn pause_session(&self, session_id: &str, reason: &str) -> Option<SessionState> {
        let entry = self.sessions.get(session_id)?;
        let mut session = entry.lock();
        session.state = SessionStateType::Paused;
        session.last_activity_us = now_us();
        session
            .context
            .insert("pause_reason".to_string(), serde_json::Value::String(reason.to_string()));
        self.metrics.sessions_paused.fetch_add(1, Ordering::Relaxed);
        info!("paused session {} ({})", session_id, reason);
        Some(session.clone())
    }

    /// Restores a session to `Active` and returns it together with a recap
    /// line summarizing progress so far.
    pub fn resume_session(&self, session_id: &str) -> Option<SessionResumption> {
        let entry = self.sessions.get(session_id)?;
        let mut session = entry.lock();
        session.state = SessionStateType::Active;
        session.last_activity_us = now_us();
        self.metrics.sessions_resumed.fetch_add(1, Ordering::Relaxed);

        let recap = format!(
            "Welcome back — {} scene(s) explored and {} choice(s) made so far.",
            session.scene_history.len(),
            session.choice_history.len()
        );

        info!("resumed session {}", session_id);
        Some(SessionResumption { session: session.clone(), recap })
    }

    /// Ends a session and produces its closing summary: elapsed duration,
    /// scene/choice counts, and coarse engagement/therapeutic scores.
    /// `engagement_score` is a simple saturating function of total scenes
    /// plus choices; `therapeutic_score` averages the `therapeutic_value`
    /// of break points the player actually accepted, or `0.0` if none were.
    pub fn end_session(&self, session_id: &str) -> Option<SessionSummary> {
        let accepted_break_points = self.break_points_for(session_id);

        let (_, entry) = self.sessions.remove(session_id)?;
        let mut session = entry.into_inner();
        let now = now_us();
        session.state = SessionStateType::Ended;
        session.last_activity_us = now;

        let scene_count = session.scene_history.len();
        let choice_count = session.choice_history.len();
        let duration_s = (now - session.started_at_us).max(0) / 1_000_000;
        let engagement_score = ((scene_count + choice_count) as f64 / 10.0).min(1.0);
        let therapeutic_score = {
            let values: Vec<f64> = accepted_break_points
                .iter()
                .filter(|bp| bp.break_accepted == Some(true))
                .map(|bp| bp.therapeutic_value)
                .collect();
            if values.is_empty() {
                0.0
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            }
        };

        self.break_points.remove(session_id);
        self.last_break_us.remove(session_id);
        self.metrics.sessions_ended.fetch_add(1, Ordering::Relaxed);
        info!("ended session {}", session_id);

        Some(SessionSummary {
            session,
            duration_s,
            scene_count,
            choice_count,
            engagement_score,
            therapeutic_score,
        })
    }

    pub fn get_session(&self, session_id: &str) -> Option<SessionState> {
        self.sessions.get(session_id).map(|e| e.lock().clone())
    }

    /// Runs every detector over the current session state, keeping the
    /// highest-scoring hit. Records it under `session_break_points` either
    /// way, so callers can inspect history even when nothing new fired.
    pub fn detect_break_points(&self, session_id: &str, config: &SessionConfiguration) -> Option<SessionBreakPoint> {
        let session = self.get_session(session_id)?;
        let last_break = self.last_break_us.get(session_id).map(|e| *e);
        let now = now_us();

        let best = self
            .detectors
            .iter()
            .filter_map(|detector| detector.detect(&session, config, last_break, now))
            .max_by(|a, b| a.appropriateness_score.total_cmp(&b.appropriateness_score))?;

        self.break_points.entry(session_id.to_string()).or_default().push(best.clone());
        self.metrics.break_points_detected.fetch_add(1, Ordering::Relaxed);
        Some(best)
    }

    pub fn offer_break(&self, session_id: &str, break_point_id: &str) -> Option<String> {
        let mut entries = self.break_points.get_mut(session_id)?;
        let break_point = entries.iter_mut().find(|bp| bp.break_point_id == break_point_id)?;
        break_point.break_offered = true;
        self.last_break_us.insert(session_id.to_string(), now_us());
        Some(break_point.break_message.clone())
    }

    pub fn respond_to_break(&self, session_id: &str, break_point_id: &str, accept: bool) -> bool {
        let Some(mut entries) = self.break_points.get_mut(session_id) else {
            return false;
        };
        let Some(break_point) = entries.iter_mut().find(|bp| bp.break_point_id == break_point_id) else {
            return false;
        };
        break_point.break_accepted = Some(accept);
        if accept {
            self.metrics.break_points_accepted.fetch_add(1, Ordering::Relaxed);
        }
        true
    }

    pub fn break_points_for(&self, session_id: &str) -> Vec<SessionBreakPoint> {
        self.break_points.get(session_id).map(|e| e.value().clone()).unwrap_or_default()
    }

    pub fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SessionConfiguration {
        let mut config = SessionConfiguration::new("user-1", 30);
        config.therapeutic_goals = vec!["anxiety_management".to_string()];
        config
    }

    #[test]
    fn lifecycle_transitions_update_state() {
        let controller = SessionController::new();
        let session = controller.start_session(config());
        assert_eq!(session.state, SessionStateType::Active);

        let paused = controller.pause_session(&session.session_id, "user_requested").unwrap();
        assert_eq!(paused.state, SessionStateType::Paused);

        let resumed = controller.resume_session(&session.session_id).unwrap();
        assert_eq!(resumed.session.state, SessionStateType::Active);
        assert!(!resumed.recap.is_empty());

        let summary = controller.end_session(&session.session_id).unwrap();
        assert_eq!(summary.session.state, SessionStateType::Ended);
        assert_eq!(summary.scene_count, 0);
        assert_eq!(summary.choice_count, 0);
        assert!(controller.get_session(&session.session_id).is_none());
    }

    #[test]
    fn start_session_resumes_a_paused_session_within_the_recovery_window() {
        let controller = SessionController::new();
        let session = controller.start_session(config());
        controller.pause_session(&session.session_id, "stepped_away").unwrap();

        let resumed = controller.start_session(config());
        assert_eq!(resumed.session_id, session.session_id);
        assert_eq!(resumed.state, SessionStateType::Active);
        assert_eq!(controller.metrics().sessions_started.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn start_session_ignores_a_paused_session_outside_the_recovery_window() {
        let controller = SessionController::new().with_recovery_window_s(0);
        let session = controller.start_session(config());
        controller.pause_session(&session.session_id, "stepped_away").unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        let fresh = controller.start_session(config());
        assert_ne!(fresh.session_id, session.session_id);
        assert_eq!(controller.metrics().sessions_started.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn milestone_achievement_outscores_time_based_and_is_recorded() {
        let controller = SessionController::new();
        let session = controller.start_session(config());

        {
            let entry = controller.sessions.get(&session.session_id).unwrap();
            let mut state = entry.lock();
            state
                .context
                .insert("recent_milestone_achievement".to_string(), serde_json::json!({"milestone": "first_brave_act"}));
        }

        let break_point = controller.detect_break_points(&session.session_id, &config()).unwrap();
        assert_eq!(break_point.break_type, crate::types::BreakPointType::MilestoneAchievement);
        assert!(break_point.therapeutic_value > 0.8);
        assert_eq!(controller.break_points_for(&session.session_id).len(), 1);
    }

    #[test]
    fn offering_and_accepting_a_break_updates_its_record() {
        let controller = SessionController::new();
        let session = controller.start_session(config());
        {
            let entry = controller.sessions.get(&session.session_id).unwrap();
            let mut state = entry.lock();
            state.emotional_state.insert("anxiety".to_string(), 0.8);
        }

        let break_point = controller.detect_break_points(&session.session_id, &config()).unwrap();
        let message = controller.offer_break(&session.session_id, &break_point.break_point_id).unwrap();
        assert!(!message.is_empty());

        assert!(controller.respond_to_break(&session.session_id, &break_point.break_point_id, true));
        let recorded = controller.break_points_for(&session.session_id);
        assert_eq!(recorded[0].break_accepted, Some(true));
        assert_eq!(controller.metrics().break_points_accepted.load(Ordering::Relaxed), 1);
    }
}
