use chrono::Utc;
use tracing::warn;

use atelier_types::{
    ConversationState, Message, PhaseState, RouteType, Session, SessionMode, SkillLevel,
    StudentProfile,
};

use crate::building_type::{detect_building_type, is_explicit_type_change};

/// How many turn snapshots are retained for repair.
const SNAPSHOT_RING: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("session already ended")]
    SessionEnded,
    #[error("state inconsistency: {0}")]
    Inconsistent(String),
}

/// The assistant half of a turn, applied atomically by [`SessionState::complete_turn`].
#[derive(Debug, Clone)]
pub struct TurnAppend {
    pub assistant_text: String,
    pub route: RouteType,
}

/// Exclusive owner of one session's conversation state.
///
/// All mutation goes through `begin_turn` / `complete_turn`; a snapshot is
/// taken after each completed turn.  `complete_turn` validates the result
/// and, on inconsistency, reverts to the last valid snapshot and replays the
/// append — the turn still completes, flagged `state_repaired`.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub session: Session,
    state: ConversationState,
    snapshots: Vec<ConversationState>,
    /// Set when the most recent turn had to be repaired from a snapshot.
    pub state_repaired: bool,
}

impl SessionState {
    pub fn new(session: Session) -> Self {
        let profile = StudentProfile::new(session.skill_level);
        let state = ConversationState::new(profile);
        Self {
            session,
            snapshots: vec![state.clone()],
            state,
            state_repaired: false,
        }
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn mode(&self) -> SessionMode {
        self.session.mode
    }

    pub fn is_ended(&self) -> bool {
        self.session.ended_at.is_some()
    }

    /// A read-only copy for cross-worker consumers.  Workers never share the
    /// live state.
    pub fn snapshot_copy(&self) -> ConversationState {
        self.state.clone()
    }

    /// Append the user message that opens a turn.  Returns the turn id.
    pub fn begin_turn(&mut self, user_text: &str) -> Result<u32, StateError> {
        if self.is_ended() {
            return Err(StateError::SessionEnded);
        }
        let turn_id = self.state.turn_counter;
        self.state.messages.push(Message::user(turn_id, user_text));
        self.observe_building_type(user_text);
        Ok(turn_id)
    }

    /// Append the assistant reply and route, advance the turn counter, and
    /// snapshot.  On a failed validation the state is reverted to the last
    /// valid snapshot, the append replayed, and `state_repaired` set.
    pub fn complete_turn(&mut self, user_text: &str, append: TurnAppend) -> Result<(), StateError> {
        if self.is_ended() {
            return Err(StateError::SessionEnded);
        }
        let turn_id = self.state.turn_counter;
        self.state
            .messages
            .push(Message::assistant(turn_id, &append.assistant_text));
        self.state.route_history.push(append.route);
        self.state.turn_counter += 1;

        self.state_repaired = false;
        if let Err(err) = self.validate() {
            warn!(error = %err, "state inconsistency detected, repairing from snapshot");
            self.repair(user_text, &append);
            self.state_repaired = true;
        }

        self.push_snapshot();
        Ok(())
    }

    /// Revert to the last valid snapshot and replay the current turn on top.
    fn repair(&mut self, user_text: &str, append: &TurnAppend) {
        if let Some(good) = self.snapshots.last() {
            self.state = good.clone();
        }
        let turn_id = self.state.turn_counter;
        self.state.messages.push(Message::user(turn_id, user_text));
        self.state
            .messages
            .push(Message::assistant(turn_id, &append.assistant_text));
        self.state.route_history.push(append.route);
        self.state.turn_counter += 1;
    }

    fn push_snapshot(&mut self) {
        self.snapshots.push(self.state.clone());
        if self.snapshots.len() > SNAPSHOT_RING {
            self.snapshots.remove(0);
        }
    }

    /// Invariant checks over the live state.
    pub fn validate(&self) -> Result<(), StateError> {
        let assistant_count = self.state.assistant_messages().count();
        if self.state.route_history.len() != assistant_count {
            return Err(StateError::Inconsistent(format!(
                "route history ({}) out of step with assistant messages ({assistant_count})",
                self.state.route_history.len()
            )));
        }
        if self.state.turn_counter as usize != assistant_count {
            return Err(StateError::Inconsistent(format!(
                "turn counter {} does not match completed turns {assistant_count}",
                self.state.turn_counter
            )));
        }
        let phase = &self.state.phase;
        if !(1..=4).contains(&phase.step) {
            return Err(StateError::Inconsistent(format!("socratic step {} out of range", phase.step)));
        }
        if !(0.0..=1.0).contains(&phase.progress) {
            return Err(StateError::Inconsistent(format!("phase progress {} out of range", phase.progress)));
        }
        if let Some(prev) = self.snapshots.last() {
            if phase.current < prev.phase.current {
                return Err(StateError::Inconsistent(format!(
                    "phase regressed {} -> {} without user request",
                    prev.phase.current.as_str(),
                    phase.current.as_str()
                )));
            }
        }
        let engagement = self.state.student_profile.engagement;
        if !(0.0..=1.0).contains(&engagement) {
            return Err(StateError::Inconsistent(format!("engagement {engagement} out of range")));
        }
        Ok(())
    }

    /// Set-once building-type rule: first strong evidence wins; afterwards
    /// only an explicit user change replaces it.
    fn observe_building_type(&mut self, user_text: &str) {
        let Some(detected) = detect_building_type(user_text) else {
            return;
        };
        match &self.state.building_type {
            None => self.state.building_type = Some(detected),
            Some(current) if *current != detected && is_explicit_type_change(user_text) => {
                self.state.building_type = Some(detected);
            }
            Some(_) => {}
        }
    }

    /// Apply a phase update from the detector.  Regression is dropped unless
    /// the user explicitly asked to revisit an earlier phase.
    pub fn apply_phase(&mut self, update: PhaseState, explicit_regression: bool) {
        if update.current < self.state.phase.current && !explicit_regression {
            warn!(
                from = self.state.phase.current.as_str(),
                to = update.current.as_str(),
                "dropping phase regression without explicit user signal"
            );
            return;
        }
        self.state.phase = update;
    }

    /// Blend profile signals from the analysis agent into the rolling profile.
    pub fn apply_profile(&mut self, skill: Option<SkillLevel>, engagement_signal: Option<f32>) {
        if let Some(skill) = skill {
            self.state.student_profile.skill_level = skill;
        }
        if let Some(signal) = engagement_signal {
            let current = self.state.student_profile.engagement;
            // Exponential smoothing keeps single turns from whipsawing the profile.
            self.state.student_profile.engagement = (0.7 * current + 0.3 * signal).clamp(0.0, 1.0);
        }
    }

    pub fn set_confidence(&mut self, confidence: atelier_types::ConfidenceLevel) {
        self.state.student_profile.confidence = confidence;
    }

    /// Mark the session ended.  Idempotent; the first call wins.
    pub fn end(&mut self) {
        if self.session.ended_at.is_none() {
            self.session.ended_at = Some(Utc::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_types::DesignPhase;

    fn session_state() -> SessionState {
        let session = Session::new(SessionMode::Mentor, "p01", SkillLevel::Beginner, "a community center");
        SessionState::new(session)
    }

    fn turn(route: RouteType) -> TurnAppend {
        TurnAppend { assistant_text: "What site constraints matter most?".to_string(), route }
    }

    #[test]
    fn begin_and_complete_advance_the_counter() {
        let mut s = session_state();
        let turn_id = s.begin_turn("I'm designing a community center").unwrap();
        assert_eq!(turn_id, 0);
        s.complete_turn("I'm designing a community center", turn(RouteType::ProgressiveOpening))
            .unwrap();
        assert_eq!(s.state().turn_counter, 1);
        assert_eq!(s.state().route_history.len(), 1);
        assert!(!s.state_repaired);
    }

    #[test]
    fn building_type_is_set_once() {
        let mut s = session_state();
        s.begin_turn("I'm designing a community center").unwrap();
        s.complete_turn("x", turn(RouteType::ProgressiveOpening)).unwrap();
        assert_eq!(s.state().building_type.as_deref(), Some("community_center"));

        // A passing mention of another program does not clear or replace it.
        s.begin_turn("the library nearby has nice daylighting").unwrap();
        s.complete_turn("x", turn(RouteType::BalancedGuidance)).unwrap();
        assert_eq!(s.state().building_type.as_deref(), Some("community_center"));
    }

    #[test]
    fn building_type_changes_on_explicit_signal() {
        let mut s = session_state();
        s.begin_turn("I'm designing a community center").unwrap();
        s.complete_turn("x", turn(RouteType::ProgressiveOpening)).unwrap();

        s.begin_turn("actually it's a library now").unwrap();
        s.complete_turn("x", turn(RouteType::TopicTransition)).unwrap();
        assert_eq!(s.state().building_type.as_deref(), Some("library"));
    }

    #[test]
    fn phase_regression_without_signal_is_dropped() {
        let mut s = session_state();
        s.apply_phase(PhaseState { current: DesignPhase::Visualization, step: 1, progress: 0.0 }, false);
        assert_eq!(s.state().phase.current, DesignPhase::Visualization);

        s.apply_phase(PhaseState { current: DesignPhase::Ideation, step: 1, progress: 0.0 }, false);
        assert_eq!(s.state().phase.current, DesignPhase::Visualization);

        s.apply_phase(PhaseState { current: DesignPhase::Ideation, step: 2, progress: 0.25 }, true);
        assert_eq!(s.state().phase.current, DesignPhase::Ideation);
    }

    #[test]
    fn corrupted_state_is_repaired_and_flagged() {
        let mut s = session_state();
        s.begin_turn("first turn").unwrap();
        s.complete_turn("first turn", turn(RouteType::ProgressiveOpening)).unwrap();

        // Corrupt the route history behind the store's back.
        s.state.route_history.push(RouteType::KnowledgeOnly);

        s.begin_turn("second turn").unwrap();
        s.complete_turn("second turn", turn(RouteType::BalancedGuidance)).unwrap();

        assert!(s.state_repaired);
        // After repair the invariants hold again.
        s.validate().unwrap();
        assert_eq!(s.state().turn_counter, 2);
    }

    #[test]
    fn ended_session_rejects_turns() {
        let mut s = session_state();
        s.end();
        assert!(matches!(s.begin_turn("hello"), Err(StateError::SessionEnded)));
        let first_end = s.session.ended_at;
        s.end();
        assert_eq!(s.session.ended_at, first_end);
    }

    #[test]
    fn engagement_blending_is_smoothed_and_clamped() {
        let mut s = session_state();
        s.apply_profile(None, Some(1.0));
        let after_one = s.state().student_profile.engagement;
        assert!(after_one > 0.5 && after_one < 1.0);
        for _ in 0..50 {
            s.apply_profile(None, Some(1.0));
        }
        assert!(s.state().student_profile.engagement <= 1.0);
    }
}
