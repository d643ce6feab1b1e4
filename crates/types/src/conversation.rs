use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::route::RouteType;
use crate::session::StudentProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One entry in the append-only conversation transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
    pub ts: DateTime<Utc>,
    pub turn_id: u32,
}

impl Message {
    pub fn user(turn_id: u32, text: impl Into<String>) -> Self {
        Self { role: Role::User, text: text.into(), ts: Utc::now(), turn_id }
    }

    pub fn assistant(turn_id: u32, text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, text: text.into(), ts: Utc::now(), turn_id }
    }

    pub fn system(turn_id: u32, text: impl Into<String>) -> Self {
        Self { role: Role::System, text: text.into(), ts: Utc::now(), turn_id }
    }
}

/// Coarse-grained design process stage.  Monotonic per session except on an
/// explicit user regression signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesignPhase {
    Ideation,
    Visualization,
    Materialization,
}

impl DesignPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            DesignPhase::Ideation => "ideation",
            DesignPhase::Visualization => "visualization",
            DesignPhase::Materialization => "materialization",
        }
    }

    pub fn next(&self) -> Option<DesignPhase> {
        match self {
            DesignPhase::Ideation => Some(DesignPhase::Visualization),
            DesignPhase::Visualization => Some(DesignPhase::Materialization),
            DesignPhase::Materialization => None,
        }
    }
}

/// Where the session stands within the design process.
///
/// `step` is the socratic step (1..=4) within the current phase; `progress`
/// is the fraction of step criteria achieved so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseState {
    pub current: DesignPhase,
    pub step: u8,
    pub progress: f32,
}

impl Default for PhaseState {
    fn default() -> Self {
        Self { current: DesignPhase::Ideation, step: 1, progress: 0.0 }
    }
}

/// The mutable heart of a session, owned exclusively by its state store.
///
/// Invariants enforced by `atelier-state`:
/// * `messages` is append-only;
/// * `route_history.len()` equals the number of assistant messages;
/// * `building_type`, once set, is only replaced on an explicit user change
///   and never silently cleared;
/// * `phase` never regresses without an explicit user request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub messages: Vec<Message>,
    pub building_type: Option<String>,
    pub route_history: Vec<RouteType>,
    pub phase: PhaseState,
    pub student_profile: StudentProfile,
    pub turn_counter: u32,
}

impl ConversationState {
    pub fn new(profile: StudentProfile) -> Self {
        Self {
            messages: Vec::new(),
            building_type: None,
            route_history: Vec::new(),
            phase: PhaseState::default(),
            student_profile: profile,
            turn_counter: 0,
        }
    }

    pub fn user_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role == Role::User)
    }

    pub fn assistant_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role == Role::Assistant)
    }

    pub fn last_user_text(&self) -> Option<&str> {
        self.user_messages().last().map(|m| m.text.as_str())
    }

    pub fn last_assistant_text(&self) -> Option<&str> {
        self.assistant_messages().last().map(|m| m.text.as_str())
    }

    /// Most recent `n` messages in transcript order.
    pub fn recent_messages(&self, n: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SkillLevel;

    fn state() -> ConversationState {
        ConversationState::new(StudentProfile::new(SkillLevel::Intermediate))
    }

    #[test]
    fn fresh_state_is_empty_ideation() {
        let s = state();
        assert_eq!(s.turn_counter, 0);
        assert_eq!(s.phase.current, DesignPhase::Ideation);
        assert_eq!(s.phase.step, 1);
        assert!(s.building_type.is_none());
        assert!(s.route_history.is_empty());
    }

    #[test]
    fn recent_messages_clamps_to_len() {
        let mut s = state();
        s.messages.push(Message::user(0, "hello"));
        assert_eq!(s.recent_messages(12).len(), 1);
        assert_eq!(s.recent_messages(0).len(), 0);
    }

    #[test]
    fn phase_ordering_matches_process() {
        assert!(DesignPhase::Ideation < DesignPhase::Visualization);
        assert!(DesignPhase::Visualization < DesignPhase::Materialization);
        assert_eq!(DesignPhase::Materialization.next(), None);
    }
}
