use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Experimental condition a session runs under.
///
/// The mode is fixed at session creation and never changes; the router and
/// the metrics evaluator both branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionMode {
    /// Full scaffolding: the complete routing tree and all four agents.
    Mentor,
    /// Direct assistance: every turn answered as a plain knowledge request.
    Generic,
    /// No assistance: templated self-direction prompts, no agent calls.
    Control,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::Mentor => "MENTOR",
            SessionMode::Generic => "GENERIC",
            SessionMode::Control => "CONTROL",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "MENTOR" => Some(SessionMode::Mentor),
            "GENERIC" => Some(SessionMode::Generic),
            "CONTROL" => Some(SessionMode::Control),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillLevel {
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

impl SkillLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkillLevel::Beginner => "beginner",
            SkillLevel::Intermediate => "intermediate",
            SkillLevel::Advanced => "advanced",
            SkillLevel::Expert => "expert",
        }
    }

    /// Ordinal used by the learning-progression metric (beginner = 0).
    pub fn rank(&self) -> i32 {
        match self {
            SkillLevel::Beginner => 0,
            SkillLevel::Intermediate => 1,
            SkillLevel::Advanced => 2,
            SkillLevel::Expert => 3,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "beginner" => Some(SkillLevel::Beginner),
            "intermediate" => Some(SkillLevel::Intermediate),
            "advanced" => Some(SkillLevel::Advanced),
            "expert" => Some(SkillLevel::Expert),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    Uncertain,
    Confident,
    Overconfident,
}

/// Rolling assessment of the student maintained across turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub skill_level: SkillLevel,
    pub confidence: ConfidenceLevel,
    /// Engagement estimate in `[0, 1]`.
    pub engagement: f32,
}

impl StudentProfile {
    pub fn new(skill_level: SkillLevel) -> Self {
        Self {
            skill_level,
            confidence: ConfidenceLevel::Confident,
            engagement: 0.5,
        }
    }
}

/// One tutoring session under a fixed experimental condition.
///
/// Immutable after creation except `ended_at`, which is set exactly once
/// when the harness signals completion or timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub participant_id: String,
    pub mode: SessionMode,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub skill_level: SkillLevel,
    /// The design brief the student is working against.
    pub brief: String,
}

impl Session {
    pub fn new(
        mode: SessionMode,
        participant_id: impl Into<String>,
        skill_level: SkillLevel,
        brief: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            participant_id: participant_id.into(),
            mode,
            created_at: Utc::now(),
            ended_at: None,
            skill_level,
            brief: brief.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parse_is_case_insensitive() {
        assert_eq!(SessionMode::parse("mentor"), Some(SessionMode::Mentor));
        assert_eq!(SessionMode::parse("GENERIC"), Some(SessionMode::Generic));
        assert_eq!(SessionMode::parse("Control"), Some(SessionMode::Control));
        assert_eq!(SessionMode::parse("placebo"), None);
    }

    #[test]
    fn skill_rank_is_monotonic() {
        assert!(SkillLevel::Beginner.rank() < SkillLevel::Intermediate.rank());
        assert!(SkillLevel::Advanced.rank() < SkillLevel::Expert.rank());
    }

    #[test]
    fn session_starts_open() {
        let session = Session::new(SessionMode::Mentor, "p01", SkillLevel::Beginner, "a library");
        assert!(session.ended_at.is_none());
        assert_eq!(session.mode, SessionMode::Mentor);
    }
}
