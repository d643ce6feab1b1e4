use serde::{Deserialize, Serialize};

use crate::conversation::DesignPhase;
use crate::moves::{MoveFocus, MoveType};
use crate::session::SkillLevel;

/// Tagged identifier for the specialist agents.  Dispatch goes through a
/// table keyed by this enum rather than trait-object inheritance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentId {
    Socratic,
    DomainExpert,
    CognitiveEnhancement,
    Analysis,
}

impl AgentId {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentId::Socratic => "socratic",
            AgentId::DomainExpert => "domain_expert",
            AgentId::CognitiveEnhancement => "cognitive_enhancement",
            AgentId::Analysis => "analysis",
        }
    }
}

/// A source reference attached to an agent's answer.  Shared by reference
/// across results within a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub source: String,
    pub snippet: String,
    pub score: f32,
}

/// A move the analysis agent proposes before full extraction runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveSeed {
    pub content: String,
    pub move_type: MoveType,
    pub focus: MoveFocus,
}

/// Assessment signals an agent writes back toward session state.  The state
/// store applies deltas; agents never hold a pointer into state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsDelta {
    /// Proposed skill-level update, if the agent saw enough evidence.
    pub skill_update: Option<SkillLevel>,
    /// Engagement signal in `[0, 1]`, blended into the rolling profile.
    pub engagement_signal: Option<f32>,
    /// Evidence snippets supporting a phase advance.
    pub phase_evidence: Vec<(DesignPhase, String)>,
    /// Candidate moves spotted during analysis.
    pub move_candidates: Vec<MoveSeed>,
}

impl MetricsDelta {
    pub fn is_empty(&self) -> bool {
        self.skill_update.is_none()
            && self.engagement_signal.is_none()
            && self.phase_evidence.is_empty()
            && self.move_candidates.is_empty()
    }
}

/// What one agent produced for the current turn.  Ephemeral; the synthesizer
/// merges an ordered list of these into the assistant reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent_id: AgentId,
    pub response_text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
    /// Free-form marker flags, e.g. `"synthesized"` when the domain expert
    /// fell back to generation instead of retrieval.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
    #[serde(default, skip_serializing_if = "MetricsDelta::is_empty")]
    pub metrics_delta: MetricsDelta,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggested_followups: Vec<String>,
}

impl AgentResult {
    pub fn text(agent_id: AgentId, response_text: impl Into<String>) -> Self {
        Self {
            agent_id,
            response_text: response_text.into(),
            citations: Vec::new(),
            flags: Vec::new(),
            metrics_delta: MetricsDelta::default(),
            suggested_followups: Vec::new(),
        }
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_delta_is_empty() {
        assert!(MetricsDelta::default().is_empty());
        let delta = MetricsDelta { engagement_signal: Some(0.4), ..Default::default() };
        assert!(!delta.is_empty());
    }

    #[test]
    fn text_result_carries_no_extras() {
        let result = AgentResult::text(AgentId::Socratic, "What drives the plan?");
        assert!(result.citations.is_empty());
        assert!(!result.has_flag("synthesized"));
    }
}
