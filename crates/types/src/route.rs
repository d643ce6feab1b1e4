use serde::{Deserialize, Serialize};

use crate::agent::AgentId;

/// The pedagogical policy selected for a turn.  Closed set; the router's
/// priority table is the only producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteType {
    ProgressiveOpening,
    TopicTransition,
    CognitiveIntervention,
    CognitiveChallenge,
    SocraticClarification,
    MultiAgentComprehensive,
    KnowledgeOnly,
    SocraticExploration,
    BalancedGuidance,
    KnowledgeWithChallenge,
    SupportiveScaffolding,
    FoundationalBuilding,
    /// CONTROL-mode route: no agents, templated self-direction prompt.
    SelfDirection,
}

impl RouteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteType::ProgressiveOpening => "progressive_opening",
            RouteType::TopicTransition => "topic_transition",
            RouteType::CognitiveIntervention => "cognitive_intervention",
            RouteType::CognitiveChallenge => "cognitive_challenge",
            RouteType::SocraticClarification => "socratic_clarification",
            RouteType::MultiAgentComprehensive => "multi_agent_comprehensive",
            RouteType::KnowledgeOnly => "knowledge_only",
            RouteType::SocraticExploration => "socratic_exploration",
            RouteType::BalancedGuidance => "balanced_guidance",
            RouteType::KnowledgeWithChallenge => "knowledge_with_challenge",
            RouteType::SupportiveScaffolding => "supportive_scaffolding",
            RouteType::FoundationalBuilding => "foundational_building",
            RouteType::SelfDirection => "self_direction",
        }
    }

    /// Whether the synthesized reply is allowed to state a direct answer.
    pub fn permits_direct_answer(&self) -> bool {
        matches!(
            self,
            RouteType::KnowledgeOnly
                | RouteType::KnowledgeWithChallenge
                | RouteType::MultiAgentComprehensive
                | RouteType::BalancedGuidance
                | RouteType::SupportiveScaffolding
                | RouteType::FoundationalBuilding
        )
    }
}

/// The router's per-turn output: which route won, which agents run, and in
/// what order.  Ephemeral.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDecision {
    pub route: RouteType,
    /// Agents to invoke, in invocation order.  Empty for `SelfDirection`.
    pub agents: Vec<AgentId>,
    /// Priority tier that fired (1 = highest).
    pub priority: u8,
    pub rationale: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_labels_are_snake_case() {
        assert_eq!(RouteType::ProgressiveOpening.as_str(), "progressive_opening");
        assert_eq!(
            serde_json::to_string(&RouteType::MultiAgentComprehensive).unwrap(),
            "\"multi_agent_comprehensive\""
        );
    }

    #[test]
    fn socratic_routes_never_permit_direct_answers() {
        assert!(!RouteType::SocraticExploration.permits_direct_answer());
        assert!(!RouteType::SocraticClarification.permits_direct_answer());
        assert!(!RouteType::CognitiveIntervention.permits_direct_answer());
        assert!(!RouteType::CognitiveChallenge.permits_direct_answer());
        assert!(RouteType::KnowledgeOnly.permits_direct_answer());
    }
}
