//! Priority routing: one deterministic decision tree from context package
//! and conversation state to a route and an ordered agent set.
//!
//! Lower priority number wins; the rule order below is final within a tier.
//! GENERIC and CONTROL sessions bypass the tree entirely.

use tracing::debug;

use atelier_classify::has_challenge_request;
use atelier_types::{
    AgentId, ContextPackage, ConversationState, Intent, RouteDecision, RouteType, SessionMode,
    SkillLevel,
};

/// Offloading risk at which a cognitive intervention fires regardless of
/// the classified intent.
const INTERVENTION_RISK: f32 = 0.7;
/// Offloading risk below which beginner scaffolding is considered.
const SCAFFOLD_RISK_CEILING: f32 = 0.3;
/// Phase progress above which balanced guidance steps aside.
const GUIDANCE_PROGRESS_CEILING: f32 = 0.8;

/// Decide the route for one turn.  Deterministic given its inputs; any
/// internal surprise degrades to `balanced_guidance` via [`fallback`].
pub fn decide(
    context: &ContextPackage,
    state: &ConversationState,
    mode: SessionMode,
) -> RouteDecision {
    let decision = match mode {
        SessionMode::Generic => RouteDecision {
            route: RouteType::KnowledgeOnly,
            agents: vec![AgentId::DomainExpert],
            priority: 7,
            rationale: "generic mode answers every turn directly".to_string(),
        },
        SessionMode::Control => RouteDecision {
            route: RouteType::SelfDirection,
            agents: vec![],
            priority: 11,
            rationale: "control mode invokes no agents".to_string(),
        },
        SessionMode::Mentor => mentor_decision(context, state),
    };
    debug!(route = decision.route.as_str(), priority = decision.priority, "route decided");
    decision
}

/// Deterministic fallback used when any part of the turn pipeline errors.
pub fn fallback() -> RouteDecision {
    RouteDecision {
        route: RouteType::BalancedGuidance,
        agents: vec![AgentId::Analysis, AgentId::Socratic],
        priority: 9,
        rationale: "fallback".to_string(),
    }
}

fn mentor_decision(context: &ContextPackage, state: &ConversationState) -> RouteDecision {
    // 1. The opening turn always routes progressively; no other route is legal.
    if context.is_first_turn {
        return RouteDecision {
            route: RouteType::ProgressiveOpening,
            agents: vec![AgentId::Socratic, AgentId::Analysis],
            priority: 1,
            rationale: "first turn opens progressively".to_string(),
        };
    }
    // 2. Topic shift before anything content-driven.
    if context.topic_transition {
        return RouteDecision {
            route: RouteType::TopicTransition,
            agents: vec![AgentId::Socratic, AgentId::Analysis],
            priority: 2,
            rationale: "keyword overlap dropped without a continuation marker".to_string(),
        };
    }
    // 3. Offloading, by intent or by risk score.
    if context.intent == Intent::CognitiveOffloading || context.offloading_risk >= INTERVENTION_RISK {
        return RouteDecision {
            route: RouteType::CognitiveIntervention,
            agents: vec![AgentId::CognitiveEnhancement, AgentId::Analysis],
            priority: 3,
            rationale: format!("offloading risk {:.2}", context.offloading_risk),
        };
    }
    // 4. Overconfidence gets challenged.
    if context.intent == Intent::OverconfidentStatement {
        return RouteDecision {
            route: RouteType::CognitiveChallenge,
            agents: vec![AgentId::CognitiveEnhancement, AgentId::Analysis],
            priority: 4,
            rationale: "overconfident statement".to_string(),
        };
    }
    // 5. Confusion gets clarified, never lectured.
    if context.intent == Intent::ConfusionExpression {
        return RouteDecision {
            route: RouteType::SocraticClarification,
            agents: vec![AgentId::Socratic, AgentId::CognitiveEnhancement],
            priority: 5,
            rationale: "confusion expressed".to_string(),
        };
    }
    // 6. Full assessment for evaluation and feedback requests.
    if matches!(context.intent, Intent::EvaluationRequest | Intent::FeedbackRequest) {
        return RouteDecision {
            route: RouteType::MultiAgentComprehensive,
            agents: vec![AgentId::DomainExpert, AgentId::Analysis, AgentId::Socratic],
            priority: 6,
            rationale: "evaluation or feedback requested".to_string(),
        };
    }
    // 7. Plain knowledge and example requests.
    if matches!(context.intent, Intent::KnowledgeRequest | Intent::ExampleRequest) {
        return RouteDecision {
            route: RouteType::KnowledgeOnly,
            agents: vec![AgentId::DomainExpert],
            priority: 7,
            rationale: "knowledge requested".to_string(),
        };
    }
    // 8. Creative exploration stays socratic.
    if context.intent == Intent::CreativeExploration {
        return RouteDecision {
            route: RouteType::SocraticExploration,
            agents: vec![AgentId::Socratic],
            priority: 8,
            rationale: "creative exploration".to_string(),
        };
    }
    // 9. The broad middle, while the phase still has room to move.
    if matches!(
        context.intent,
        Intent::ImprovementSeeking | Intent::DesignProblem | Intent::GeneralStatement
    ) && state.phase.progress < GUIDANCE_PROGRESS_CEILING
    {
        return RouteDecision {
            route: RouteType::BalancedGuidance,
            agents: vec![AgentId::Analysis, AgentId::Socratic],
            priority: 9,
            rationale: "guidance within current phase".to_string(),
        };
    }
    // 10. Explicit "teach me but make me think".
    if state
        .last_user_text()
        .is_some_and(|t| has_challenge_request(&t.to_lowercase()))
    {
        return RouteDecision {
            route: RouteType::KnowledgeWithChallenge,
            agents: vec![AgentId::DomainExpert, AgentId::Socratic],
            priority: 10,
            rationale: "knowledge with a challenge requested".to_string(),
        };
    }
    // 11. Beginners who are not offloading get structured support.
    if state.student_profile.skill_level == SkillLevel::Beginner
        && context.offloading_risk < SCAFFOLD_RISK_CEILING
    {
        let route = if state.turn_counter < 4 {
            RouteType::FoundationalBuilding
        } else {
            RouteType::SupportiveScaffolding
        };
        return RouteDecision {
            route,
            agents: vec![AgentId::Analysis, AgentId::Socratic],
            priority: 11,
            rationale: "beginner scaffolding".to_string(),
        };
    }

    fallback()
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_types::StudentProfile;

    fn context(intent: Intent) -> ContextPackage {
        ContextPackage {
            intent,
            offloading_risk: 0.1,
            overconfidence: intent == Intent::OverconfidentStatement,
            confusion: intent == Intent::ConfusionExpression,
            is_first_turn: false,
            topic_transition: false,
            keywords: vec![],
            classification_confidence: 0.9,
        }
    }

    fn state(skill: SkillLevel) -> ConversationState {
        ConversationState::new(StudentProfile::new(skill))
    }

    #[test]
    fn first_turn_always_opens_progressively() {
        let mut ctx = context(Intent::CognitiveOffloading);
        ctx.is_first_turn = true;
        ctx.offloading_risk = 0.95;
        let decision = decide(&ctx, &state(SkillLevel::Advanced), SessionMode::Mentor);
        assert_eq!(decision.route, RouteType::ProgressiveOpening);
        assert_eq!(decision.priority, 1);
    }

    #[test]
    fn high_risk_interrupts_any_intent() {
        let mut ctx = context(Intent::KnowledgeRequest);
        ctx.offloading_risk = 0.75;
        let decision = decide(&ctx, &state(SkillLevel::Intermediate), SessionMode::Mentor);
        assert_eq!(decision.route, RouteType::CognitiveIntervention);
        assert!(decision.agents.contains(&AgentId::CognitiveEnhancement));
    }

    #[test]
    fn topic_transition_outranks_intervention() {
        let mut ctx = context(Intent::CognitiveOffloading);
        ctx.topic_transition = true;
        let decision = decide(&ctx, &state(SkillLevel::Intermediate), SessionMode::Mentor);
        assert_eq!(decision.route, RouteType::TopicTransition);
        assert_eq!(decision.priority, 2);
    }

    #[test]
    fn confusion_routes_to_clarification_with_cognitive_support() {
        let decision = decide(
            &context(Intent::ConfusionExpression),
            &state(SkillLevel::Intermediate),
            SessionMode::Mentor,
        );
        assert_eq!(decision.route, RouteType::SocraticClarification);
        assert!(decision.agents.contains(&AgentId::CognitiveEnhancement));
    }

    #[test]
    fn overconfidence_routes_to_challenge() {
        let decision = decide(
            &context(Intent::OverconfidentStatement),
            &state(SkillLevel::Advanced),
            SessionMode::Mentor,
        );
        assert_eq!(decision.route, RouteType::CognitiveChallenge);
    }

    #[test]
    fn knowledge_requests_route_to_domain_only() {
        let decision = decide(
            &context(Intent::KnowledgeRequest),
            &state(SkillLevel::Intermediate),
            SessionMode::Mentor,
        );
        assert_eq!(decision.route, RouteType::KnowledgeOnly);
        assert_eq!(decision.agents, vec![AgentId::DomainExpert]);
    }

    #[test]
    fn evaluation_requests_get_the_full_panel() {
        let decision = decide(
            &context(Intent::EvaluationRequest),
            &state(SkillLevel::Intermediate),
            SessionMode::Mentor,
        );
        assert_eq!(decision.route, RouteType::MultiAgentComprehensive);
        assert_eq!(decision.agents.len(), 3);
    }

    #[test]
    fn improvement_seeking_is_balanced_guidance() {
        let decision = decide(
            &context(Intent::ImprovementSeeking),
            &state(SkillLevel::Intermediate),
            SessionMode::Mentor,
        );
        assert_eq!(decision.route, RouteType::BalancedGuidance);
    }

    #[test]
    fn late_phase_beginner_falls_through_to_scaffolding() {
        let mut s = state(SkillLevel::Beginner);
        s.phase.progress = 0.9;
        let decision = decide(&context(Intent::GeneralStatement), &s, SessionMode::Mentor);
        assert_eq!(decision.route, RouteType::FoundationalBuilding);

        s.turn_counter = 6;
        let decision = decide(&context(Intent::GeneralStatement), &s, SessionMode::Mentor);
        assert_eq!(decision.route, RouteType::SupportiveScaffolding);
    }

    #[test]
    fn generic_mode_always_answers_directly() {
        for intent in [Intent::ConfusionExpression, Intent::CognitiveOffloading, Intent::CreativeExploration] {
            let decision = decide(&context(intent), &state(SkillLevel::Beginner), SessionMode::Generic);
            assert_eq!(decision.route, RouteType::KnowledgeOnly);
        }
    }

    #[test]
    fn control_mode_invokes_no_agents() {
        let decision = decide(
            &context(Intent::EvaluationRequest),
            &state(SkillLevel::Expert),
            SessionMode::Control,
        );
        assert_eq!(decision.route, RouteType::SelfDirection);
        assert!(decision.agents.is_empty());
    }

    #[test]
    fn fallback_is_balanced_guidance() {
        let decision = fallback();
        assert_eq!(decision.route, RouteType::BalancedGuidance);
        assert_eq!(decision.rationale, "fallback");
    }

    #[test]
    fn all_routes_come_from_the_closed_set() {
        // Sweep every intent through the mentor tree; every decision must be
        // a known route with a priority in 1..=11.
        for intent in Intent::ALL {
            let decision = decide(&context(intent), &state(SkillLevel::Intermediate), SessionMode::Mentor);
            assert!((1..=11).contains(&decision.priority));
        }
    }
}
