//! The socratic agent never asserts a final answer: it asks.
//!
//! Strategy follows the turn's intent first, then the current socratic
//! step.  Output is guaranteed to contain at least one question mark; when
//! the LLM fails, a deterministic question bank per strategy takes over.

use serde::{Deserialize, Serialize};
use tracing::warn;

use atelier_llm::{CallerRole, CompletionRequest};
use atelier_types::{AgentId, AgentResult, Intent};

use crate::{readable_building_type, AgentDeps, AgentInput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocraticStrategy {
    Clarifying,
    Challenging,
    Exploratory,
    Foundational,
    Metacognitive,
}

impl SocraticStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SocraticStrategy::Clarifying => "clarifying",
            SocraticStrategy::Challenging => "challenging",
            SocraticStrategy::Exploratory => "exploratory",
            SocraticStrategy::Foundational => "foundational",
            SocraticStrategy::Metacognitive => "metacognitive",
        }
    }
}

/// Intent decides first; otherwise the socratic step carries the cycle.
pub(crate) fn choose_strategy(intent: Intent, step: u8, is_beginner: bool) -> SocraticStrategy {
    match intent {
        Intent::ConfusionExpression => SocraticStrategy::Clarifying,
        Intent::OverconfidentStatement => SocraticStrategy::Challenging,
        Intent::CreativeExploration => SocraticStrategy::Exploratory,
        _ if is_beginner && step <= 2 => SocraticStrategy::Foundational,
        _ => match step {
            1 => SocraticStrategy::Clarifying,
            2 => SocraticStrategy::Challenging,
            3 => SocraticStrategy::Exploratory,
            _ => SocraticStrategy::Metacognitive,
        },
    }
}

/// Deterministic question bank, one per strategy.  `{building}` is replaced
/// with the known building type or a generic noun.
fn fallback_question(strategy: SocraticStrategy, building: &str) -> String {
    match strategy {
        SocraticStrategy::Clarifying => format!(
            "When you picture the {building} at its busiest moment, which space is under the most pressure, and what exactly happens there?"
        ),
        SocraticStrategy::Challenging => format!(
            "If the {building} had to lose a quarter of its floor area tomorrow, which part of your scheme would survive, and why that part?"
        ),
        SocraticStrategy::Exploratory => format!(
            "What other ways could the {building} organize the same program — what happens if you invert the relationship you have now?"
        ),
        SocraticStrategy::Foundational => format!(
            "Before going further: who uses the {building} on an ordinary weekday, and what do they need from it first?"
        ),
        SocraticStrategy::Metacognitive => format!(
            "Looking back over your last few decisions about the {building}, what guided them — and would you trust that instinct again?"
        ),
    }
}

pub async fn run_socratic(input: &AgentInput<'_>, deps: &AgentDeps) -> AgentResult {
    let step = input.snapshot.phase.step;
    let is_beginner = input.snapshot.student_profile.skill_level
        == atelier_types::SkillLevel::Beginner;
    let strategy = choose_strategy(input.context.intent, step, is_beginner);
    let building = readable_building_type(input.snapshot).unwrap_or_else(|| "project".to_string());

    let mut system = format!(
        "You are a socratic design tutor for architecture students. You never give answers, \
         solutions, or recommendations — you ask questions that make the student think. \
         Ask one or two {} questions about their {} design, grounded in what they just said. \
         Current design phase: {}. Keep it under 80 words.",
        strategy.as_str(),
        building,
        input.snapshot.phase.current.as_str(),
    );
    if input.context.is_first_turn && !input.brief.is_empty() {
        system.push_str(&format!(
            " This is the opening exchange; their brief is: {}. Welcome them into the work briefly before asking.",
            input.brief
        ));
    }
    let request = CompletionRequest::new(&deps.model, system)
        .with_user(input.user_text)
        .timeout(deps.timeout);

    let text = match deps.gateway.complete(CallerRole::Socratic, request).await {
        Ok(completion) if completion.text.contains('?') => completion.text.trim().to_string(),
        Ok(completion) => {
            // Post-condition: at least one question.  A statement-only reply
            // gets the bank question appended.
            let mut text = completion.text.trim().to_string();
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(&fallback_question(strategy, &building));
            text
        }
        Err(err) => {
            warn!(error = %err, strategy = strategy.as_str(), "socratic llm failed, using question bank");
            fallback_question(strategy, &building)
        }
    };

    let mut result = AgentResult::text(AgentId::Socratic, text);
    result.flags.push(format!("strategy:{}", strategy.as_str()));
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_overrides_step_for_strategy() {
        assert_eq!(
            choose_strategy(Intent::ConfusionExpression, 3, false),
            SocraticStrategy::Clarifying
        );
        assert_eq!(
            choose_strategy(Intent::OverconfidentStatement, 1, false),
            SocraticStrategy::Challenging
        );
        assert_eq!(
            choose_strategy(Intent::CreativeExploration, 2, false),
            SocraticStrategy::Exploratory
        );
    }

    #[test]
    fn step_drives_the_default_cycle() {
        assert_eq!(choose_strategy(Intent::GeneralStatement, 1, false), SocraticStrategy::Clarifying);
        assert_eq!(choose_strategy(Intent::GeneralStatement, 2, false), SocraticStrategy::Challenging);
        assert_eq!(choose_strategy(Intent::GeneralStatement, 3, false), SocraticStrategy::Exploratory);
        assert_eq!(choose_strategy(Intent::GeneralStatement, 4, false), SocraticStrategy::Metacognitive);
    }

    #[test]
    fn beginners_get_foundational_questions_early() {
        assert_eq!(choose_strategy(Intent::DesignProblem, 1, true), SocraticStrategy::Foundational);
        assert_eq!(choose_strategy(Intent::DesignProblem, 3, true), SocraticStrategy::Exploratory);
    }

    #[test]
    fn fallback_questions_always_ask() {
        for strategy in [
            SocraticStrategy::Clarifying,
            SocraticStrategy::Challenging,
            SocraticStrategy::Exploratory,
            SocraticStrategy::Foundational,
            SocraticStrategy::Metacognitive,
        ] {
            let q = fallback_question(strategy, "community center");
            assert!(q.contains('?'));
            assert!(q.contains("community center"));
        }
    }
}
