//! Analysis agent: assessment artifacts, not conversation.
//!
//! Computes the deterministic signals (skill evidence, engagement, phase
//! evidence, move candidates) directly from the snapshot, then asks the LLM
//! only for the student-facing insight narrative.  Everything it learns
//! flows back through `metrics_delta`; the state store applies it.

use tracing::warn;

use atelier_linkography::extract_moves;
use atelier_llm::{CallerRole, CompletionRequest};
use atelier_types::{
    AgentId, AgentResult, DesignPhase, MetricsDelta, MoveModality, MoveSeed, MoveSource,
    Role, SkillLevel,
};

use crate::{readable_building_type, AgentDeps, AgentInput};

/// Recent user messages considered for skill evidence.
const SKILL_WINDOW: usize = 6;
/// Mean tokens per message above which an upgrade is considered.
const UPGRADE_TOKEN_MEAN: f32 = 45.0;
/// Reasoning-marker rate above which an upgrade is considered.
const UPGRADE_REASONING_RATE: f32 = 0.5;

const REASONING_MARKERS: &[&str] = &[
    "because", "so that", "which means", "trade-off", "tradeoff", "on the other hand",
    "the consequence", "this implies",
];

/// One-level skill adjustment from recent elaboration and reasoning density.
/// Deliberately conservative: never jumps levels, never drops below beginner.
pub(crate) fn assess_skill(current: SkillLevel, recent_user_texts: &[&str]) -> Option<SkillLevel> {
    if recent_user_texts.len() < 3 {
        return None;
    }
    let mean_tokens = recent_user_texts
        .iter()
        .map(|t| t.split_whitespace().count())
        .sum::<usize>() as f32
        / recent_user_texts.len() as f32;
    let reasoning_rate = recent_user_texts
        .iter()
        .filter(|t| {
            let lower = t.to_lowercase();
            REASONING_MARKERS.iter().any(|m| lower.contains(m))
        })
        .count() as f32
        / recent_user_texts.len() as f32;

    if mean_tokens >= UPGRADE_TOKEN_MEAN && reasoning_rate >= UPGRADE_REASONING_RATE {
        match current {
            SkillLevel::Beginner => Some(SkillLevel::Intermediate),
            SkillLevel::Intermediate => Some(SkillLevel::Advanced),
            SkillLevel::Advanced => Some(SkillLevel::Expert),
            SkillLevel::Expert => None,
        }
    } else if mean_tokens < 8.0 && recent_user_texts.len() >= 4 {
        match current {
            SkillLevel::Expert => Some(SkillLevel::Advanced),
            SkillLevel::Advanced => Some(SkillLevel::Intermediate),
            SkillLevel::Intermediate => Some(SkillLevel::Beginner),
            SkillLevel::Beginner => None,
        }
    } else {
        None
    }
}

/// Engagement from the current message alone; the store smooths over turns.
pub(crate) fn engagement_signal(user_text: &str) -> f32 {
    let tokens = user_text.split_whitespace().count() as f32;
    let length_component = (tokens / 60.0).min(1.0);
    let asking = if user_text.contains('?') { 1.0 } else { 0.0 };
    (0.7 * length_component + 0.3 * asking).clamp(0.0, 1.0)
}

pub async fn run_analysis(input: &AgentInput<'_>, deps: &AgentDeps) -> AgentResult {
    let recent: Vec<&str> = input
        .snapshot
        .messages
        .iter()
        .rev()
        .filter(|m| m.role == Role::User)
        .take(SKILL_WINDOW)
        .map(|m| m.text.as_str())
        .collect();

    let mut delta = MetricsDelta {
        skill_update: assess_skill(input.snapshot.student_profile.skill_level, &recent),
        engagement_signal: Some(engagement_signal(input.user_text)),
        ..Default::default()
    };

    // Candidate moves from the raw turn, before the full extractor runs.
    delta.move_candidates = extract_moves(input.user_text, MoveSource::User, MoveModality::Text)
        .into_iter()
        .map(|draft| MoveSeed {
            content: draft.content,
            move_type: draft.move_type,
            focus: draft.focus,
        })
        .collect();

    let lower = input.user_text.to_lowercase();
    if lower.contains("plan") || lower.contains("section") || lower.contains("sketch") {
        delta
            .phase_evidence
            .push((DesignPhase::Visualization, "drawing vocabulary in user turn".to_string()));
    }
    if lower.contains("material") || lower.contains("detail") || lower.contains("construction") {
        delta
            .phase_evidence
            .push((DesignPhase::Materialization, "material vocabulary in user turn".to_string()));
    }

    let building = readable_building_type(input.snapshot).unwrap_or_else(|| "project".to_string());
    let system = format!(
        "You are reviewing one message from an architecture student working on a {building}. \
         In one or two sentences, name the strongest design thinking in it and the one thing \
         they are not yet seeing. No questions, no pleasantries.",
    );
    let request = CompletionRequest::new(&deps.model, system)
        .with_user(input.user_text)
        .timeout(deps.timeout);

    let (insight, watch) = match deps.gateway.complete(CallerRole::Analysis, request).await {
        Ok(completion) => split_insight(completion.text.trim()),
        Err(err) => {
            warn!(error = %err, "analysis narrative failed, using deterministic summary");
            deterministic_summary(&delta, &building)
        }
    };

    let mut result = AgentResult::text(AgentId::Analysis, insight);
    result.metrics_delta = delta;
    result.suggested_followups = vec![watch];
    result
}

/// First sentence is the insight; the rest (if any) is the caution.
fn split_insight(text: &str) -> (String, String) {
    match text.split_once(". ") {
        Some((first, rest)) if !rest.trim().is_empty() => {
            (format!("{first}."), rest.trim().to_string())
        }
        _ => (
            text.to_string(),
            "Keep testing that reasoning against the site.".to_string(),
        ),
    }
}

fn deterministic_summary(delta: &MetricsDelta, building: &str) -> (String, String) {
    let insight = match delta.move_candidates.first() {
        Some(seed) => format!(
            "Your strongest step here is a {} move about {} — that is the thread worth pulling on for the {building}.",
            seed.move_type.as_str(),
            seed.focus.as_str(),
        ),
        None => format!("You are circling the {building} without committing to a position yet."),
    };
    let watch = if delta.move_candidates.len() <= 1 {
        "Watch that single-track focus: one idea is carrying the whole scheme.".to_string()
    } else {
        "Watch the connections between these ideas; they are still separate threads.".to_string()
    };
    (insight, watch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elaborate_reasoned_messages_suggest_an_upgrade() {
        let long = "The massing steps down toward the park because the neighboring houses \
             are low, which means the section opens west for afternoon light while the street \
             side stays closed, and the trade-off is losing the north terrace we wanted for the cafe";
        let recent = [long, long, long];
        assert_eq!(
            assess_skill(SkillLevel::Beginner, &recent),
            Some(SkillLevel::Intermediate)
        );
        assert_eq!(assess_skill(SkillLevel::Expert, &recent), None);
    }

    #[test]
    fn terse_history_suggests_a_downgrade() {
        let recent = ["ok", "sure", "fine", "yes"];
        assert_eq!(
            assess_skill(SkillLevel::Advanced, &recent),
            Some(SkillLevel::Intermediate)
        );
        assert_eq!(assess_skill(SkillLevel::Beginner, &recent), None);
    }

    #[test]
    fn thin_history_is_no_evidence() {
        assert_eq!(assess_skill(SkillLevel::Beginner, &["one", "two"]), None);
    }

    #[test]
    fn engagement_rises_with_length_and_questions() {
        let terse = engagement_signal("ok");
        let engaged = engagement_signal(
            "I reworked the entry after our last exchange — does the double-height \
             lobby still make sense if the ramp takes over the south wall?",
        );
        assert!(engaged > terse);
        assert!((0.0..=1.0).contains(&engaged));
    }

    #[test]
    fn split_insight_separates_sentences() {
        let (insight, watch) = split_insight("Strong spatial reasoning. The structure is unexamined.");
        assert_eq!(insight, "Strong spatial reasoning.");
        assert_eq!(watch, "The structure is unexamined.");

        let (_, default_watch) = split_insight("Only one sentence here");
        assert!(!default_watch.is_empty());
    }
}
