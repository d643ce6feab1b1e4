//! Cognitive enhancement: interventions that hand the thinking back.
//!
//! Never reveals a solution.  Three intervention shapes: redirection
//! (return the question to the student), constraint injection (add a
//! requirement they must satisfy first), perspective shift (move them to a
//! different viewpoint).

use serde::{Deserialize, Serialize};
use tracing::warn;

use atelier_llm::{CallerRole, CompletionRequest};
use atelier_types::{AgentId, AgentResult, Intent};

use crate::{readable_building_type, AgentDeps, AgentInput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intervention {
    Redirection,
    ConstraintInjection,
    PerspectiveShift,
}

impl Intervention {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intervention::Redirection => "redirection",
            Intervention::ConstraintInjection => "constraint_injection",
            Intervention::PerspectiveShift => "perspective_shift",
        }
    }
}

/// Offloading gets the question handed back; overconfidence gets a
/// constraint to defend against; everything else gets a new viewpoint.
pub(crate) fn choose_intervention(intent: Intent, offloading_risk: f32) -> Intervention {
    if intent == Intent::CognitiveOffloading || offloading_risk >= 0.7 {
        Intervention::Redirection
    } else if intent == Intent::OverconfidentStatement {
        Intervention::ConstraintInjection
    } else {
        Intervention::PerspectiveShift
    }
}

fn fallback_text(intervention: Intervention, building: &str) -> String {
    match intervention {
        Intervention::Redirection => format!(
            "That one is yours to work out — and you are closer than you think. \
             What would YOUR first answer be, and what evidence from your {building} scheme backs it up?"
        ),
        Intervention::ConstraintInjection => format!(
            "Before we call it done: suppose the budget drops 30% and the {building} must still open on time. \
             Which part of your design absorbs that, and what does the answer tell you about its weak points?"
        ),
        Intervention::PerspectiveShift => format!(
            "Step out of the architect's chair for a moment. Walk into your {building} as a first-time visitor \
             who is late and a little lost — what do they see, and where does your plan let them down?"
        ),
    }
}

pub async fn run_cognitive(input: &AgentInput<'_>, deps: &AgentDeps) -> AgentResult {
    let intervention = choose_intervention(input.context.intent, input.context.offloading_risk);
    let building = readable_building_type(input.snapshot).unwrap_or_else(|| "project".to_string());

    let shape = match intervention {
        Intervention::Redirection => {
            "Return their question to them: acknowledge it, then ask what their own answer \
             would be and what supports it. Do NOT answer the question yourself."
        }
        Intervention::ConstraintInjection => {
            "Introduce one concrete new constraint (budget, site, regulation, or user) they \
             must satisfy, framed as a challenge to their current claim. Do NOT solve it."
        }
        Intervention::PerspectiveShift => {
            "Move them into a different stakeholder's viewpoint and ask what that person \
             would notice. Do NOT provide the observations yourself."
        }
    };
    let system = format!(
        "You are a cognitive coach for an architecture student designing a {building}. \
         {shape} Under 70 words, end with a question."
    );
    let request = CompletionRequest::new(&deps.model, system)
        .with_user(input.user_text)
        .timeout(deps.timeout);

    let text = match deps.gateway.complete(CallerRole::Cognitive, request).await {
        Ok(completion) if completion.text.contains('?') => completion.text.trim().to_string(),
        Ok(_) | Err(_) => {
            warn!(intervention = intervention.as_str(), "cognitive llm unusable, using template");
            fallback_text(intervention, &building)
        }
    };

    let mut result = AgentResult::text(AgentId::CognitiveEnhancement, text);
    result.flags.push(format!("intervention:{}", intervention.as_str()));
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offloading_gets_redirection() {
        assert_eq!(
            choose_intervention(Intent::CognitiveOffloading, 0.2),
            Intervention::Redirection
        );
        // High risk alone is enough, whatever the intent label.
        assert_eq!(
            choose_intervention(Intent::GeneralStatement, 0.8),
            Intervention::Redirection
        );
    }

    #[test]
    fn overconfidence_gets_a_constraint() {
        assert_eq!(
            choose_intervention(Intent::OverconfidentStatement, 0.1),
            Intervention::ConstraintInjection
        );
    }

    #[test]
    fn default_is_a_perspective_shift() {
        assert_eq!(
            choose_intervention(Intent::ConfusionExpression, 0.1),
            Intervention::PerspectiveShift
        );
    }

    #[test]
    fn templates_end_with_a_question_and_no_answer() {
        for intervention in [
            Intervention::Redirection,
            Intervention::ConstraintInjection,
            Intervention::PerspectiveShift,
        ] {
            let text = fallback_text(intervention, "library");
            assert!(text.contains('?'));
            assert!(text.contains("library"));
        }
    }
}
