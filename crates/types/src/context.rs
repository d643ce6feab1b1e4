use serde::{Deserialize, Serialize};

/// Closed set of user-turn intents recognized by the context classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    KnowledgeRequest,
    ExampleRequest,
    FeedbackRequest,
    EvaluationRequest,
    ImprovementSeeking,
    CreativeExploration,
    DesignProblem,
    ConfusionExpression,
    OverconfidentStatement,
    CognitiveOffloading,
    TopicTransition,
    GeneralStatement,
}

impl Intent {
    pub const ALL: [Intent; 12] = [
        Intent::KnowledgeRequest,
        Intent::ExampleRequest,
        Intent::FeedbackRequest,
        Intent::EvaluationRequest,
        Intent::ImprovementSeeking,
        Intent::CreativeExploration,
        Intent::DesignProblem,
        Intent::ConfusionExpression,
        Intent::OverconfidentStatement,
        Intent::CognitiveOffloading,
        Intent::TopicTransition,
        Intent::GeneralStatement,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::KnowledgeRequest => "knowledge_request",
            Intent::ExampleRequest => "example_request",
            Intent::FeedbackRequest => "feedback_request",
            Intent::EvaluationRequest => "evaluation_request",
            Intent::ImprovementSeeking => "improvement_seeking",
            Intent::CreativeExploration => "creative_exploration",
            Intent::DesignProblem => "design_problem",
            Intent::ConfusionExpression => "confusion_expression",
            Intent::OverconfidentStatement => "overconfident_statement",
            Intent::CognitiveOffloading => "cognitive_offloading",
            Intent::TopicTransition => "topic_transition",
            Intent::GeneralStatement => "general_statement",
        }
    }

    /// Parse the label an LLM classification call returned.  Out-of-vocabulary
    /// labels yield `None` and the caller falls back to `GeneralStatement`.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        Intent::ALL.iter().copied().find(|i| i.as_str() == normalized)
    }
}

/// Per-turn classification output consumed by the router and agents.
/// Ephemeral: recomputed (or cache-restored) every turn, never persisted
/// into conversation state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextPackage {
    pub intent: Intent,
    /// Risk that the student is delegating thinking to the assistant, `[0, 1]`.
    pub offloading_risk: f32,
    pub overconfidence: bool,
    pub confusion: bool,
    pub is_first_turn: bool,
    pub topic_transition: bool,
    pub keywords: Vec<String>,
    pub classification_confidence: f32,
}

impl ContextPackage {
    /// Deterministic fallback when classification fails entirely.
    pub fn fallback(is_first_turn: bool) -> Self {
        Self {
            intent: Intent::GeneralStatement,
            offloading_risk: 0.0,
            overconfidence: false,
            confusion: false,
            is_first_turn,
            topic_transition: false,
            keywords: Vec::new(),
            classification_confidence: 0.3,
        }
    }
}
