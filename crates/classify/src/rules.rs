//! Deterministic intent patterns.  These short-circuit the classifier when
//! a match is confident enough, keeping most turns off the LLM entirely.

use atelier_types::Intent;

/// A pattern row: any phrase hit assigns the intent at the given confidence.
pub struct IntentRule {
    pub intent: Intent,
    pub phrases: &'static [&'static str],
    pub confidence: f32,
}

/// Ordered by specificity; the first confident hit wins, later rows act as
/// weaker evidence for the LLM path.
pub const INTENT_RULES: &[IntentRule] = &[
    IntentRule {
        intent: Intent::CognitiveOffloading,
        phrases: &[
            "just tell me",
            "just give me",
            "give me the answer",
            "tell me exactly what",
            "do it for me",
            "solve it for me",
            "tell me the answer",
            "what's the answer",
        ],
        confidence: 0.95,
    },
    IntentRule {
        intent: Intent::OverconfidentStatement,
        phrases: &[
            "my design is perfect",
            "needs no changes",
            "nothing to improve",
            "no changes needed",
            "i already know all",
            "definitely the best",
            "couldn't be better",
            "is flawless",
        ],
        confidence: 0.92,
    },
    IntentRule {
        intent: Intent::ConfusionExpression,
        phrases: &[
            "i'm stuck",
            "i am stuck",
            "completely stuck",
            "i'm confused",
            "i am confused",
            "i don't understand",
            "i do not understand",
            "makes no sense to me",
            "i'm lost",
            "i am lost",
            "no idea how",
        ],
        confidence: 0.92,
    },
    IntentRule {
        intent: Intent::ExampleRequest,
        phrases: &[
            "an example",
            "some examples",
            "precedent",
            "case study",
            "case studies",
            "show me a",
            "reference project",
        ],
        confidence: 0.9,
    },
    IntentRule {
        intent: Intent::EvaluationRequest,
        phrases: &[
            "evaluate my",
            "critique my",
            "assess my",
            "is this good",
            "is my design good",
            "rate my",
        ],
        confidence: 0.9,
    },
    IntentRule {
        intent: Intent::FeedbackRequest,
        phrases: &[
            "feedback",
            "what do you think",
            "thoughts on",
            "review my",
            "your opinion",
        ],
        confidence: 0.9,
    },
    IntentRule {
        intent: Intent::ImprovementSeeking,
        phrases: &[
            "how can i improve",
            "how do i improve",
            "make it better",
            "how could this be better",
            "strengthen my",
        ],
        confidence: 0.9,
    },
    IntentRule {
        intent: Intent::CreativeExploration,
        phrases: &[
            "what if",
            "imagine if",
            "could we try",
            "brainstorm",
            "explore the idea",
            "play with the idea",
        ],
        confidence: 0.9,
    },
    IntentRule {
        intent: Intent::KnowledgeRequest,
        phrases: &[
            "what are the standard",
            "what are standard",
            "what is the standard",
            "what are the requirements",
            "what are typical",
            "building code",
            "minimum dimensions",
            "how many square",
            "what is the typical",
        ],
        confidence: 0.9,
    },
    // Weak evidence rows: never short-circuit, but bias the fallback.
    IntentRule {
        intent: Intent::DesignProblem,
        phrases: &[
            "i'm designing",
            "i am designing",
            "my design",
            "trying to organize",
            "how to organize",
            "the layout",
            "my site",
            "floor plan",
        ],
        confidence: 0.7,
    },
    IntentRule {
        intent: Intent::KnowledgeRequest,
        phrases: &["what is", "what are", "how much", "how many", "tell me about"],
        confidence: 0.6,
    },
];

/// Stopwords excluded from keyword extraction.
pub const STOPWORDS: &[&str] = &[
    "the", "and", "for", "that", "this", "with", "have", "are", "was", "you",
    "not", "but", "can", "could", "should", "would", "about", "what", "how",
    "there", "here", "from", "your", "our", "its", "it's", "i'm", "into",
    "just", "like", "some", "them", "then", "than", "when", "where", "which",
    "will", "been", "being", "does", "doing", "did", "has", "had", "were",
];

/// Markers that suppress a topic-transition reading even with low overlap.
pub const CONTINUATION_MARKERS: &[&str] = &[
    "also",
    "and another",
    "what about",
    "as you said",
    "as you mentioned",
    "building on",
    "continuing",
    "back to",
    "speaking of",
    "following up",
];

/// "Teach me but make me think" markers for the knowledge-with-challenge route.
pub const CHALLENGE_REQUEST_MARKERS: &[&str] = &[
    "but make me think",
    "don't just tell me",
    "help me figure it out",
    "teach me, don't tell me",
    "quiz me",
];

/// Best rule match for the lowercased text, if any phrase hits.
pub fn match_rules(lower_text: &str) -> Option<(Intent, f32)> {
    INTENT_RULES
        .iter()
        .filter(|rule| rule.phrases.iter().any(|p| lower_text.contains(p)))
        .map(|rule| (rule.intent, rule.confidence))
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
}

pub fn has_continuation_marker(lower_text: &str) -> bool {
    CONTINUATION_MARKERS.iter().any(|m| lower_text.contains(m))
}

pub fn has_challenge_request(lower_text: &str) -> bool {
    CHALLENGE_REQUEST_MARKERS.iter().any(|m| lower_text.contains(m))
}
