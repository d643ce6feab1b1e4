//! Context classifier: turns a raw user message into a [`ContextPackage`].
//!
//! Hybrid design: deterministic pattern rules short-circuit when confident
//! (≥ 0.9); otherwise one LLM call constrained to the closed intent set.
//! Results are cached by hash of (normalized text, phase), so re-classifying
//! an unchanged turn is free and yields an identical package.

mod risk;
mod rules;

pub use risk::offloading_risk;
pub use rules::{has_challenge_request, has_continuation_marker, match_rules};

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use lru::LruCache;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use atelier_knowledge::{jaccard, tokenize};
use atelier_llm::{CallerRole, CompletionRequest, Gateway};
use atelier_types::{ContextPackage, DesignPhase, Intent, Message, Role, StudentProfile};

/// Jaccard overlap below which a turn counts as a topic transition.
const TOPIC_OVERLAP_THRESHOLD: f32 = 0.15;
/// Rule confidence at which the LLM call is skipped.
const SHORTCUT_CONFIDENCE: f32 = 0.9;
/// Confidence assigned to a successful LLM classification.
const LLM_CONFIDENCE: f32 = 0.8;
/// Confidence on the deterministic failure fallback.
const FALLBACK_CONFIDENCE: f32 = 0.3;

/// Everything the classifier sees for one turn.
pub struct ClassifierInput<'a> {
    pub user_text: &'a str,
    /// Most recent messages, oldest first (window size set by config).
    pub recent_messages: &'a [Message],
    pub phase: DesignPhase,
    pub profile: &'a StudentProfile,
    pub turn_counter: u32,
}

pub struct Classifier {
    gateway: Gateway,
    model: String,
    timeout: Duration,
    cache: Mutex<LruCache<String, (Intent, f32)>>,
}

impl Classifier {
    pub fn new(gateway: Gateway, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            gateway,
            model: model.into(),
            timeout,
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(256).expect("nonzero"))),
        }
    }

    /// Classify one turn.  Never fails: LLM trouble degrades to
    /// `general_statement` at confidence 0.3.
    pub async fn classify(&self, input: ClassifierInput<'_>) -> ContextPackage {
        let lower = input.user_text.to_lowercase();
        let normalized = normalize(input.user_text);
        let keywords = extract_keywords(input.user_text);

        let is_first_turn = input.turn_counter == 0;
        let prior_user: Vec<&str> = input
            .recent_messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.text.as_str())
            .collect();
        let offloading = offloading_risk(input.user_text, &prior_user);

        // Continuity is a dialogue property: a turn continues the topic when
        // it overlaps either the assistant's last reply or the student's own
        // previous message.
        let last_assistant = input
            .recent_messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.text.as_str());
        let last_user = input
            .recent_messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.text.as_str());
        let topic_transition = match last_assistant {
            Some(reply) => {
                let overlap = jaccard(input.user_text, reply).max(
                    last_user
                        .map(|prev| jaccard(input.user_text, prev))
                        .unwrap_or(0.0),
                );
                overlap < TOPIC_OVERLAP_THRESHOLD && !has_continuation_marker(&lower)
            }
            None => false,
        };

        let (intent, confidence) = self.resolve_intent(&lower, &normalized, input.phase).await;

        ContextPackage {
            intent,
            offloading_risk: offloading,
            overconfidence: intent == Intent::OverconfidentStatement,
            confusion: intent == Intent::ConfusionExpression,
            is_first_turn,
            topic_transition,
            keywords,
            classification_confidence: confidence,
        }
    }

    /// Rules first, LLM second, deterministic fallback last.
    async fn resolve_intent(&self, lower: &str, normalized: &str, phase: DesignPhase) -> (Intent, f32) {
        let rule_hit = match_rules(lower);
        if let Some((intent, confidence)) = rule_hit {
            if confidence >= SHORTCUT_CONFIDENCE {
                debug!(intent = intent.as_str(), confidence, "rule shortcut");
                return (intent, confidence);
            }
        }

        let key = cache_key(normalized, phase);
        if let Some(hit) = self.cache.lock().expect("classifier cache poisoned").get(&key).copied() {
            return hit;
        }

        let resolved = match self.classify_via_llm(normalized).await {
            Some(intent) => (intent, LLM_CONFIDENCE),
            // A moderate rule hit beats the bare fallback when the LLM path
            // is unavailable.
            None => rule_hit.unwrap_or((Intent::GeneralStatement, FALLBACK_CONFIDENCE)),
        };

        self.cache
            .lock()
            .expect("classifier cache poisoned")
            .put(key, resolved);
        resolved
    }

    async fn classify_via_llm(&self, normalized: &str) -> Option<Intent> {
        let labels = Intent::ALL
            .iter()
            .map(|i| i.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let system = format!(
            "You classify one message from an architecture student into exactly one intent label. \
             Valid labels: {labels}. Respond with the label only, nothing else."
        );
        let mut request = CompletionRequest::new(&self.model, system).with_user(normalized);
        request.max_tokens = 16;
        request.temperature = 0.0;
        request.timeout = self.timeout;

        match self.gateway.complete(CallerRole::Context, request).await {
            Ok(completion) => {
                let label = completion.text.trim().trim_matches(['"', '\'', '.', '`']);
                let parsed = Intent::parse(label);
                if parsed.is_none() {
                    warn!(label, "llm returned out-of-vocabulary intent");
                }
                parsed
            }
            Err(err) => {
                warn!(error = %err, "llm classification failed");
                None
            }
        }
    }
}

/// Lowercase, collapse whitespace, strip trailing punctuation runs.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Topical keywords for overlap tests and the export row.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut keywords: Vec<String> = tokenize(text)
        .into_iter()
        .filter(|t| !rules::STOPWORDS.contains(&t.as_str()))
        .collect();
    keywords.truncate(12);
    keywords
}

fn cache_key(normalized: &str, phase: DesignPhase) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.update(phase.as_str().as_bytes());
    format!("{:x}", hasher.finalize())
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use atelier_llm::{Completion, CompletionBackend, LlmError, TokenBudgets, Usage};
    use atelier_types::SkillLevel;

    /// Backend that always answers with a fixed label and counts calls.
    struct LabelBackend {
        label: &'static str,
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl CompletionBackend for LabelBackend {
        async fn complete(&self, _request: &CompletionRequest) -> Result<Completion, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Completion {
                text: self.label.to_string(),
                usage: Usage { prompt_tokens: 5, completion_tokens: 1 },
            })
        }
    }

    struct DownBackend;

    #[async_trait::async_trait]
    impl CompletionBackend for DownBackend {
        async fn complete(&self, _request: &CompletionRequest) -> Result<Completion, LlmError> {
            Err(LlmError::Transport("down".to_string()))
        }
    }

    fn classifier_with(backend: Arc<dyn CompletionBackend>) -> Classifier {
        let gateway = Gateway::new(backend, TokenBudgets::default(), 32);
        Classifier::new(gateway, "test-model", Duration::from_millis(200))
    }

    fn input<'a>(text: &'a str, messages: &'a [Message], profile: &'a StudentProfile, turn: u32) -> ClassifierInput<'a> {
        ClassifierInput {
            user_text: text,
            recent_messages: messages,
            phase: DesignPhase::Ideation,
            profile,
            turn_counter: turn,
        }
    }

    #[tokio::test]
    async fn confident_rules_skip_the_llm() {
        let backend = Arc::new(LabelBackend { label: "design_problem", calls: AtomicU32::new(0) });
        let classifier = classifier_with(backend.clone());
        let profile = StudentProfile::new(SkillLevel::Beginner);

        let pkg = classifier
            .classify(input("Just give me the answer to the room sizes", &[], &profile, 3))
            .await;
        assert_eq!(pkg.intent, Intent::CognitiveOffloading);
        assert!(pkg.offloading_risk >= 0.7);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn ambiguous_turns_go_to_the_llm_and_cache() {
        let backend = Arc::new(LabelBackend { label: "creative_exploration", calls: AtomicU32::new(0) });
        let classifier = classifier_with(backend.clone());
        let profile = StudentProfile::new(SkillLevel::Intermediate);

        let text = "the roofline keeps bothering me somehow";
        let first = classifier.classify(input(text, &[], &profile, 4)).await;
        let second = classifier.classify(input(text, &[], &profile, 4)).await;

        assert_eq!(first.intent, Intent::CreativeExploration);
        assert_eq!(second.intent, first.intent);
        assert_eq!(second.classification_confidence, first.classification_confidence);
        // Gateway-level caching plus the classifier cache mean one backend call.
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn llm_failure_degrades_to_general_statement() {
        let classifier = classifier_with(Arc::new(DownBackend));
        let profile = StudentProfile::new(SkillLevel::Advanced);

        let pkg = classifier
            .classify(input("the roofline keeps bothering me somehow", &[], &profile, 2))
            .await;
        assert_eq!(pkg.intent, Intent::GeneralStatement);
        assert!((pkg.classification_confidence - 0.3).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn out_of_vocabulary_label_falls_back() {
        let backend = Arc::new(LabelBackend { label: "existential_dread", calls: AtomicU32::new(0) });
        let classifier = classifier_with(backend);
        let profile = StudentProfile::new(SkillLevel::Beginner);

        let pkg = classifier
            .classify(input("the roofline keeps bothering me somehow", &[], &profile, 2))
            .await;
        assert_eq!(pkg.intent, Intent::GeneralStatement);
        assert!((pkg.classification_confidence - 0.3).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn first_turn_flag_follows_the_counter() {
        let classifier = classifier_with(Arc::new(DownBackend));
        let profile = StudentProfile::new(SkillLevel::Beginner);

        let pkg = classifier
            .classify(input("I'm designing a community center for a suburban neighborhood", &[], &profile, 0))
            .await;
        assert!(pkg.is_first_turn);
        assert!(!pkg.topic_transition, "no prior assistant turn to diverge from");
    }

    #[tokio::test]
    async fn low_overlap_without_marker_is_a_topic_transition() {
        let classifier = classifier_with(Arc::new(DownBackend));
        let profile = StudentProfile::new(SkillLevel::Beginner);
        let messages = vec![
            Message::user(0, "how should the entry plaza meet the street"),
            Message::assistant(0, "Consider how the entry plaza negotiates between street and threshold."),
        ];

        let diverging = classifier
            .classify(input("let's discuss structural timber spans now", &messages, &profile, 1))
            .await;
        assert!(diverging.topic_transition);

        let continuing = classifier
            .classify(input("building on that, what about the plaza edge?", &messages, &profile, 1))
            .await;
        assert!(!continuing.topic_transition);
    }

    #[test]
    fn keywords_exclude_stopwords() {
        let keywords = extract_keywords("What are the standard room sizes for the gymnasium?");
        assert!(keywords.iter().any(|k| k == "gymnasium"));
        assert!(!keywords.iter().any(|k| k == "the" || k == "what"));
    }
}
