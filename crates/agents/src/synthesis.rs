//! Response synthesis: merge ordered agent results into one reply, under
//! the per-route format contracts.
//!
//! Contracts enforced here rather than trusted from the agents: direct
//! routes carry no questions, socratic routes always ask, guidance routes
//! keep their three labeled segments, and everything respects the global
//! word cap with duplicate sentences (Jaccard ≥ threshold) removed.

use atelier_knowledge::jaccard;
use atelier_types::{AgentId, AgentResult, DesignPhase, RouteType};

#[derive(Debug, Clone, Copy)]
pub struct SynthesisPolicy {
    pub max_words: usize,
    pub dedup_jaccard: f32,
}

impl Default for SynthesisPolicy {
    fn default() -> Self {
        Self { max_words: 350, dedup_jaccard: 0.8 }
    }
}

/// Merge agent results for `route` into the assistant reply.
pub fn synthesize(route: RouteType, results: &[AgentResult], policy: &SynthesisPolicy) -> String {
    let text = match route {
        RouteType::KnowledgeOnly => knowledge_only(results),
        RouteType::BalancedGuidance
        | RouteType::SupportiveScaffolding
        | RouteType::FoundationalBuilding => labeled_guidance(results),
        RouteType::SocraticExploration
        | RouteType::SocraticClarification
        | RouteType::ProgressiveOpening => socratic_only(results),
        RouteType::TopicTransition => {
            format!("New direction, noted — let's give it the same rigor.\n\n{}", socratic_only(results))
        }
        RouteType::CognitiveIntervention | RouteType::CognitiveChallenge => cognitive_only(results),
        RouteType::MultiAgentComprehensive => comprehensive(results),
        RouteType::KnowledgeWithChallenge => {
            let knowledge = knowledge_only(results);
            let question = first_question(results)
                .unwrap_or_else(|| "Now, which part of that answer does your scheme already contradict?".to_string());
            format!("{knowledge}\n\n{question}")
        }
        RouteType::SelfDirection => self_direction_text(DesignPhase::Ideation),
    };

    let deduped = dedup_sentences(&text, policy.dedup_jaccard);
    let requires_question = !route.permits_direct_answer() && route != RouteType::SelfDirection;
    cap_words(&deduped, policy.max_words, requires_question)
}

/// Templated CONTROL-mode prompt; no agent output involved.
pub fn self_direction_text(phase: DesignPhase) -> String {
    let stage_hint = match phase {
        DesignPhase::Ideation => "your core concept and what the building wants to be",
        DesignPhase::Visualization => "how the scheme takes shape in plan and section",
        DesignPhase::Materialization => "how the design gets built, in material and detail",
    };
    format!(
        "Noted. Continue working through {stage_hint} on your own terms, \
         and write down your reasoning as you go. When you are ready, describe \
         what you decided and why."
    )
}

fn by_agent(results: &[AgentResult], id: AgentId) -> Option<&AgentResult> {
    results.iter().find(|r| r.agent_id == id)
}

/// Direct answer: up to three paragraphs, citations appended, questions
/// removed.
fn knowledge_only(results: &[AgentResult]) -> String {
    let Some(domain) = by_agent(results, AgentId::DomainExpert) else {
        return "I don't have solid source material for that yet.".to_string();
    };
    let mut paragraphs: Vec<String> = domain
        .response_text
        .split("\n\n")
        .take(3)
        .map(|p| strip_questions(p))
        .filter(|p| !p.is_empty())
        .collect();
    if paragraphs.is_empty() {
        paragraphs.push(strip_questions(&domain.response_text));
    }
    let mut text = paragraphs.join("\n\n");

    if !domain.citations.is_empty() {
        let sources: Vec<String> = domain
            .citations
            .iter()
            .enumerate()
            .map(|(i, c)| format!("[{}] {}", i + 1, c.source))
            .collect();
        text.push_str("\n\nSources: ");
        text.push_str(&sources.join(", "));
    }
    text
}

/// Three labeled segments, each clipped to two sentences.
fn labeled_guidance(results: &[AgentResult]) -> String {
    let analysis = by_agent(results, AgentId::Analysis);
    let insight = analysis
        .map(|a| a.response_text.clone())
        .unwrap_or_else(|| "You are making a real design argument here.".to_string());
    let watch = analysis
        .and_then(|a| a.suggested_followups.first().cloned())
        .unwrap_or_else(|| "Keep an eye on the assumptions underneath it.".to_string());
    let direction = first_question(results)
        .unwrap_or_else(|| "What would you test first to find out?".to_string());

    format!(
        "Insight: {}\nWatch: {}\nDirection: {}",
        clip_sentences(&insight, 2),
        clip_sentences(&watch, 2),
        clip_sentences(&direction, 2),
    )
}

fn socratic_only(results: &[AgentResult]) -> String {
    let text = by_agent(results, AgentId::Socratic)
        .map(|r| r.response_text.clone())
        .unwrap_or_default();
    ensure_question(text)
}

fn cognitive_only(results: &[AgentResult]) -> String {
    let text = by_agent(results, AgentId::CognitiveEnhancement)
        .map(|r| r.response_text.clone())
        .unwrap_or_default();
    ensure_question(text)
}

/// Knowledge segment, critique segment, then a next-step question.
fn comprehensive(results: &[AgentResult]) -> String {
    let mut segments = Vec::new();
    if by_agent(results, AgentId::DomainExpert).is_some() {
        segments.push(knowledge_only(results));
    }
    if let Some(analysis) = by_agent(results, AgentId::Analysis) {
        let mut critique = analysis.response_text.clone();
        if let Some(watch) = analysis.suggested_followups.first() {
            critique.push(' ');
            critique.push_str(watch);
        }
        segments.push(critique);
    }
    let question = first_question(results)
        .unwrap_or_else(|| "Which of these points changes your next move?".to_string());
    segments.push(question);
    segments.join("\n\n")
}

/// The first question sentence any agent produced, socratic agents first.
fn first_question(results: &[AgentResult]) -> Option<String> {
    let ordered = [AgentId::Socratic, AgentId::CognitiveEnhancement, AgentId::Analysis, AgentId::DomainExpert];
    for id in ordered {
        if let Some(result) = by_agent(results, id) {
            for sentence in split_sentences(&result.response_text) {
                if sentence.ends_with('?') {
                    return Some(sentence);
                }
            }
        }
    }
    None
}

fn ensure_question(text: String) -> String {
    if text.contains('?') {
        text
    } else if text.is_empty() {
        "Where do you want to push the design next?".to_string()
    } else {
        format!("{text} Where do you want to push the design next?")
    }
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }
            current.clear();
        }
    }
    let tail = current.trim();
    if !tail.is_empty() {
        out.push(tail.to_string());
    }
    out
}

fn strip_questions(text: &str) -> String {
    split_sentences(text)
        .into_iter()
        .filter(|s| !s.ends_with('?'))
        .collect::<Vec<_>>()
        .join(" ")
}

fn clip_sentences(text: &str, max: usize) -> String {
    split_sentences(text).into_iter().take(max).collect::<Vec<_>>().join(" ")
}

/// Drop any sentence near-identical (Jaccard ≥ threshold) to an earlier one.
/// Newlines between retained sentences are preserved.
fn dedup_sentences(text: &str, threshold: f32) -> String {
    let mut kept: Vec<String> = Vec::new();
    let mut out_lines: Vec<String> = Vec::new();
    for line in text.split('\n') {
        let mut line_sentences = Vec::new();
        for sentence in split_sentences(line) {
            let duplicate = kept.iter().any(|k| jaccard(k, &sentence) >= threshold);
            if !duplicate {
                kept.push(sentence.clone());
                line_sentences.push(sentence);
            }
        }
        out_lines.push(line_sentences.join(" "));
    }
    // Collapse runs of blank lines created by fully deduped paragraphs.
    let mut collapsed: Vec<String> = Vec::new();
    for line in out_lines {
        if line.is_empty() && collapsed.last().is_some_and(|l| l.is_empty()) {
            continue;
        }
        collapsed.push(line);
    }
    collapsed.join("\n").trim().to_string()
}

/// Enforce the global word cap at sentence granularity.  When a question is
/// required and the cap would cut every question, the first question is
/// kept at the end.
fn cap_words(text: &str, max_words: usize, requires_question: bool) -> String {
    let total: usize = text.split_whitespace().count();
    if total <= max_words {
        return text.to_string();
    }

    let mut words = 0usize;
    let mut kept_lines: Vec<String> = Vec::new();
    let mut dropped_question: Option<String> = None;
    let mut capped = false;
    for line in text.split('\n') {
        let mut line_out: Vec<String> = Vec::new();
        for sentence in split_sentences(line) {
            let sentence_words = sentence.split_whitespace().count();
            if !capped && words + sentence_words <= max_words {
                words += sentence_words;
                line_out.push(sentence);
            } else {
                capped = true;
                if sentence.ends_with('?') && dropped_question.is_none() {
                    dropped_question = Some(sentence);
                }
            }
        }
        kept_lines.push(line_out.join(" "));
    }
    let mut result = kept_lines.join("\n").trim().to_string();
    if requires_question && !result.contains('?') {
        if let Some(question) = dropped_question {
            result.push_str("\n\n");
            result.push_str(&question);
        } else {
            result.push_str("\n\nWhere do you want to push the design next?");
        }
    }
    result
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_types::Citation;

    fn domain_result(text: &str, citations: usize) -> AgentResult {
        let mut result = AgentResult::text(AgentId::DomainExpert, text);
        result.citations = (0..citations)
            .map(|i| Citation {
                source: format!("source-{i}"),
                snippet: "…".to_string(),
                score: 0.8,
            })
            .collect();
        result
    }

    fn socratic_result(text: &str) -> AgentResult {
        AgentResult::text(AgentId::Socratic, text)
    }

    fn analysis_result(insight: &str, watch: &str) -> AgentResult {
        let mut result = AgentResult::text(AgentId::Analysis, insight);
        result.suggested_followups = vec![watch.to_string()];
        result
    }

    #[test]
    fn knowledge_only_has_citations_and_no_questions() {
        let results = vec![domain_result(
            "A practice gym wants 15 by 27 meters clear. Did you check the ceiling? Height should reach 7 meters.",
            2,
        )];
        let reply = synthesize(RouteType::KnowledgeOnly, &results, &SynthesisPolicy::default());
        assert!(reply.contains("Sources: [1] source-0, [2] source-1"));
        assert!(!reply.contains('?'));
        assert!(reply.contains("7 meters"));
    }

    #[test]
    fn balanced_guidance_keeps_the_three_labels_in_order() {
        let results = vec![
            analysis_result("The bar scheme reads clearly.", "The section is still unexamined."),
            socratic_result("What does the roof want to do about it?"),
        ];
        let reply = synthesize(RouteType::BalancedGuidance, &results, &SynthesisPolicy::default());
        let insight_at = reply.find("Insight:").unwrap();
        let watch_at = reply.find("Watch:").unwrap();
        let direction_at = reply.find("Direction:").unwrap();
        assert!(insight_at < watch_at && watch_at < direction_at);
        assert!(reply.contains("What does the roof want to do about it?"));
    }

    #[test]
    fn socratic_routes_always_ask() {
        let results = vec![socratic_result("Think about the entry sequence")];
        let reply = synthesize(RouteType::SocraticExploration, &results, &SynthesisPolicy::default());
        assert!(reply.contains('?'));

        let reply = synthesize(RouteType::SocraticClarification, &[], &SynthesisPolicy::default());
        assert!(reply.contains('?'));
    }

    #[test]
    fn comprehensive_has_knowledge_critique_and_question() {
        let results = vec![
            domain_result("Community centers typically zone loud and quiet programs apart.", 1),
            analysis_result("Your zoning is implicit.", "The gym placement fights the library."),
            socratic_result("Which adjacency would you defend first?"),
        ];
        let reply = synthesize(RouteType::MultiAgentComprehensive, &results, &SynthesisPolicy::default());
        assert!(reply.contains("zone loud and quiet"));
        assert!(reply.contains("fights the library"));
        assert!(reply.trim_end().ends_with("Which adjacency would you defend first?"));
    }

    #[test]
    fn duplicate_sentences_are_removed() {
        let results = vec![
            domain_result("The gym needs seven meters clear height.", 0),
            analysis_result("The gym needs seven meters clear height.", "Check the structure."),
            socratic_result("How will the roof span it?"),
        ];
        let reply = synthesize(RouteType::MultiAgentComprehensive, &results, &SynthesisPolicy::default());
        let occurrences = reply.matches("seven meters clear height").count();
        assert_eq!(occurrences, 1);
    }

    #[test]
    fn word_cap_is_enforced_but_keeps_the_question() {
        let long = (0..40)
            .map(|i| format!("Point area{i} covers zone{i} and wing{i} with span{i} detail."))
            .collect::<Vec<_>>()
            .join(" ");
        let results = vec![socratic_result(&format!("{long} Which wall matters most?"))];
        let policy = SynthesisPolicy { max_words: 50, dedup_jaccard: 0.8 };
        let reply = synthesize(RouteType::SocraticExploration, &results, &policy);
        // The cap allows slack only for the appended question.
        assert!(reply.split_whitespace().count() <= 60);
        assert!(reply.contains('?'));
    }

    #[test]
    fn self_direction_is_templated_per_phase() {
        let ideation = self_direction_text(DesignPhase::Ideation);
        let materialization = self_direction_text(DesignPhase::Materialization);
        assert_ne!(ideation, materialization);
        assert!(!ideation.contains('?'));
    }

    #[test]
    fn knowledge_with_challenge_answers_then_asks() {
        let results = vec![
            domain_result("Load-bearing masonry tops out around five stories economically.", 1),
            socratic_result("So why does your scheme assume eight?"),
        ];
        let reply = synthesize(RouteType::KnowledgeWithChallenge, &results, &SynthesisPolicy::default());
        let answer_at = reply.find("five stories").unwrap();
        let question_at = reply.find("assume eight?").unwrap();
        assert!(answer_at < question_at);
    }
}
