//! Domain expert: retrieval-grounded answers with inline citations.
//!
//! Retrieval and generation both degrade independently: thin retrieval
//! falls back to a generated answer explicitly flagged `synthesized`; a
//! failed generation falls back to stitching the retrieved passages
//! directly, citations intact.

use tracing::{debug, warn};

use atelier_knowledge::SearchFilters;
use atelier_llm::{CallerRole, CompletionRequest};
use atelier_types::{AgentId, AgentResult, Citation};

use crate::{readable_building_type, AgentDeps, AgentInput};

/// Flag set when the answer was generated rather than retrieved.
pub const SYNTHESIZED_FLAG: &str = "synthesized";

/// Over-fetch factor so reranking has something to reorder.
const SEARCH_K: usize = 5;

pub async fn run_domain_expert(input: &AgentInput<'_>, deps: &AgentDeps) -> AgentResult {
    let building = readable_building_type(input.snapshot);
    let query = match &building {
        Some(b) => format!("{} ({})", input.user_text, b),
        None => input.user_text.to_string(),
    };

    let filters = SearchFilters { phase: Some(input.snapshot.phase.current) };
    let passages = match deps.retriever.search(&query, SEARCH_K, &filters).await {
        Ok(passages) => passages
            .into_iter()
            .filter(|p| p.score >= deps.retrieval.similarity_threshold)
            .collect::<Vec<_>>(),
        Err(err) => {
            warn!(error = %err, "retrieval unavailable");
            Vec::new()
        }
    };
    debug!(hits = passages.len(), "domain retrieval");

    if passages.len() < deps.retrieval.min_passages {
        return synthesized_answer(input, deps).await;
    }

    let citations: Vec<Citation> = passages
        .iter()
        .map(|p| Citation {
            source: p.source.clone(),
            snippet: snippet(&p.text),
            score: p.score,
        })
        .collect();

    let sources_block = passages
        .iter()
        .enumerate()
        .map(|(i, p)| format!("[{}] ({}) {}", i + 1, p.source, p.text))
        .collect::<Vec<_>>()
        .join("\n");
    let system = format!(
        "You are a domain expert on architectural design. Answer the student's question \
         using ONLY the numbered source passages below, citing them inline as [1], [2], … . \
         Be direct and factual; do not ask questions. At most three short paragraphs.\n\n{sources_block}"
    );
    let request = CompletionRequest::new(&deps.model, system)
        .with_user(input.user_text)
        .timeout(deps.timeout);

    let text = match deps.gateway.complete(CallerRole::Domain, request).await {
        Ok(completion) => completion.text.trim().to_string(),
        Err(err) => {
            // Generation failed but retrieval did not: stitch the passages.
            warn!(error = %err, "domain generation failed, stitching passages");
            passages
                .iter()
                .take(deps.retrieval.min_passages)
                .enumerate()
                .map(|(i, p)| format!("{} [{}]", p.text, i + 1))
                .collect::<Vec<_>>()
                .join("\n\n")
        }
    };

    let mut result = AgentResult::text(AgentId::DomainExpert, text);
    result.citations = citations;
    result
}

/// LLM-only answer, explicitly marked as synthesized rather than retrieved.
async fn synthesized_answer(input: &AgentInput<'_>, deps: &AgentDeps) -> AgentResult {
    let system = "You are a domain expert on architectural design. Answer the student's \
                  question from general professional knowledge. Be direct and factual; \
                  do not ask questions. At most three short paragraphs."
        .to_string();
    let request = CompletionRequest::new(&deps.model, system)
        .with_user(input.user_text)
        .timeout(deps.timeout);

    let text = match deps.gateway.complete(CallerRole::Domain, request).await {
        Ok(completion) => format!("{}\n\n(synthesized from general knowledge, not source material)", completion.text.trim()),
        Err(err) => {
            warn!(error = %err, "domain fallback generation failed");
            "I could not reach the knowledge base for this one. \
             (synthesized from general knowledge, not source material)"
                .to_string()
        }
    };

    let mut result = AgentResult::text(AgentId::DomainExpert, text);
    result.flags.push(SYNTHESIZED_FLAG.to_string());
    result
}

fn snippet(text: &str) -> String {
    const MAX: usize = 140;
    if text.len() <= MAX {
        return text.to_string();
    }
    let mut end = MAX;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_truncates_on_char_boundary() {
        let long = "a".repeat(200);
        assert!(snippet(&long).len() <= 144);
        let short = "short passage";
        assert_eq!(snippet(short), "short passage");
        // Multi-byte content near the boundary must not split a codepoint.
        let accented = "é".repeat(100);
        let s = snippet(&accented);
        assert!(s.ends_with('…'));
    }
}
