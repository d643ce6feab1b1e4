//! Specialist agents and response synthesis.
//!
//! Agents are stateless: each is a pure async function of a state snapshot,
//! the turn's context package, and injected dependencies, returning an
//! [`AgentResult`].  Dispatch goes through [`run_agent`] keyed by the
//! [`AgentId`] tagged union — there is no inheritance hierarchy and no
//! back-pointer from agents into session state.

mod analysis;
mod cognitive;
mod domain;
mod socratic;
mod synthesis;

pub use analysis::run_analysis;
pub use cognitive::run_cognitive;
pub use domain::run_domain_expert;
pub use socratic::{run_socratic, SocraticStrategy};
pub use synthesis::{self_direction_text, synthesize, SynthesisPolicy};

use std::sync::Arc;
use std::time::Duration;

use atelier_knowledge::{RerankWeights, Retriever};
use atelier_llm::Gateway;
use atelier_types::{AgentId, AgentResult, ContextPackage, ConversationState, SessionMode};

/// Retrieval behavior for the domain expert.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalPolicy {
    /// Passages needed before answering from retrieval alone.
    pub min_passages: usize,
    /// Similarity floor for a passage to count.
    pub similarity_threshold: f32,
    pub weights: RerankWeights,
}

impl Default for RetrievalPolicy {
    fn default() -> Self {
        Self {
            min_passages: 3,
            similarity_threshold: 0.35,
            weights: RerankWeights::default(),
        }
    }
}

/// Injected dependencies shared by every agent.  Process-wide singletons
/// (gateway, knowledge store) arrive here explicitly; no module-level state.
#[derive(Clone)]
pub struct AgentDeps {
    pub gateway: Gateway,
    pub retriever: Arc<dyn Retriever>,
    pub model: String,
    pub timeout: Duration,
    pub retrieval: RetrievalPolicy,
}

/// Read-only view of the session an agent runs against.
pub struct AgentInput<'a> {
    pub snapshot: &'a ConversationState,
    pub context: &'a ContextPackage,
    pub mode: SessionMode,
    pub brief: &'a str,
    pub user_text: &'a str,
}

/// Dispatch table over the agent tagged union.
pub async fn run_agent(id: AgentId, input: &AgentInput<'_>, deps: &AgentDeps) -> AgentResult {
    match id {
        AgentId::Socratic => run_socratic(input, deps).await,
        AgentId::DomainExpert => run_domain_expert(input, deps).await,
        AgentId::CognitiveEnhancement => run_cognitive(input, deps).await,
        AgentId::Analysis => run_analysis(input, deps).await,
    }
}

/// Human-readable program name for prompts ("community_center" → "community center").
pub(crate) fn readable_building_type(snapshot: &ConversationState) -> Option<String> {
    snapshot
        .building_type
        .as_ref()
        .map(|t| t.replace('_', " "))
}
